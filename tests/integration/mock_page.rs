//! In-memory betting page for integration testing.
//!
//! Provides a deterministic `SnapshotProvider` + `MarketTableAccessor`
//! whose listing, totals tables and failures are fully controllable
//! from test code. No browser, no network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hoopwatch::engine::poller::{CycleReport, PresentationSink};
use hoopwatch::page::{MarketTableAccessor, SnapshotProvider};
use hoopwatch::types::*;

#[derive(Default)]
struct PageState {
    leagues: Vec<LeagueSnapshot>,
    /// Totals rows per game key; a missing entry means no totals market.
    tables: HashMap<String, Vec<RowSnapshot>>,
    focused: Option<String>,
    focus_count: usize,
    /// Listing reads that fail as stale before one succeeds.
    stale_scans: u32,
    /// If set, every operation returns this error.
    force_error: Option<ScraperError>,
}

/// A fake live page.
#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

/// Build a game tile. Locators are assigned by `set_board`.
pub fn tile(team1: &str, team2: &str, score1: &str, score2: &str, quarter: &str, clock: &str) -> GameSnapshot {
    GameSnapshot {
        team1: team1.to_string(),
        team2: team2.to_string(),
        score1: score1.to_string(),
        score2: score2.to_string(),
        quarter: quarter.to_string(),
        clock: clock.to_string(),
        locator: GameLocator {
            league_index: 0,
            game_index: 0,
        },
    }
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole live listing.
    pub fn set_board(&self, leagues: Vec<(&str, Vec<GameSnapshot>)>) {
        let leagues = leagues
            .into_iter()
            .enumerate()
            .map(|(league_index, (name, games))| LeagueSnapshot {
                name: name.to_string(),
                games: games
                    .into_iter()
                    .enumerate()
                    .map(|(game_index, mut game)| {
                        game.locator = GameLocator {
                            league_index,
                            game_index,
                        };
                        game
                    })
                    .collect(),
            })
            .collect();
        self.state.lock().unwrap().leagues = leagues;
    }

    /// Set the totals table shown while `game` ("A vs B") is in focus.
    pub fn set_table(&self, game: &str, rows: &[(&str, &str, &str)]) {
        let rows = rows
            .iter()
            .map(|(total, over, under)| RowSnapshot {
                total_text: total.to_string(),
                over_text: over.to_string(),
                under_text: under.to_string(),
            })
            .collect();
        self.state.lock().unwrap().tables.insert(game.to_string(), rows);
    }

    pub fn set_stale_scans(&self, count: u32) {
        self.state.lock().unwrap().stale_scans = count;
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, err: ScraperError) {
        self.state.lock().unwrap().force_error = Some(err);
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        self.state.lock().unwrap().force_error = None;
    }

    pub fn focus_count(&self) -> usize {
        self.state.lock().unwrap().focus_count
    }

    fn check_error(state: &PageState) -> Result<(), ScraperError> {
        match &state.force_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SnapshotProvider for FakePage {
    async fn prepare(&self) -> Result<(), ScraperError> {
        Self::check_error(&self.state.lock().unwrap())
    }

    async fn current_leagues(&self) -> Result<Vec<LeagueSnapshot>, ScraperError> {
        let mut state = self.state.lock().unwrap();
        Self::check_error(&state)?;
        if state.stale_scans > 0 {
            state.stale_scans -= 1;
            return Err(ScraperError::StaleRead("listing re-rendered".into()));
        }
        Ok(state.leagues.clone())
    }
}

#[async_trait]
impl MarketTableAccessor for FakePage {
    async fn focus_game(&self, locator: GameLocator) -> Result<(), ScraperError> {
        let mut state = self.state.lock().unwrap();
        Self::check_error(&state)?;
        let game = state
            .leagues
            .get(locator.league_index)
            .and_then(|l| l.games.get(locator.game_index))
            .ok_or_else(|| ScraperError::StaleRead("tile is gone".into()))?;
        let key = game.key().to_string();
        state.focused = Some(key);
        state.focus_count += 1;
        Ok(())
    }

    async fn locate_total_table(&self) -> Result<Option<TableHandle>, ScraperError> {
        let state = self.state.lock().unwrap();
        Self::check_error(&state)?;
        let has_table = state
            .focused
            .as_ref()
            .map_or(false, |key| state.tables.contains_key(key));
        Ok(has_table.then_some(TableHandle { index: 0 }))
    }

    async fn read_row(
        &self,
        _table: TableHandle,
        index: usize,
    ) -> Result<Option<RowSnapshot>, ScraperError> {
        let state = self.state.lock().unwrap();
        Self::check_error(&state)?;
        Ok(state
            .focused
            .as_ref()
            .and_then(|key| state.tables.get(key))
            .and_then(|rows| rows.get(index).cloned()))
    }
}

/// Sink that keeps every published board.
#[derive(Default)]
pub struct RecordingSink {
    boards: Mutex<Vec<BoardSnapshot>>,
    reports: Mutex<Vec<CycleReport>>,
}

impl RecordingSink {
    pub fn boards(&self) -> Vec<BoardSnapshot> {
        self.boards.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl PresentationSink for RecordingSink {
    fn publish(&self, board: BoardSnapshot) {
        self.boards.lock().unwrap().push(board);
    }

    fn record_cycle(&self, report: &CycleReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

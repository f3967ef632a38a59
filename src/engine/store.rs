//! Game record store: every known game, its baseline, and the marked set.
//!
//! The store is mutated only by the poll loop. Each cycle the poller
//! upserts every observed game, then calls `prune` with the set of keys
//! seen in that cycle's scan. Readers get cloned `BoardSnapshot`s.
//!
//! Marks live for one cycle: `prune` keeps only those re-evaluated since
//! the previous prune.

use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::marker::MarkedGameSelector;
use super::selector::RowSelector;
use crate::page::MarketTableAccessor;
use crate::types::{
    Baseline, BoardSnapshot, GameKey, GameRecord, League, MarkedGame, Observation, Quarter,
    QuarterLabels, ScraperError,
};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// When a game that was first seen before tip-off gets its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineTrigger {
    /// On the ATS → 1Q transition, stamped with the start-of-quarter clock.
    #[default]
    AtsToFirstQuarter,
    /// On any update into a live quarter, stamped with the observed clock.
    FirstLiveQuarter,
}

// ---------------------------------------------------------------------------
// Per-cycle bookkeeping
// ---------------------------------------------------------------------------

/// Keys observed in one cycle's scan, per league.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveGames {
    leagues: BTreeMap<String, BTreeSet<GameKey>>,
}

impl ActiveGames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, league_name: &str, key: GameKey) {
        self.leagues
            .entry(league_name.to_string())
            .or_default()
            .insert(key);
    }

    pub fn games(&self, league_name: &str) -> Option<&BTreeSet<GameKey>> {
        self.leagues.get(league_name)
    }

    pub fn contains(&self, league_name: &str, key: &GameKey) -> bool {
        self.games(league_name).map_or(false, |g| g.contains(key))
    }

    pub fn game_count(&self) -> usize {
        self.leagues.values().map(|g| g.len()).sum()
    }
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted { baseline_captured: bool },
    Updated { baseline_captured: bool },
    /// Observation ignored (not started, or on a break).
    Unchanged,
}

impl Reconciled {
    pub fn baseline_captured(&self) -> bool {
        matches!(
            self,
            Reconciled::Inserted { baseline_captured: true }
                | Reconciled::Updated { baseline_captured: true }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub games: usize,
    pub leagues: usize,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct GameStore {
    leagues: BTreeMap<String, League>,
    marked: BTreeMap<GameKey, MarkedGame>,
    /// Games whose mark was re-evaluated since the last prune.
    evaluated: BTreeSet<GameKey>,
    selector: RowSelector,
    marker: MarkedGameSelector,
    trigger: BaselineTrigger,
    labels: QuarterLabels,
}

impl GameStore {
    pub fn new(selector: RowSelector, trigger: BaselineTrigger, labels: QuarterLabels) -> Self {
        Self {
            leagues: BTreeMap::new(),
            marked: BTreeMap::new(),
            evaluated: BTreeSet::new(),
            marker: MarkedGameSelector::new(selector.clone()),
            selector,
            trigger,
            labels,
        }
    }

    pub fn leagues(&self) -> &BTreeMap<String, League> {
        &self.leagues
    }

    pub fn marked(&self) -> &BTreeMap<GameKey, MarkedGame> {
        &self.marked
    }

    pub fn game(&self, league_name: &str, key: &GameKey) -> Option<&GameRecord> {
        self.leagues.get(league_name)?.get(key)
    }

    pub fn game_count(&self) -> usize {
        self.leagues.values().map(|l| l.len()).sum()
    }

    /// Copy of the current state for the presentation layer.
    pub fn snapshot(&self, cycle: u64) -> BoardSnapshot {
        BoardSnapshot {
            cycle,
            taken_at: Utc::now(),
            leagues: self.leagues.clone(),
            marked: self.marked.clone(),
        }
    }

    /// Insert a newly seen game, or update a known one.
    ///
    /// A game first seen while already in play is baselined right away
    /// against the market on screen.
    pub async fn upsert(
        &mut self,
        league_name: &str,
        key: &GameKey,
        obs: &Observation,
        page: &dyn MarketTableAccessor,
    ) -> Result<Reconciled, ScraperError> {
        if self.game(league_name, key).is_some() {
            return self.update(league_name, key, obs, page).await;
        }

        debug!(game = %key, league = league_name, quarter = %obs.quarter, "Adding new game");
        let mut record = GameRecord::from_observation(obs);

        let mut captured = false;
        if obs.quarter.is_live() {
            if let Some(baseline) = self
                .capture_baseline(page, key, obs.quarter.clone(), obs.time_left.clone())
                .await?
            {
                captured = record.record_baseline(baseline);
            }
        }

        self.leagues
            .entry(league_name.to_string())
            .or_default()
            .insert(key.clone(), record);

        if captured {
            self.refresh_mark(league_name, key, page).await?;
        }

        Ok(Reconciled::Inserted { baseline_captured: captured })
    }

    /// Apply an observation to a known game.
    pub async fn update(
        &mut self,
        league_name: &str,
        key: &GameKey,
        obs: &Observation,
        page: &dyn MarketTableAccessor,
    ) -> Result<Reconciled, ScraperError> {
        let existing = self
            .game(league_name, key)
            .ok_or_else(|| ScraperError::Reconciliation {
                game: key.to_string(),
                message: format!("not tracked under league {league_name}"),
            })?;

        // Nothing is comparable before tip-off or during a break
        if !obs.quarter.is_live() {
            return Ok(Reconciled::Unchanged);
        }

        let stamp = match self.trigger {
            BaselineTrigger::AtsToFirstQuarter => {
                let tip_off = existing.quarter == Quarter::NotStarted
                    && obs.quarter == Quarter::Period(1);
                // Clock may already read 09:59; the line was set at 10:00
                tip_off.then(|| (Quarter::Period(1), self.labels.start_clock.clone()))
            }
            BaselineTrigger::FirstLiveQuarter => {
                Some((obs.quarter.clone(), obs.time_left.clone()))
            }
        }
        .filter(|_| existing.baseline.is_none());

        let baseline = match stamp {
            Some((quarter, time_left)) => {
                self.capture_baseline(page, key, quarter, time_left).await?
            }
            None => None,
        };

        let mut captured = false;
        if let Some(record) = self.record_mut(league_name, key) {
            record.apply(obs);
            if let Some(baseline) = baseline {
                captured = record.record_baseline(baseline);
            }
        }

        self.refresh_mark(league_name, key, page).await?;

        Ok(Reconciled::Updated { baseline_captured: captured })
    }

    /// Forget marking progress of an abandoned cycle.
    pub fn begin_cycle(&mut self) {
        self.evaluated.clear();
    }

    /// Drop every game and league absent from `active`, and every mark
    /// that was not re-evaluated this cycle.
    pub fn prune(&mut self, active: &ActiveGames) -> PruneReport {
        let mut report = PruneReport::default();

        self.leagues.retain(|league_name, games| {
            let Some(keys) = active.games(league_name) else {
                info!(league = %league_name, games = games.len(), "Cleaning up inactive league");
                report.games += games.len();
                report.leagues += 1;
                return false;
            };

            games.retain(|key, _| {
                let keep = keys.contains(key);
                if !keep {
                    info!(game = %key, league = %league_name, "Cleaning up inactive game");
                    report.games += 1;
                }
                keep
            });

            if games.is_empty() {
                info!(league = %league_name, "Cleaning up empty league");
                report.leagues += 1;
                return false;
            }
            true
        });

        let leagues = &self.leagues;
        let evaluated = std::mem::take(&mut self.evaluated);
        self.marked.retain(|key, mark| {
            let tracked = leagues
                .get(&mark.league_name)
                .map_or(false, |games| games.contains_key(key));
            if tracked && !evaluated.contains(key) {
                debug!(game = %key, "Mark not re-checked this cycle, dropping");
            }
            tracked && evaluated.contains(key)
        });

        report
    }

    // -- Internals -------------------------------------------------------

    fn record_mut(&mut self, league_name: &str, key: &GameKey) -> Option<&mut GameRecord> {
        self.leagues.get_mut(league_name)?.get_mut(key)
    }

    /// Read the opening line of the game in focus.
    async fn capture_baseline(
        &self,
        page: &dyn MarketTableAccessor,
        key: &GameKey,
        quarter: Quarter,
        time_left: String,
    ) -> Result<Option<Baseline>, ScraperError> {
        match self.selector.first_row(page).await? {
            Some(row) => {
                info!(
                    game = %key,
                    first_total = %row.expected_total_score,
                    quarter = %quarter,
                    time_left = %time_left,
                    "Baseline recorded"
                );
                Ok(Some(Baseline {
                    first_total_score: row.expected_total_score,
                    quarter_when_recorded: quarter,
                    time_left_when_recorded: time_left,
                }))
            }
            None => {
                warn!(game = %key, "No totals line on page, baseline not recorded");
                Ok(None)
            }
        }
    }

    /// Re-evaluate one game's mark. Only a fatal error escapes; anything
    /// else clears the mark for this cycle.
    async fn refresh_mark(
        &mut self,
        league_name: &str,
        key: &GameKey,
        page: &dyn MarketTableAccessor,
    ) -> Result<(), ScraperError> {
        let Some(record) = self.leagues.get(league_name).and_then(|l| l.get(key)) else {
            return Ok(());
        };
        self.evaluated.insert(key.clone());

        let decision = self.marker.evaluate(league_name, key, record, page).await;
        match decision {
            Ok(Some(mark)) => {
                self.marked.insert(key.clone(), mark);
            }
            Ok(None) => {
                self.marked.remove(key);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(game = %key, league = league_name, error = %e, "Marking skipped this cycle");
                self.marked.remove(key);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Poll cycle orchestrator: the scan → reconcile → prune → publish loop.
//!
//! One `Poller` owns the game store and drives the page. Cycles never
//! overlap: the next one starts `refresh_interval` after the previous one
//! finished. A `StopHandle` ends the loop cooperatively; a stop requested
//! mid-cycle abandons that cycle without publishing it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use super::extractor::SelectionCriteria;
use super::selector::{RetryPolicy, RowSelector};
use super::store::{ActiveGames, BaselineTrigger, GameStore, Reconciled};
use crate::page::BettingPage;
use crate::types::{
    BoardSnapshot, GameKey, GameLocator, LeagueSnapshot, Observation, QuarterLabels, ScraperError,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything the engine needs from configuration.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub refresh_interval: Duration,
    pub criteria: SelectionCriteria,
    pub retry: RetryPolicy,
    pub trigger: BaselineTrigger,
    pub labels: QuarterLabels,
}

// ---------------------------------------------------------------------------
// Stop handle
// ---------------------------------------------------------------------------

/// Cooperative cancellation shared between the poll loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Presentation
// ---------------------------------------------------------------------------

/// Receiver of fully reconciled boards. Must not block the poll loop.
#[cfg_attr(test, mockall::automock)]
pub trait PresentationSink: Send + Sync {
    fn publish(&self, board: BoardSnapshot);

    /// Counters of the cycle that produced the last published board.
    fn record_cycle(&self, _report: &CycleReport) {}
}

impl PresentationSink for watch::Sender<Arc<BoardSnapshot>> {
    fn publish(&self, board: BoardSnapshot) {
        self.send_replace(Arc::new(board));
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Counters of one completed poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub leagues: usize,
    pub games_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Games on a break or not started.
    pub unchanged: usize,
    /// Half-rendered tiles, kept active but not reconciled.
    pub incomplete: usize,
    /// Games whose reconciliation failed this cycle.
    pub skipped: usize,
    pub baselines_captured: usize,
    pub marked: usize,
    pub pruned_games: usize,
    pub pruned_leagues: usize,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    fn new(cycle_number: u64) -> Self {
        Self {
            cycle_number,
            leagues: 0,
            games_seen: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            incomplete: 0,
            skipped: 0,
            baselines_captured: 0,
            marked: 0,
            pruned_games: 0,
            pruned_leagues: 0,
            timestamp: Utc::now(),
        }
    }

    fn count(&mut self, outcome: Reconciled) {
        match outcome {
            Reconciled::Inserted { .. } => self.inserted += 1,
            Reconciled::Updated { .. } => self.updated += 1,
            Reconciled::Unchanged => self.unchanged += 1,
        }
        if outcome.baseline_captured() {
            self.baselines_captured += 1;
        }
    }
}

pub fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        leagues = report.leagues,
        games = report.games_seen,
        inserted = report.inserted,
        updated = report.updated,
        incomplete = report.incomplete,
        skipped = report.skipped,
        baselines = report.baselines_captured,
        marked = report.marked,
        pruned = report.pruned_games,
        "Cycle complete"
    );
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    settings: PollSettings,
    store: GameStore,
    cycle: u64,
    stop: StopHandle,
}

impl Poller {
    pub fn new(settings: PollSettings, stop: StopHandle) -> Self {
        let selector = RowSelector::new(settings.criteria, settings.retry);
        let store = GameStore::new(selector, settings.trigger, settings.labels.clone());
        Self {
            settings,
            store,
            cycle: 0,
            stop,
        }
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    /// Number of completed cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run cycles until stopped or the page session is lost.
    ///
    /// Returns `Err` only for `AutomationFatal`. Any other cycle failure
    /// is logged and the loop carries on with the previous state.
    pub async fn run<P: BettingPage>(
        &mut self,
        page: &P,
        sink: &dyn PresentationSink,
    ) -> Result<(), ScraperError> {
        info!(
            interval_ms = self.settings.refresh_interval.as_millis() as u64,
            trigger = ?self.settings.trigger,
            "Poll loop started"
        );

        while !self.stop.is_stopped() {
            match self.run_cycle(page).await {
                Ok(Some(report)) => {
                    log_cycle_report(&report);
                    sink.publish(self.store.snapshot(report.cycle_number));
                    sink.record_cycle(&report);
                }
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    error!(cycle = self.cycle + 1, error = %e, "Poll loop aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(cycle = self.cycle + 1, error = %e, "Cycle skipped");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.refresh_interval) => {}
                _ = self.stop.stopped() => break,
            }
        }

        info!(cycles = self.cycle, "Poll loop stopped");
        Ok(())
    }

    /// One full cycle. `Ok(None)` when a stop request cut it short.
    pub async fn run_cycle<P: BettingPage>(
        &mut self,
        page: &P,
    ) -> Result<Option<CycleReport>, ScraperError> {
        if self.stop.is_stopped() {
            return Ok(None);
        }
        let cycle = self.cycle + 1;
        debug!(cycle, "Starting cycle");
        self.store.begin_cycle();

        let leagues = self.scan(page).await?;
        if self.stop.is_stopped() {
            return Ok(None);
        }

        let mut report = CycleReport::new(cycle);
        let mut active = ActiveGames::new();

        for league in &leagues {
            if self.stop.is_stopped() {
                info!(cycle, league = %league.name, "Stop requested, abandoning cycle");
                return Ok(None);
            }
            report.leagues += 1;

            for game in &league.games {
                report.games_seen += 1;
                let key = game.key();
                active.insert(&league.name, key.clone());

                let obs = match game.observe(&self.settings.labels) {
                    Ok(Some(obs)) => obs,
                    Ok(None) => {
                        debug!(game = %key, league = %league.name, "Tile still rendering");
                        report.incomplete += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(game = %key, league = %league.name, error = %e, "Skipping game");
                        report.skipped += 1;
                        continue;
                    }
                };

                match self.reconcile(page, &league.name, &key, game.locator, &obs).await {
                    Ok(outcome) => report.count(outcome),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(game = %key, league = %league.name, error = %e, "Skipping game");
                        report.skipped += 1;
                    }
                }
            }
        }

        if self.stop.is_stopped() {
            return Ok(None);
        }

        let pruned = self.store.prune(&active);
        report.pruned_games = pruned.games;
        report.pruned_leagues = pruned.leagues;
        report.marked = self.store.marked().len();
        report.timestamp = Utc::now();

        self.cycle = cycle;
        Ok(Some(report))
    }

    /// Fetch the live listing, retrying stale reads of the whole page.
    async fn scan<P: BettingPage>(&self, page: &P) -> Result<Vec<LeagueSnapshot>, ScraperError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match page.prepare().await {
                Ok(()) => page.current_leagues().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(leagues) => return Ok(leagues),
                Err(e) if e.is_transient() && attempts < self.settings.retry.per_read => {
                    debug!(attempt = attempts, error = %e, "Live listing stale, rescanning");
                }
                Err(e) if e.is_transient() => {
                    return Err(ScraperError::RetriesExhausted {
                        what: "live games listing".to_string(),
                        attempts,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Focus one game and feed it to the store, retrying stale reads.
    async fn reconcile<P: BettingPage>(
        &mut self,
        page: &P,
        league_name: &str,
        key: &GameKey,
        locator: GameLocator,
        obs: &Observation,
    ) -> Result<Reconciled, ScraperError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match page.focus_game(locator).await {
                Ok(()) => self.store.upsert(league_name, key, obs, page).await,
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_transient() && attempts < self.settings.retry.per_read => {
                    debug!(game = %key, attempt = attempts, error = %e, "Game tile stale, retrying");
                }
                Err(e) if e.is_transient() => {
                    return Err(ScraperError::RetriesExhausted {
                        what: format!("game {key}"),
                        attempts,
                    });
                }
                other => return other,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

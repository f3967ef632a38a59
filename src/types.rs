//! Shared types for the HOOPWATCH poller.
//!
//! These types form the data model used across all modules.
//! The page adapters produce raw `GameSnapshot`/`RowSnapshot` text,
//! the engine turns it into `GameRecord`s and `MarkedGame`s, and the
//! dashboard only ever sees cloned `BoardSnapshot`s.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Game identity
// ---------------------------------------------------------------------------

/// Join key between the live scrape and stored state.
///
/// Built from the ordered team pair, so "A vs B" and "B vs A" are
/// different games.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameKey(String);

impl GameKey {
    pub fn new(first_team: &str, second_team: &str) -> Self {
        Self(format!("{} vs {}", first_team.trim(), second_team.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Quarter
// ---------------------------------------------------------------------------

/// Labels the site prints in the quarter cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterLabels {
    /// Game about to start.
    #[serde(default = "default_not_started")]
    pub not_started: String,
    /// Substring marking a break between periods.
    #[serde(default = "default_break_marker")]
    pub break_marker: String,
    #[serde(default = "default_first_quarter")]
    pub first_quarter: String,
    /// Clock value recorded when a baseline is taken at tip-off.
    #[serde(default = "default_start_clock")]
    pub start_clock: String,
}

fn default_not_started() -> String {
    "ATS".to_string()
}

fn default_break_marker() -> String {
    "B".to_string()
}

fn default_first_quarter() -> String {
    "1Q".to_string()
}

fn default_start_clock() -> String {
    "10:00".to_string()
}

impl Default for QuarterLabels {
    fn default() -> Self {
        Self {
            not_started: default_not_started(),
            break_marker: default_break_marker(),
            first_quarter: default_first_quarter(),
            start_clock: default_start_clock(),
        }
    }
}

/// Period indicator of a live game.
///
/// Serialized by variant, not by site label, so a stored board reads
/// back the same whatever `QuarterLabels` produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quarter {
    /// "ATS", about to start.
    NotStarted,
    /// Any break between periods.
    Break,
    /// Regular period, 1-based.
    Period(u8),
    /// Extra time, with the label as printed ("OT", "OT2").
    Overtime(String),
    Other(String),
}

impl Quarter {
    /// Parse the text of the quarter cell.
    pub fn parse(raw: &str, labels: &QuarterLabels) -> Self {
        let s = raw.trim();
        if s == labels.not_started {
            return Quarter::NotStarted;
        }
        if !labels.break_marker.is_empty() && s.contains(labels.break_marker.as_str()) {
            return Quarter::Break;
        }
        if s == labels.first_quarter {
            return Quarter::Period(1);
        }
        if let Some(n) = s.strip_suffix('Q').and_then(|d| d.parse::<u8>().ok()) {
            return Quarter::Period(n);
        }
        if s.to_ascii_uppercase().starts_with("OT") {
            return Quarter::Overtime(s.to_string());
        }
        Quarter::Other(s.to_string())
    }

    /// Whether the game is being played (not before tip-off, not on a break).
    pub fn is_live(&self) -> bool {
        !matches!(self, Quarter::NotStarted | Quarter::Break)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quarter::NotStarted => write!(f, "ATS"),
            Quarter::Break => write!(f, "B"),
            Quarter::Period(n) => write!(f, "{n}Q"),
            Quarter::Overtime(label) => write!(f, "{label}"),
            Quarter::Other(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scrape output
// ---------------------------------------------------------------------------

/// Position of a game tile on the page, used to focus it again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLocator {
    pub league_index: usize,
    pub game_index: usize,
}

/// Raw text of one game tile as read from the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub team1: String,
    pub team2: String,
    pub score1: String,
    pub score2: String,
    pub quarter: String,
    pub clock: String,
    pub locator: GameLocator,
}

/// One league section as read from the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSnapshot {
    pub name: String,
    pub games: Vec<GameSnapshot>,
}

/// Parsed, validated view of a `GameSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub first_team: String,
    pub second_team: String,
    pub first_team_score: u32,
    pub second_team_score: u32,
    pub quarter: Quarter,
    pub time_left: String,
}

impl GameSnapshot {
    pub fn key(&self) -> GameKey {
        GameKey::new(&self.team1, &self.team2)
    }

    /// Tiles that are still rendering show placeholders. Those are kept
    /// active (never pruned) but not reconciled.
    pub fn is_incomplete(&self) -> bool {
        self.team1.trim().is_empty()
            || self.team2.trim().is_empty()
            || self.score1.trim() == "N/A"
            || self.score2.trim() == "N/A"
            || self.quarter.trim() == "NS"
            || self.clock.trim() == "--:--"
    }

    /// Convert to an `Observation`.
    ///
    /// Returns `Ok(None)` for incomplete tiles and a reconciliation error
    /// when a score is not a number.
    pub fn observe(&self, labels: &QuarterLabels) -> Result<Option<Observation>, ScraperError> {
        if self.is_incomplete() {
            return Ok(None);
        }
        let parse_score = |raw: &str| -> Result<u32, ScraperError> {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(0);
            }
            raw.parse::<u32>().map_err(|_| ScraperError::Reconciliation {
                game: self.key().to_string(),
                message: format!("score is not numeric: {raw:?}"),
            })
        };
        Ok(Some(Observation {
            first_team: self.team1.trim().to_string(),
            second_team: self.team2.trim().to_string(),
            first_team_score: parse_score(&self.score1)?,
            second_team_score: parse_score(&self.score2)?,
            quarter: Quarter::parse(&self.quarter, labels),
            time_left: self.clock.trim().to_string(),
        }))
    }
}

/// Handle on the totals table: its position among the page's market tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHandle {
    pub index: usize,
}

/// Raw cell text of one totals-table row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSnapshot {
    pub total_text: String,
    pub over_text: String,
    pub under_text: String,
}

// ---------------------------------------------------------------------------
// Market rows
// ---------------------------------------------------------------------------

/// A parsed totals-table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedRow {
    pub expected_total_score: Decimal,
    pub over_value: Decimal,
    pub under_value: Decimal,
    pub row_index: usize,
}

impl fmt::Display for SelectedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row #{}: total {} (over {} / under {})",
            self.row_index, self.expected_total_score, self.over_value, self.under_value,
        )
    }
}

// ---------------------------------------------------------------------------
// Game records
// ---------------------------------------------------------------------------

/// Opening total line recorded once per game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub first_total_score: Decimal,
    pub quarter_when_recorded: Quarter,
    pub time_left_when_recorded: String,
}

/// Tracked state of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub first_team: String,
    pub second_team: String,
    pub first_team_score: u32,
    pub second_team_score: u32,
    pub quarter: Quarter,
    pub time_left: String,
    pub baseline: Option<Baseline>,
}

impl GameRecord {
    pub fn from_observation(obs: &Observation) -> Self {
        Self {
            first_team: obs.first_team.clone(),
            second_team: obs.second_team.clone(),
            first_team_score: obs.first_team_score,
            second_team_score: obs.second_team_score,
            quarter: obs.quarter.clone(),
            time_left: obs.time_left.clone(),
            baseline: None,
        }
    }

    pub fn total_score(&self) -> u32 {
        self.first_team_score.saturating_add(self.second_team_score)
    }

    /// Overwrite live fields. Team names and baseline are left alone.
    pub fn apply(&mut self, obs: &Observation) {
        self.first_team_score = obs.first_team_score;
        self.second_team_score = obs.second_team_score;
        self.quarter = obs.quarter.clone();
        self.time_left = obs.time_left.clone();
    }

    /// Set the baseline if none is recorded. Returns false if one already was.
    pub fn record_baseline(&mut self, baseline: Baseline) -> bool {
        if self.baseline.is_some() {
            return false;
        }
        self.baseline = Some(baseline);
        true
    }

    pub fn baseline_total(&self) -> Option<Decimal> {
        self.baseline.as_ref().map(|b| b.first_total_score)
    }
}

impl fmt::Display for GameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} - {} {} ({} {})",
            self.first_team,
            self.first_team_score,
            self.second_team_score,
            self.second_team,
            self.quarter,
            self.time_left,
        )?;
        if let Some(b) = &self.baseline {
            write!(f, " baseline={}", b.first_total_score)?;
        }
        Ok(())
    }
}

/// Games of one league, by key.
pub type League = BTreeMap<GameKey, GameRecord>;

/// A game currently recommended on a qualifying totals row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedGame {
    pub league_name: String,
    pub selected_row: SelectedRow,
}

/// Immutable copy of the store handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub cycle: u64,
    pub taken_at: DateTime<Utc>,
    pub leagues: BTreeMap<String, League>,
    pub marked: BTreeMap<GameKey, MarkedGame>,
}

impl BoardSnapshot {
    pub fn empty() -> Self {
        Self {
            cycle: 0,
            taken_at: Utc::now(),
            leagues: BTreeMap::new(),
            marked: BTreeMap::new(),
        }
    }

    pub fn game_count(&self) -> usize {
        self.leagues.values().map(|l| l.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for HOOPWATCH.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScraperError {
    #[error("Stale read: {0}")]
    StaleRead(String),

    #[error("Retries exhausted after {attempts} attempts: {what}")]
    RetriesExhausted { what: String, attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reconciliation error ({game}): {message}")]
    Reconciliation { game: String, message: String },

    #[error("Automation fatal: {0}")]
    AutomationFatal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScraperError {
    /// Page raced with us; the same read may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScraperError::StaleRead(_))
    }

    /// The browser session is gone; only this class ends the poll loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScraperError::AutomationFatal(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

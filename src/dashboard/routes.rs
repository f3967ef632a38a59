//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`;
//! the poll loop publishes into it through `PresentationSink`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::engine::poller::{CycleReport, PresentationSink};
use crate::types::BoardSnapshot;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Latest published board and cycle counters.
pub struct DashboardState {
    board: watch::Sender<Arc<BoardSnapshot>>,
    last_cycle: watch::Sender<Option<CycleReport>>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new() -> Self {
        let (board, _) = watch::channel(Arc::new(BoardSnapshot::empty()));
        let (last_cycle, _) = watch::channel(None);
        Self {
            board,
            last_cycle,
            started_at: Utc::now(),
        }
    }

    pub fn board(&self) -> Arc<BoardSnapshot> {
        self.board.borrow().clone()
    }

    /// Receiver that sees every board the poll loop publishes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BoardSnapshot>> {
        self.board.subscribe()
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.borrow().clone()
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSink for DashboardState {
    fn publish(&self, board: BoardSnapshot) {
        self.board.publish(board);
    }

    fn record_cycle(&self, report: &CycleReport) {
        self.last_cycle.send_replace(Some(report.clone()));
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub cycle: u64,
    pub last_update: DateTime<Utc>,
    pub leagues: usize,
    pub games: usize,
    pub marked: usize,
    pub uptime_secs: i64,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeagueView {
    pub name: String,
    pub games: Vec<GameView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameView {
    pub game: String,
    pub score: String,
    pub total_score: u32,
    pub quarter: String,
    pub time_left: String,
    pub first_total: Option<Decimal>,
    pub marked: bool,
}

/// One line of the marked-games table.
#[derive(Debug, Clone, Serialize)]
pub struct MarkedRowView {
    pub game: String,
    pub league: String,
    pub current_score: String,
    pub first_total: Option<Decimal>,
    /// 1-based, as shown on the site.
    pub row_number: usize,
    pub row_total: Decimal,
    pub under: Decimal,
    pub over: Decimal,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let board = state.board();
    Json(StatusResponse {
        cycle: board.cycle,
        last_update: board.taken_at,
        leagues: board.leagues.len(),
        games: board.game_count(),
        marked: board.marked.len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        last_cycle: state.last_cycle(),
    })
}

/// GET /api/board
pub async fn get_board(State(state): State<AppState>) -> Json<BoardSnapshot> {
    Json(state.board().as_ref().clone())
}

/// GET /api/leagues
pub async fn get_leagues(State(state): State<AppState>) -> Json<Vec<LeagueView>> {
    let board = state.board();
    let leagues = board
        .leagues
        .iter()
        .map(|(name, games)| LeagueView {
            name: name.clone(),
            games: games
                .iter()
                .map(|(key, record)| GameView {
                    game: key.to_string(),
                    score: format!("{} - {}", record.first_team_score, record.second_team_score),
                    total_score: record.total_score(),
                    quarter: record.quarter.to_string(),
                    time_left: record.time_left.clone(),
                    first_total: record.baseline_total(),
                    marked: board.marked.contains_key(key),
                })
                .collect(),
        })
        .collect();
    Json(leagues)
}

/// GET /api/marked
pub async fn get_marked(State(state): State<AppState>) -> Json<Vec<MarkedRowView>> {
    let board = state.board();
    let rows = board
        .marked
        .iter()
        .map(|(key, mark)| {
            let record = board
                .leagues
                .get(&mark.league_name)
                .and_then(|games| games.get(key));
            let row = &mark.selected_row;
            MarkedRowView {
                game: key.to_string(),
                league: mark.league_name.clone(),
                current_score: record
                    .map(|r| format!("{} - {}", r.first_team_score, r.second_team_score))
                    .unwrap_or_default(),
                first_total: record.and_then(|r| r.baseline_total()),
                row_number: row.row_index + 1,
                row_total: row.expected_total_score,
                under: row.under_value,
                over: row.over_value,
            }
        })
        .collect();
    Json(rows)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

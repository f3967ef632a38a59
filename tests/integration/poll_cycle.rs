//! End-to-end poll cycles against the in-memory page.
//!
//! Exercises the full pipeline: scan → reconcile → baseline → mark →
//! prune → publish, using `FakePage` instead of a browser.

use rust_decimal_macros::dec;
use std::time::Duration;

use hoopwatch::engine::extractor::SelectionCriteria;
use hoopwatch::engine::poller::{PollSettings, Poller, PresentationSink, StopHandle};
use hoopwatch::engine::selector::RetryPolicy;
use hoopwatch::engine::store::BaselineTrigger;
use hoopwatch::types::*;

use crate::mock_page::{tile, FakePage, RecordingSink};

const LEAGUE: &str = "EuroLeague";
const GAME: &str = "Real Madrid vs Barcelona";

fn settings(trigger: BaselineTrigger) -> PollSettings {
    PollSettings {
        refresh_interval: Duration::from_millis(5),
        criteria: SelectionCriteria {
            point_difference: dec!(5),
            min_under_value: dec!(1.8),
        },
        retry: RetryPolicy::default(),
        trigger,
        labels: QuarterLabels::default(),
    }
}

fn poller() -> Poller {
    Poller::new(settings(BaselineTrigger::default()), StopHandle::new())
}

fn key(name: &str) -> GameKey {
    let (a, b) = name.split_once(" vs ").unwrap();
    GameKey::new(a, b)
}

/// Opening line 150, then the rows of the classic scenario.
fn opening_table(page: &FakePage, game: &str) {
    page.set_table(
        game,
        &[
            ("150", "1.9", "1.9"),
            ("154", "2.05", "1.7"),
            ("156", "1.95", "1.9"),
            ("160", "2.0", "1.85"),
        ],
    );
}

// ---------------------------------------------------------------------------
// Baseline capture
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tipoff_baseline_uses_canonical_clock() {
    let page = FakePage::new();
    let mut poller = poller();

    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00")])]);
    opening_table(&page, GAME);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.inserted, 1);
    assert!(poller.store().game(LEAGUE, &key(GAME)).unwrap().baseline.is_none());

    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "1Q", "09:59")])]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.baselines_captured, 1);

    let record = poller.store().game(LEAGUE, &key(GAME)).unwrap();
    let baseline = record.baseline.as_ref().unwrap();
    assert_eq!(baseline.first_total_score, dec!(150));
    assert_eq!(baseline.quarter_when_recorded, Quarter::Period(1));
    assert_eq!(baseline.time_left_when_recorded, "10:00");
    assert_eq!(record.quarter, Quarter::Period(1));
    assert_eq!(record.time_left, "09:59");
}

#[tokio::test]
async fn test_in_progress_game_is_baselined_and_marked_at_once() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "33", "29", "2Q", "06:40")])]);
    opening_table(&page, GAME);

    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.baselines_captured, 1);
    assert_eq!(report.marked, 1);

    let record = poller.store().game(LEAGUE, &key(GAME)).unwrap();
    assert_eq!(record.baseline_total(), Some(dec!(150)));
    assert_eq!(record.total_score(), 62);

    let mark = poller.store().marked().get(&key(GAME)).unwrap();
    assert_eq!(mark.league_name, LEAGUE);
    assert_eq!(mark.selected_row.expected_total_score, dec!(160));
    assert_eq!(mark.selected_row.under_value, dec!(1.85));
    assert_eq!(mark.selected_row.over_value, dec!(2.0));
    assert_eq!(mark.selected_row.row_index, 3);
}

#[tokio::test]
async fn test_baseline_survives_later_line_moves() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "10", "8", "1Q", "05:00")])]);
    opening_table(&page, GAME);
    poller.run_cycle(&page).await.unwrap();

    page.set_table(GAME, &[("171.5", "1.9", "1.9")]);
    for (s1, s2, q) in [("30", "25", "2Q"), ("50", "49", "3Q"), ("70", "68", "4Q")] {
        page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", s1, s2, q, "02:00")])]);
        poller.run_cycle(&page).await.unwrap();
    }

    let record = poller.store().game(LEAGUE, &key(GAME)).unwrap();
    assert_eq!(record.baseline_total(), Some(dec!(150)));
    assert_eq!(record.total_score(), 138);
    assert_eq!(record.quarter, Quarter::Period(4));
}

#[tokio::test]
async fn test_game_without_totals_market_has_no_baseline() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "12", "9", "1Q", "04:00")])]);

    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 0);
    assert!(poller.store().game(LEAGUE, &key(GAME)).unwrap().baseline.is_none());
}

// ---------------------------------------------------------------------------
// Marking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_marks_follow_the_current_table() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "20", "20", "2Q", "09:00")])]);
    opening_table(&page, GAME);
    poller.run_cycle(&page).await.unwrap();
    assert_eq!(poller.store().marked().len(), 1);

    // Line drops back toward the opening total
    page.set_table(GAME, &[("150", "1.9", "1.9"), ("153", "1.9", "1.85")]);
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "22", "20", "2Q", "08:30")])]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.marked, 0);
    assert!(poller.store().marked().is_empty());

    // And climbs again
    page.set_table(GAME, &[("150", "1.9", "1.9"), ("158", "1.9", "1.95")]);
    poller.run_cycle(&page).await.unwrap();
    let mark = poller.store().marked().get(&key(GAME)).unwrap();
    assert_eq!(mark.selected_row.expected_total_score, dec!(158));
}

#[tokio::test]
async fn test_game_on_break_keeps_state_but_not_its_mark() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "20", "20", "1Q", "01:00")])]);
    opening_table(&page, GAME);
    poller.run_cycle(&page).await.unwrap();
    assert!(poller.store().marked().contains_key(&key(GAME)));

    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "24", "22", "B1", "00:00")])]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.marked, 0);

    let record = poller.store().game(LEAGUE, &key(GAME)).unwrap();
    assert_eq!(record.total_score(), 40);
    assert_eq!(record.quarter, Quarter::Period(1));
    assert!(record.baseline.is_some());
    assert!(poller.store().marked().is_empty());

    // Back in play: the table is checked again
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "24", "22", "2Q", "09:50")])]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.marked, 1);
}

#[tokio::test]
async fn test_unreconciled_game_does_not_keep_stale_mark() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "30", "28", "2Q", "05:00")])]);
    page.set_table(GAME, &[("150", "1.9", "1.9"), ("160", "1.9", "1.85")]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.marked, 1);

    // The line drops while the tile is half-rendered
    page.set_table(GAME, &[("150", "1.9", "1.9"), ("151", "1.9", "1.85")]);
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "30", "28", "2Q", "--:--")])]);
    let sink = RecordingSink::default();
    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    sink.publish(poller.store().snapshot(report.cycle_number));

    assert_eq!(report.incomplete, 1);
    assert_eq!(report.marked, 0);
    assert!(sink.boards()[0].marked.is_empty());
    assert_eq!(sink.boards()[0].game_count(), 1);
}

// ---------------------------------------------------------------------------
// Pruning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_vanished_game_is_pruned_alone() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![
        (
            LEAGUE,
            vec![
                tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00"),
                tile("Olympiacos", "Panathinaikos", "0", "0", "ATS", "10:00"),
            ],
        ),
        ("ACB", vec![tile("Unicaja", "Valencia", "0", "0", "ATS", "10:00")]),
    ]);
    poller.run_cycle(&page).await.unwrap();
    assert_eq!(poller.store().game_count(), 3);

    page.set_board(vec![
        (LEAGUE, vec![tile("Olympiacos", "Panathinaikos", "0", "0", "ATS", "10:00")]),
        ("ACB", vec![tile("Unicaja", "Valencia", "0", "0", "ATS", "10:00")]),
    ]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();

    assert_eq!(report.pruned_games, 1);
    assert_eq!(report.pruned_leagues, 0);
    assert!(poller.store().game(LEAGUE, &key(GAME)).is_none());
    assert!(poller.store().game(LEAGUE, &key("Olympiacos vs Panathinaikos")).is_some());
    assert!(poller.store().game("ACB", &key("Unicaja vs Valencia")).is_some());
}

#[tokio::test]
async fn test_store_holds_exactly_the_scanned_games() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![
        ("ACB", vec![tile("Unicaja", "Valencia", "0", "0", "ATS", "10:00")]),
        (LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00")]),
    ]);
    poller.run_cycle(&page).await.unwrap();

    page.set_board(vec![(LEAGUE, vec![tile("Fenerbahce", "Efes", "0", "0", "ATS", "10:00")])]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();

    assert_eq!(report.pruned_games, 2);
    assert_eq!(report.pruned_leagues, 1);
    let leagues = poller.store().leagues();
    assert_eq!(leagues.len(), 1);
    let keys: Vec<_> = leagues[LEAGUE].keys().cloned().collect();
    assert_eq!(keys, vec![key("Fenerbahce vs Efes")]);
}

#[tokio::test]
async fn test_incomplete_tile_keeps_record_alive() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "15", "12", "1Q", "03:00")])]);
    poller.run_cycle(&page).await.unwrap();

    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "N/A", "12", "1Q", "--:--")])]);
    let report = poller.run_cycle(&page).await.unwrap().unwrap();

    assert_eq!(report.incomplete, 1);
    assert_eq!(report.pruned_games, 0);
    let record = poller.store().game(LEAGUE, &key(GAME)).unwrap();
    assert_eq!(record.total_score(), 27);
    assert_eq!(record.time_left, "03:00");
}

// ---------------------------------------------------------------------------
// Errors and the loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stale_listing_recovers_within_budget() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00")])]);
    page.set_stale_scans(2);

    let report = poller.run_cycle(&page).await.unwrap().unwrap();
    assert_eq!(report.games_seen, 1);
}

#[tokio::test]
async fn test_persistently_stale_listing_skips_cycle_and_keeps_state() {
    let page = FakePage::new();
    let mut poller = poller();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00")])]);
    poller.run_cycle(&page).await.unwrap();

    page.set_stale_scans(10);
    let err = poller.run_cycle(&page).await.unwrap_err();
    assert!(matches!(err, ScraperError::RetriesExhausted { .. }));
    assert_eq!(poller.store().game_count(), 1);
    assert_eq!(poller.cycle(), 1);
}

#[tokio::test]
async fn test_fatal_error_ends_run() {
    let page = FakePage::new();
    let sink = RecordingSink::default();
    let mut poller = poller();
    page.set_error(ScraperError::AutomationFatal("invalid session id".into()));

    let err = poller.run(&page, &sink).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(sink.boards().is_empty());
}

#[tokio::test]
async fn test_transient_failure_does_not_end_run() {
    let page = FakePage::new();
    let sink = RecordingSink::default();
    let mut poller = poller();
    let stop = poller.stop_handle();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00")])]);
    page.set_error(ScraperError::NotFound("basketball section".into()));

    let (result, _) = tokio::join!(poller.run(&page, &sink), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        page.clear_error();
        tokio::time::sleep(Duration::from_millis(60)).await;
        stop.stop();
    });

    assert!(result.is_ok());
    let boards = sink.boards();
    assert!(!boards.is_empty());
    assert_eq!(boards.last().unwrap().game_count(), 1);
}

#[tokio::test]
async fn test_stop_ends_run_and_boards_match_cycles() {
    let page = FakePage::new();
    let sink = RecordingSink::default();
    let mut poller = poller();
    let stop = poller.stop_handle();
    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "0", "0", "ATS", "10:00")])]);

    let (result, _) = tokio::join!(poller.run(&page, &sink), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
    });

    assert!(result.is_ok());
    let boards = sink.boards();
    let reports = sink.reports();
    assert!(!boards.is_empty());
    assert_eq!(boards.len(), reports.len());
    assert_eq!(boards.len() as u64, poller.cycle());
    for (i, board) in boards.iter().enumerate() {
        assert_eq!(board.cycle, i as u64 + 1);
    }
    assert!(page.focus_count() >= boards.len());
}

#[tokio::test]
async fn test_first_live_quarter_trigger_catches_late_games() {
    let page = FakePage::new();
    let mut poller = Poller::new(settings(BaselineTrigger::FirstLiveQuarter), StopHandle::new());

    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "40", "38", "HB", "00:00")])]);
    opening_table(&page, GAME);
    poller.run_cycle(&page).await.unwrap();
    assert!(poller.store().game(LEAGUE, &key(GAME)).unwrap().baseline.is_none());

    page.set_board(vec![(LEAGUE, vec![tile("Real Madrid", "Barcelona", "40", "38", "3Q", "09:48")])]);
    poller.run_cycle(&page).await.unwrap();
    let baseline = poller
        .store()
        .game(LEAGUE, &key(GAME))
        .unwrap()
        .baseline
        .clone()
        .unwrap();
    assert_eq!(baseline.quarter_when_recorded, Quarter::Period(3));
    assert_eq!(baseline.time_left_when_recorded, "09:48");
}

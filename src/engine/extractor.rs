//! Row extractor: turns one totals-table row into a numeric candidate.
//!
//! A row qualifies when its total line sits at least `point_difference`
//! above the game's baseline total and its "under" odd pays at least
//! `min_under_value`. Text that does not parse is reported as a stale
//! read: the cell was caught mid-render and must be fetched again.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::{RowSnapshot, SelectedRow};

/// Numeric thresholds a row must meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub point_difference: Decimal,
    pub min_under_value: Decimal,
}

/// What a single row read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Candidate(SelectedRow),
    NotQualified,
    StaleRead,
}

/// Parse a number as the site prints it ("160.5", "1,85", " 2 ").
fn parse_number(text: &str) -> Option<Decimal> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    let normalised = if t.contains('.') { t.to_string() } else { t.replace(',', ".") };
    Decimal::from_str(&normalised).ok()
}

/// Parse all three numeric cells, without applying any threshold.
pub fn parse_row(row: &RowSnapshot, row_index: usize) -> Option<SelectedRow> {
    Some(SelectedRow {
        expected_total_score: parse_number(&row.total_text)?,
        over_value: parse_number(&row.over_text)?,
        under_value: parse_number(&row.under_text)?,
        row_index,
    })
}

/// Parse a row and test it against the baseline.
pub fn extract(
    row: &RowSnapshot,
    row_index: usize,
    baseline_total: Decimal,
    criteria: &SelectionCriteria,
) -> RowOutcome {
    let Some(parsed) = parse_row(row, row_index) else {
        return RowOutcome::StaleRead;
    };

    // Negative operands come from placeholder cells and never qualify
    if baseline_total.is_sign_negative()
        || parsed.expected_total_score.is_sign_negative()
        || parsed.under_value.is_sign_negative()
    {
        return RowOutcome::NotQualified;
    }

    let clears_line = parsed.expected_total_score - criteria.point_difference >= baseline_total;
    let pays_enough = parsed.under_value >= criteria.min_under_value;

    if clears_line && pays_enough {
        RowOutcome::Candidate(parsed)
    } else {
        RowOutcome::NotQualified
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

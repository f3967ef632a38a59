//! Row selector: picks the best qualifying row of the totals table.
//!
//! Rows are read one index at a time and re-fetched on every attempt,
//! because the table re-renders while odds move. A stale read retries the
//! same index; the retry budget is bounded per row and per lookup, and an
//! exhausted budget surfaces as `RetriesExhausted` so the caller skips
//! the game this cycle.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::extractor::{extract, parse_row, RowOutcome, SelectionCriteria};
use crate::page::MarketTableAccessor;
use crate::types::{RowSnapshot, ScraperError, SelectedRow, TableHandle};

/// Tables never get this long; stops a misbehaving accessor.
const MAX_TABLE_ROWS: usize = 500;

/// Stale-read retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per individual read.
    pub per_read: u32,
    /// Retries summed over one table lookup.
    pub per_lookup: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            per_read: 3,
            per_lookup: 12,
        }
    }
}

/// Scans the totals table of the game in focus.
#[derive(Debug, Clone)]
pub struct RowSelector {
    criteria: SelectionCriteria,
    retry: RetryPolicy,
}

impl RowSelector {
    pub fn new(criteria: SelectionCriteria, retry: RetryPolicy) -> Self {
        Self { criteria, retry }
    }

    pub fn criteria(&self) -> &SelectionCriteria {
        &self.criteria
    }

    /// Best qualifying row against `baseline_total`: the one with the
    /// lowest "under" odd, earliest row on ties. `None` when no row
    /// qualifies or there is no totals table.
    pub async fn select_best(
        &self,
        page: &dyn MarketTableAccessor,
        baseline_total: Decimal,
    ) -> Result<Option<SelectedRow>, ScraperError> {
        let mut spent = 0u32;
        let Some(table) = self.locate(page, &mut spent).await? else {
            return Ok(None);
        };

        let criteria = self.criteria;
        let mut best: Option<SelectedRow> = None;
        let mut qualifying = 0usize;
        let mut rows_read = 0usize;

        for index in 0..MAX_TABLE_ROWS {
            let outcome = self
                .read_outcome(page, table, index, &mut spent, |row| {
                    extract(row, index, baseline_total, &criteria)
                })
                .await?;

            match outcome {
                // Table ended (or shrank under us)
                None => break,
                Some(RowOutcome::Candidate(row)) => {
                    qualifying += 1;
                    let better = best
                        .as_ref()
                        .map_or(true, |b| row.under_value < b.under_value);
                    if better {
                        best = Some(row);
                    }
                }
                Some(_) => {}
            }
            rows_read += 1;
        }

        debug!(
            baseline = %baseline_total,
            rows = rows_read,
            qualifying,
            selected = ?best.as_ref().map(|r| r.row_index),
            "Totals table scanned"
        );

        Ok(best)
    }

    /// The opening line: first row of the totals table, unfiltered.
    pub async fn first_row(
        &self,
        page: &dyn MarketTableAccessor,
    ) -> Result<Option<SelectedRow>, ScraperError> {
        let mut spent = 0u32;
        let Some(table) = self.locate(page, &mut spent).await? else {
            return Ok(None);
        };

        let outcome = self
            .read_outcome(page, table, 0, &mut spent, |row| match parse_row(row, 0) {
                Some(parsed) => RowOutcome::Candidate(parsed),
                None => RowOutcome::StaleRead,
            })
            .await?;

        match outcome {
            Some(RowOutcome::Candidate(row)) => Ok(Some(row)),
            _ => {
                info!("Totals table has no rows");
                Ok(None)
            }
        }
    }

    async fn locate(
        &self,
        page: &dyn MarketTableAccessor,
        spent: &mut u32,
    ) -> Result<Option<TableHandle>, ScraperError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match page.locate_total_table().await {
                Ok(Some(table)) => return Ok(Some(table)),
                Ok(None) => {
                    info!("Totals table not found on page");
                    return Ok(None);
                }
                Err(ScraperError::NotFound(what)) => {
                    info!(what = %what, "Totals table not found on page");
                    return Ok(None);
                }
                Err(e) if e.is_transient() => {
                    self.charge(spent, attempts, "totals table lookup", &e)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read and judge one row, retrying stale reads of the same index.
    /// `Ok(None)` means the index is past the end of the table.
    async fn read_outcome<F>(
        &self,
        page: &dyn MarketTableAccessor,
        table: TableHandle,
        index: usize,
        spent: &mut u32,
        judge: F,
    ) -> Result<Option<RowOutcome>, ScraperError>
    where
        F: Fn(&RowSnapshot) -> RowOutcome,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match page.read_row(table, index).await {
                Ok(None) => return Ok(None),
                Ok(Some(row)) => match judge(&row) {
                    RowOutcome::StaleRead => {
                        ScraperError::StaleRead(format!("row {index} has unreadable cells"))
                    }
                    outcome => return Ok(Some(outcome)),
                },
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };
            self.charge(spent, attempts, &format!("totals row {index}"), &err)?;
        }
    }

    /// Account for one failed attempt; error out once a budget is spent.
    fn charge(
        &self,
        spent: &mut u32,
        attempts: u32,
        what: &str,
        err: &ScraperError,
    ) -> Result<(), ScraperError> {
        *spent += 1;
        if attempts >= self.retry.per_read || *spent >= self.retry.per_lookup {
            warn!(
                what,
                attempts,
                lookup_retries = *spent,
                error = %err,
                "Stale read retries exhausted"
            );
            return Err(ScraperError::RetriesExhausted {
                what: what.to_string(),
                attempts,
            });
        }
        debug!(what, attempt = attempts, error = %err, "Stale read, retrying");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

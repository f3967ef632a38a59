//! Marked-game selector.
//!
//! A game is marked while the totals table offers a qualifying row
//! against its baseline. The decision is re-made on every evaluation;
//! nothing carries over from the previous one.

use tracing::debug;

use super::selector::RowSelector;
use crate::page::MarketTableAccessor;
use crate::types::{GameKey, GameRecord, MarkedGame, ScraperError};

#[derive(Debug, Clone)]
pub struct MarkedGameSelector {
    selector: RowSelector,
}

impl MarkedGameSelector {
    pub fn new(selector: RowSelector) -> Self {
        Self { selector }
    }

    /// Decide whether `record` is marked right now.
    ///
    /// Games without a baseline are never marked.
    pub async fn evaluate(
        &self,
        league_name: &str,
        key: &GameKey,
        record: &GameRecord,
        page: &dyn MarketTableAccessor,
    ) -> Result<Option<MarkedGame>, ScraperError> {
        let Some(baseline) = record.baseline_total() else {
            return Ok(None);
        };

        let best = self.selector.select_best(page, baseline).await?;
        match best {
            Some(row) => {
                debug!(
                    game = %key,
                    league = league_name,
                    baseline = %baseline,
                    row = %row,
                    "Marked game"
                );
                Ok(Some(MarkedGame {
                    league_name: league_name.to_string(),
                    selected_row: row,
                }))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

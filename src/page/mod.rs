//! Live betting page integration.
//!
//! Defines the traits the engine reads the page through, and provides:
//! - `webdriver`: a W3C WebDriver JSON-over-HTTP client
//! - `live`: the betting site adapter built on top of it

pub mod webdriver;
pub mod live;

use async_trait::async_trait;

use crate::types::{GameLocator, LeagueSnapshot, RowSnapshot, ScraperError, TableHandle};

/// Source of the current live-games listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Make sure the live-events view is open before scanning.
    async fn prepare(&self) -> Result<(), ScraperError>;

    /// Every league section with its game tiles, in page order.
    async fn current_leagues(&self) -> Result<Vec<LeagueSnapshot>, ScraperError>;
}

/// Access to the market tables of the game currently in focus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketTableAccessor: Send + Sync {
    /// Bring a game's markets on screen.
    async fn focus_game(&self, locator: GameLocator) -> Result<(), ScraperError>;

    /// Find the totals table and expand it if it is collapsed.
    /// `None` when the game offers no totals market.
    async fn locate_total_table(&self) -> Result<Option<TableHandle>, ScraperError>;

    /// Re-fetch row `index` of the table. `None` once past the last row.
    async fn read_row(
        &self,
        table: TableHandle,
        index: usize,
    ) -> Result<Option<RowSnapshot>, ScraperError>;
}

/// A page that can both list games and read their markets.
pub trait BettingPage: SnapshotProvider + MarketTableAccessor {}

impl<T: SnapshotProvider + MarketTableAccessor> BettingPage for T {}

//! Live betting page adapter.
//!
//! Drives the site through a `WebDriverClient`: login, keeping the
//! live-events view open, reading the league/game listing, and reading
//! the totals table of the game in focus. Every selector comes from
//! `[selectors]` in the config, so markup changes need no rebuild.
//!
//! Elements are always looked up afresh. References from an earlier call
//! may point at nodes the page has since re-rendered.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::webdriver::{ElementRef, WebDriverClient};
use super::{MarketTableAccessor, SnapshotProvider};
use crate::config::{SelectorsConfig, SiteConfig};
use crate::types::{
    GameLocator, GameSnapshot, LeagueSnapshot, RowSnapshot, ScraperError, TableHandle,
};

/// Pause after actions that trigger a page load.
const SETTLE: Duration = Duration::from_secs(3);

/// Attempts to reach the live-events view before giving up.
const NAVIGATION_ATTEMPTS: u32 = 3;

pub struct LivePage {
    driver: WebDriverClient,
    site: SiteConfig,
    selectors: SelectorsConfig,
}

impl LivePage {
    pub fn new(driver: WebDriverClient, site: SiteConfig, selectors: SelectorsConfig) -> Self {
        Self {
            driver,
            site,
            selectors,
        }
    }

    /// Log in and open the basketball live view, retrying the whole
    /// sequence on anything short of a lost session.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
        attempts: u32,
    ) -> Result<(), ScraperError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!(attempt, url = %self.site.login_url, "Logging in");
            match self.try_login(username, password).await {
                Ok(()) => {
                    info!("Logged in, live view open");
                    return Ok(());
                }
                Err(e) if e.is_fatal() || attempt >= attempts => {
                    warn!(attempt, error = %e, "Login failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Login attempt failed, retrying");
                    tokio::time::sleep(SETTLE).await;
                }
            }
        }
    }

    async fn try_login(&self, username: &str, password: &SecretString) -> Result<(), ScraperError> {
        let s = &self.selectors;
        self.driver.navigate(&self.site.login_url).await?;

        let user_field = self.first(&s.login_username).await?;
        let pass_field = self.first(&s.login_password).await?;
        let button = self.first(&s.login_button).await?;

        self.driver.send_keys(&user_field, username).await?;
        self.driver
            .send_keys(&pass_field, password.expose_secret())
            .await?;
        self.driver.click(&button).await?;
        tokio::time::sleep(SETTLE).await;

        self.driver.navigate(&self.site.basketball_url).await?;
        tokio::time::sleep(SETTLE).await;

        self.ensure_live_view().await
    }

    /// Make sure the browser shows a live event. When it does not, open
    /// the first game of the first expanded league.
    pub async fn ensure_live_view(&self) -> Result<(), ScraperError> {
        let suffix = &self.site.live_events_suffix;
        for attempt in 1..=NAVIGATION_ATTEMPTS {
            let url = self.driver.current_url().await?;
            if url.contains(suffix.as_str()) {
                return Ok(());
            }
            warn!(attempt, url = %url, expected = %suffix, "Not on the live view, navigating");
            self.open_first_game().await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let url = self.driver.current_url().await?;
        if url.contains(suffix.as_str()) {
            return Ok(());
        }
        Err(ScraperError::NotFound(format!(
            "live events view ({suffix}) after {NAVIGATION_ATTEMPTS} attempts"
        )))
    }

    async fn open_first_game(&self) -> Result<(), ScraperError> {
        let s = &self.selectors;
        for league in self.driver.find_all(&s.league_section).await? {
            let Some(header) = self.driver.find_in(&league, &s.league_header).await? else {
                continue;
            };
            if !self.has_class(&header, &s.league_expanded_class).await? {
                continue;
            }
            if let Some(link) = self.driver.find_in(&league, &s.first_game_link).await? {
                self.driver.click(&link).await?;
                return Ok(());
            }
        }
        debug!("No expanded league with a game link");
        Ok(())
    }

    /// End the browser session.
    pub async fn close(&self) -> Result<(), ScraperError> {
        self.driver.close().await
    }

    // -- Helpers ---------------------------------------------------------

    async fn first(&self, css: &str) -> Result<ElementRef, ScraperError> {
        self.driver
            .find_all(css)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScraperError::NotFound(css.to_string()))
    }

    /// Text of the first descendant matching `css`, empty if there is none.
    async fn text_in(&self, parent: &ElementRef, css: &str) -> Result<String, ScraperError> {
        match self.driver.find_in(parent, css).await? {
            Some(el) => self.driver.text(&el).await,
            None => Ok(String::new()),
        }
    }

    async fn has_class(&self, el: &ElementRef, class: &str) -> Result<bool, ScraperError> {
        let attr = self.driver.attribute(el, "class").await?;
        Ok(attr.map_or(false, |a| class_list_contains(&a, class)))
    }

    async fn league_sections(&self) -> Result<Vec<ElementRef>, ScraperError> {
        let s = &self.selectors;
        let section = self
            .driver
            .find_all(&s.basketball_section)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScraperError::NotFound("basketball section".to_string()))?;
        self.driver.find_all_in(&section, &s.league_section).await
    }

    /// Expand league `target` and collapse the others, so its tiles take
    /// clicks. The listing scan leaves only the last league open.
    async fn open_league(&self, leagues: &[ElementRef], target: usize) -> Result<(), ScraperError> {
        let s = &self.selectors;
        if let Some(league) = leagues.get(target) {
            if let Some(header) = self.driver.find_in(league, &s.league_header).await? {
                if self.has_class(&header, &s.league_expanded_class).await? {
                    return Ok(());
                }
            }
        }

        for (league_index, league) in leagues.iter().enumerate() {
            let Some(header) = self.driver.find_in(league, &s.league_header).await? else {
                continue;
            };
            let expand = league_index == target;
            if self.has_class(&header, &s.league_expanded_class).await? != expand {
                debug!(league_index, expand, "Toggling league");
                self.driver.click(&header).await?;
            }
        }
        Ok(())
    }

    async fn read_tile(
        &self,
        tile: &ElementRef,
        locator: GameLocator,
    ) -> Result<GameSnapshot, ScraperError> {
        let s = &self.selectors;
        let mut scores = Vec::new();
        for cell in self.driver.find_all_in(tile, &s.score_cell).await? {
            scores.push(self.driver.text(&cell).await?);
        }
        let (score1, score2) = score_pair(scores);

        Ok(GameSnapshot {
            team1: self.text_in(tile, &s.first_team_name).await?,
            team2: self.text_in(tile, &s.second_team_name).await?,
            score1,
            score2,
            quarter: self.text_in(tile, &s.quarter_cell).await?,
            clock: self.text_in(tile, &s.clock_cell).await?,
            locator,
        })
    }
}

#[async_trait]
impl SnapshotProvider for LivePage {
    async fn prepare(&self) -> Result<(), ScraperError> {
        self.ensure_live_view().await
    }

    async fn current_leagues(&self) -> Result<Vec<LeagueSnapshot>, ScraperError> {
        let s = &self.selectors;
        let mut out = Vec::new();
        let mut previous_header: Option<ElementRef> = None;

        for (league_index, league) in self.league_sections().await?.iter().enumerate() {
            let Some(header) = self.driver.find_in(league, &s.league_header).await? else {
                debug!(league_index, "League without header, skipping");
                continue;
            };
            let name = self.driver.text(&header).await?;

            // One league open at a time keeps the listing short
            if let Some(prev) = previous_header.take() {
                if self.has_class(&prev, &s.league_expanded_class).await? {
                    self.driver.click(&prev).await?;
                }
            }
            if !self.has_class(&header, &s.league_expanded_class).await? {
                self.driver.click(&header).await?;
            }

            let mut games = Vec::new();
            let tiles = self.driver.find_all_in(league, &s.game_tile).await?;
            for (game_index, tile) in tiles.iter().enumerate() {
                let locator = GameLocator {
                    league_index,
                    game_index,
                };
                games.push(self.read_tile(tile, locator).await?);
            }

            debug!(league = %name, games = games.len(), "League read");
            out.push(LeagueSnapshot { name, games });
            previous_header = Some(header);
        }

        Ok(out)
    }
}

#[async_trait]
impl MarketTableAccessor for LivePage {
    async fn focus_game(&self, locator: GameLocator) -> Result<(), ScraperError> {
        let s = &self.selectors;
        let leagues = self.league_sections().await?;
        let league = leagues.get(locator.league_index).ok_or_else(|| {
            ScraperError::StaleRead(format!("league #{} is gone", locator.league_index))
        })?;
        self.open_league(&leagues, locator.league_index).await?;
        let tiles = self.driver.find_all_in(league, &s.game_tile).await?;
        let tile = tiles.get(locator.game_index).ok_or_else(|| {
            ScraperError::StaleRead(format!(
                "game #{} of league #{} is gone",
                locator.game_index, locator.league_index
            ))
        })?;
        self.driver.click(tile).await
    }

    async fn locate_total_table(&self) -> Result<Option<TableHandle>, ScraperError> {
        let s = &self.selectors;
        let tables = self.driver.find_all(&s.market_table).await?;
        for (index, table) in tables.iter().enumerate() {
            let header = self.text_in(table, &s.table_header_text).await?;
            if !is_totals_header(&header, &s.totals_header_label) {
                continue;
            }
            if !self.has_class(table, &s.table_expanded_class).await? {
                debug!(index, "Expanding totals table");
                self.driver.click(table).await?;
            }
            return Ok(Some(TableHandle { index }));
        }
        Ok(None)
    }

    async fn read_row(
        &self,
        table: TableHandle,
        index: usize,
    ) -> Result<Option<RowSnapshot>, ScraperError> {
        let s = &self.selectors;
        let tables = self.driver.find_all(&s.market_table).await?;
        let table_el = tables
            .get(table.index)
            .ok_or_else(|| ScraperError::StaleRead("totals table re-rendered".to_string()))?;

        let rows = self.driver.find_all_in(table_el, &s.table_row).await?;
        let Some(row) = rows.get(index) else {
            return Ok(None);
        };

        let total_text = self.text_in(row, &s.row_total).await?;
        let mut odds = Vec::new();
        for cell in self.driver.find_all_in(row, &s.row_odds).await? {
            odds.push(self.driver.text(&cell).await?);
        }
        let mut odds = odds.into_iter();

        Ok(Some(RowSnapshot {
            total_text,
            over_text: odds.next().unwrap_or_default(),
            under_text: odds.next().unwrap_or_default(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Whether a `class` attribute value lists `class`.
fn class_list_contains(attr: &str, class: &str) -> bool {
    attr.split_whitespace().any(|c| c == class)
}

fn is_totals_header(text: &str, label: &str) -> bool {
    !label.is_empty() && text.trim().contains(label)
}

/// Home and away score; a tile without both cells reads as 0 - 0.
fn score_pair(cells: Vec<String>) -> (String, String) {
    let mut cells = cells.into_iter();
    match (cells.next(), cells.next()) {
        (Some(first), Some(second)) => (first, second),
        _ => ("0".to_string(), "0".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

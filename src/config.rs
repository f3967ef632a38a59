//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Site credentials are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::extractor::SelectionCriteria;
use crate::engine::poller::PollSettings;
use crate::engine::selector::RetryPolicy;
use crate::engine::store::BaselineTrigger;
use crate::types::QuarterLabels;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub poller: PollerConfig,
    pub selection: SelectionConfig,
    #[serde(default)]
    pub quarters: QuarterLabels,
    pub site: SiteConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    pub selectors: SelectorsConfig,
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    /// Pause between two poll cycles. Fractions of a second are allowed.
    pub refresh_interval_secs: f64,
    /// Attempts per stale read (one row, one game, one page scan).
    pub max_retry_count: u32,
    /// Hard cap on stale-read retries within one table lookup.
    /// Defaults to four times `max_retry_count`.
    #[serde(default)]
    pub max_total_retries: Option<u32>,
    #[serde(default)]
    pub baseline_trigger: BaselineTrigger,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    /// Minimum margin of a row's total line over the baseline.
    pub point_difference: Decimal,
    /// Minimum "under" odd for a row to qualify.
    pub min_under_value: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub login_url: String,
    pub basketball_url: String,
    /// URL fragment present while the live-events view is open.
    pub live_events_suffix: String,
    pub username_env: String,
    pub password_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub args: Vec<String>,
    /// Attach to an existing session instead of creating one.
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_browser() -> String {
    "chrome".to_string()
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            browser: default_browser(),
            headless: false,
            args: Vec::new(),
            session_id: None,
        }
    }
}

/// CSS selectors and labels of the betting site's markup.
#[derive(Debug, Deserialize, Clone)]
pub struct SelectorsConfig {
    pub login_username: String,
    pub login_password: String,
    pub login_button: String,
    pub first_game_link: String,

    pub basketball_section: String,
    pub league_section: String,
    pub league_header: String,
    /// Class present on a league header once its games are shown.
    pub league_expanded_class: String,
    pub game_tile: String,
    pub first_team_name: String,
    pub second_team_name: String,
    pub score_cell: String,
    pub quarter_cell: String,
    pub clock_cell: String,

    pub market_table: String,
    pub table_header_text: String,
    /// Header label identifying the totals table.
    pub totals_header_label: String,
    /// Class present on a market table once its rows are shown.
    pub table_expanded_class: String,
    pub table_row: String,
    pub row_total: String,
    /// Odds cells; the first is "over", the second "under".
    pub row_odds: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Rolling log file written next to the console output.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file_enabled")]
    pub file_enabled: bool,
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Prefix of the log files; the rotation date is appended.
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Rotated files kept on disk, the current one included.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

fn default_log_file_enabled() -> bool {
    true
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_file_name() -> String {
    "hoopwatch.log".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: default_log_file_enabled(),
            directory: default_log_directory(),
            file_name: default_log_file_name(),
            rotation: LogRotation::default(),
            max_files: default_max_log_files(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the poller cannot run with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.poller;
        if !p.refresh_interval_secs.is_finite() || p.refresh_interval_secs <= 0.0 {
            bail!("poller.refresh_interval_secs must be positive, got {}", p.refresh_interval_secs);
        }
        if p.max_retry_count == 0 {
            bail!("poller.max_retry_count must be at least 1");
        }
        if matches!(p.max_total_retries, Some(cap) if cap < p.max_retry_count) {
            bail!("poller.max_total_retries must not be below poller.max_retry_count");
        }
        if self.selection.point_difference.is_sign_negative() {
            bail!("selection.point_difference must not be negative");
        }
        if self.selection.min_under_value.is_sign_negative() {
            bail!("selection.min_under_value must not be negative");
        }
        let log = &self.logging;
        if log.file_enabled && (log.file_name.trim().is_empty() || log.max_files == 0) {
            bail!("logging.file_name must be set and logging.max_files at least 1");
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn poll_settings(&self) -> PollSettings {
        let retries = self.poller.max_retry_count;
        PollSettings {
            refresh_interval: Duration::from_secs_f64(self.poller.refresh_interval_secs),
            criteria: SelectionCriteria {
                point_difference: self.selection.point_difference,
                min_under_value: self.selection.min_under_value,
            },
            retry: RetryPolicy {
                per_read: retries,
                per_lookup: self.poller.max_total_retries.unwrap_or(retries * 4),
            },
            trigger: self.poller.baseline_trigger,
            labels: self.quarters.clone(),
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Site credentials, resolved from the environment.
    pub fn credentials(&self) -> Result<(String, SecretString)> {
        let username = Self::resolve_env(&self.site.username_env)?;
        let password = Self::resolve_env(&self.site.password_env)?;
        Ok((username, SecretString::new(password)))
    }
}

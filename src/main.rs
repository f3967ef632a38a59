//! HOOPWATCH: live basketball totals poller.
//!
//! Entry point: loads config, initialises logging, opens the browser
//! session, and runs the poll loop until Ctrl+C or a lost session.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use hoopwatch::config;
use hoopwatch::logging;
use hoopwatch::dashboard::{self, DashboardState};
use hoopwatch::engine::poller::{Poller, StopHandle};
use hoopwatch::page::live::LivePage;
use hoopwatch::page::webdriver::WebDriverClient;

const BANNER: &str = r#"
 _   _  ___   ___  ______        ___  _____ ____ _   _
| | | |/ _ \ / _ \|  _ \ \      / / \|_   _/ ___| | | |
| |_| | | | | | | | |_) \ \ /\ / / _ \ | || |   | |_| |
|  _  | |_| | |_| |  __/ \ V  V / ___ \| || |___|  _  |
|_| |_|\___/ \___/|_|     \_/\_/_/   \_\_| \____|_| |_|

  Live basketball totals poller
  v0.1.0: recommendations only
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let config_path =
        std::env::var("HOOPWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    // Initialise structured logging; the guard flushes the log file on exit
    let _log_guard = logging::init(&cfg.logging)?;

    // Print startup banner
    println!("{BANNER}");
    info!(
        config = %config_path,
        refresh_interval_secs = cfg.poller.refresh_interval_secs,
        point_difference = %cfg.selection.point_difference,
        min_under_value = %cfg.selection.min_under_value,
        baseline_trigger = ?cfg.poller.baseline_trigger,
        "HOOPWATCH starting up"
    );

    let (username, password) = cfg.credentials()?;

    // -- Browser session -------------------------------------------------

    let driver = WebDriverClient::connect(&cfg.webdriver)
        .await
        .with_context(|| format!("Failed to open WebDriver session at {}", cfg.webdriver.url))?;
    let page = LivePage::new(driver, cfg.site.clone(), cfg.selectors.clone());

    if let Err(e) = page
        .login(&username, &password, cfg.poller.max_retry_count)
        .await
    {
        close_session(&page).await;
        return Err(e).context("Login failed");
    }

    // -- Dashboard -------------------------------------------------------

    let state = Arc::new(DashboardState::new());
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let stop = StopHandle::new();
    let mut poller = Poller::new(cfg.poll_settings(), stop.clone());

    info!(
        interval_secs = cfg.poller.refresh_interval_secs,
        "Entering poll loop. Press Ctrl+C to stop."
    );

    let result = {
        let run = poller.run(&page, state.as_ref());
        tokio::pin!(run);
        let mut shutdown_requested = false;

        loop {
            tokio::select! {
                res = &mut run => break res,
                _ = tokio::signal::ctrl_c(), if !shutdown_requested => {
                    info!("Shutdown signal received.");
                    stop.stop();
                    shutdown_requested = true;
                }
            }
        }
    };

    close_session(&page).await;

    match result {
        Ok(()) => {
            let board = state.board();
            info!(
                cycles = poller.cycle(),
                games = board.game_count(),
                marked = board.marked.len(),
                "HOOPWATCH shut down cleanly."
            );
            Ok(())
        }
        Err(e) => {
            error!(cycles = poller.cycle(), error = %e, "Poll loop ended with a fatal error");
            Err(e).context("Browser automation failed")
        }
    }
}

async fn close_session(page: &LivePage) {
    if let Err(e) = page.close().await {
        warn!(error = %e, "Failed to close WebDriver session");
    }
}

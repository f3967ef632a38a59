//! Minimal W3C WebDriver client over HTTP.
//!
//! Talks to a running driver (chromedriver, geckodriver) using the JSON
//! wire format of the W3C WebDriver protocol. Only the commands the live page adapter
//! needs are implemented.
//!
//! Driver errors are mapped onto `ScraperError`: DOM races become
//! `StaleRead`, a lost session or window becomes `AutomationFatal`, and
//! everything else is `NotFound`.

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::WebDriverConfig;
use crate::types::ScraperError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Opaque reference to a DOM element inside the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a W3C error code onto the scraper's error classes.
pub fn classify_error(code: &str, message: &str) -> ScraperError {
    let detail = if message.is_empty() {
        code.to_string()
    } else {
        format!("{code}: {message}")
    };
    match code {
        "stale element reference"
        | "element click intercepted"
        | "element not interactable"
        | "no such element"
        | "timeout" => ScraperError::StaleRead(detail),
        "invalid session id" | "no such window" | "session not created" => {
            ScraperError::AutomationFatal(detail)
        }
        _ => ScraperError::NotFound(detail),
    }
}

/// Extract element references from a `find elements` result.
fn element_refs(value: &Value) -> Result<Vec<ElementRef>, ScraperError> {
    let items = value
        .as_array()
        .ok_or_else(|| ScraperError::NotFound(format!("expected element list, got {value}")))?;
    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| ElementRef(id.to_string()))
                .ok_or_else(|| ScraperError::NotFound(format!("malformed element reference: {item}")))
        })
        .collect()
}

/// Capabilities payload for a new session.
fn capabilities(cfg: &WebDriverConfig) -> Value {
    let mut args = cfg.args.clone();
    if cfg.headless && !args.iter().any(|a| a.starts_with("--headless")) {
        args.push("--headless=new".to_string());
    }
    let options_key = match cfg.browser.as_str() {
        "firefox" => "moz:firefoxOptions",
        "edge" | "MicrosoftEdge" => "ms:edgeOptions",
        _ => "goog:chromeOptions",
    };
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": cfg.browser,
                options_key: { "args": args }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One WebDriver session.
pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Create a session, or attach to `cfg.session_id` when set.
    pub async fn connect(cfg: &WebDriverConfig) -> Result<Self, ScraperError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ScraperError::AutomationFatal(format!("HTTP client: {e}")))?;
        let base_url = cfg.url.trim_end_matches('/').to_string();

        if let Some(session_id) = &cfg.session_id {
            info!(session = %session_id, "Attaching to existing WebDriver session");
            return Ok(Self::attach(http, base_url, session_id.clone()));
        }

        let mut client = Self::attach(http, base_url, String::new());
        let value = client
            .raw(Method::POST, format!("{}/session", client.base_url), Some(capabilities(cfg)))
            .await?;
        let session: NewSession = serde_json::from_value(value)
            .map_err(|e| ScraperError::AutomationFatal(format!("new session response: {e}")))?;

        info!(session = %session.session_id, browser = %cfg.browser, "WebDriver session created");
        client.session_id = session.session_id;
        Ok(client)
    }

    fn attach(http: Client, base_url: String, session_id: String) -> Self {
        Self {
            http,
            base_url,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // -- Navigation ------------------------------------------------------

    pub async fn navigate(&self, url: &str) -> Result<(), ScraperError> {
        debug!(url, "Navigating");
        self.command(Method::POST, "url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, ScraperError> {
        let value = self.command(Method::GET, "url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    // -- Elements --------------------------------------------------------

    /// All elements matching a CSS selector, in document order.
    pub async fn find_all(&self, css: &str) -> Result<Vec<ElementRef>, ScraperError> {
        let value = self
            .command(Method::POST, "elements", Some(by_css(css)))
            .await?;
        element_refs(&value)
    }

    /// All descendants of `parent` matching a CSS selector.
    pub async fn find_all_in(
        &self,
        parent: &ElementRef,
        css: &str,
    ) -> Result<Vec<ElementRef>, ScraperError> {
        let path = format!("element/{}/elements", urlencoding::encode(parent.id()));
        let value = self.command(Method::POST, &path, Some(by_css(css))).await?;
        element_refs(&value)
    }

    /// First descendant of `parent` matching a CSS selector.
    pub async fn find_in(
        &self,
        parent: &ElementRef,
        css: &str,
    ) -> Result<Option<ElementRef>, ScraperError> {
        Ok(self.find_all_in(parent, css).await?.into_iter().next())
    }

    pub async fn text(&self, element: &ElementRef) -> Result<String, ScraperError> {
        let path = format!("element/{}/text", urlencoding::encode(element.id()));
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().unwrap_or_default().trim().to_string())
    }

    /// Attribute value, `None` when the attribute is absent.
    pub async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, ScraperError> {
        let path = format!(
            "element/{}/attribute/{}",
            urlencoding::encode(element.id()),
            urlencoding::encode(name)
        );
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn click(&self, element: &ElementRef) -> Result<(), ScraperError> {
        let path = format!("element/{}/click", urlencoding::encode(element.id()));
        self.command(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), ScraperError> {
        let path = format!("element/{}/value", urlencoding::encode(element.id()));
        self.command(Method::POST, &path, Some(json!({ "text": text })))
            .await?;
        Ok(())
    }

    /// End the session. The browser window closes with it.
    pub async fn close(&self) -> Result<(), ScraperError> {
        let url = self.session_url("");
        self.raw(Method::DELETE, url, None).await?;
        info!(session = %self.session_id, "WebDriver session closed");
        Ok(())
    }

    // -- Transport -------------------------------------------------------

    fn session_url(&self, path: &str) -> String {
        let base = format!(
            "{}/session/{}",
            self.base_url,
            urlencoding::encode(&self.session_id)
        );
        if path.is_empty() {
            base
        } else {
            format!("{base}/{path}")
        }
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ScraperError> {
        let url = self.session_url(path);
        self.raw(method, url, body).await
    }

    async fn raw(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value, ScraperError> {
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let resp = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "WebDriver unreachable");
            ScraperError::AutomationFatal(format!("WebDriver request failed: {e}"))
        })?;

        let status = resp.status();
        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| ScraperError::AutomationFatal(format!("WebDriver response: {e}")))?;

        if status.is_success() {
            return Ok(wire.value);
        }

        match serde_json::from_value::<WireError>(wire.value) {
            Ok(err) => Err(classify_error(&err.error, &err.message)),
            Err(_) => Err(ScraperError::NotFound(format!("WebDriver error {status}"))),
        }
    }
}

fn by_css(css: &str) -> Value {
    json!({ "using": "css selector", "value": css })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Page source backed by a W3C WebDriver endpoint (chromedriver, geckodriver).
//!
//! Only the handful of commands the walker needs are implemented: navigate,
//! refresh, find element, click, enabled state and script execution.

use crate::source::{PageSnapshot, PageSource, SourceError};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// JSON key identifying a web element reference.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Wire errors that mean the element is not usable yet.
const TRANSIENT_ERRORS: [&str; 4] = [
    "no such element",
    "stale element reference",
    "element not interactable",
    "element click intercepted",
];

/// Collects the text of every cell in each matched row, or null when no row matches.
const ROWS_SCRIPT: &str = r#"
const rows = document.querySelectorAll(arguments[0]);
if (rows.length === 0) { return null; }
return Array.from(rows).map(row =>
    Array.from(row.querySelectorAll('td')).map(cell => cell.textContent.trim()));
"#;

const SCROLL_SCRIPT: &str = "arguments[0].scrollIntoView(true);";

#[derive(Debug, Deserialize)]
struct WireResponse {
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

pub struct WebDriverSource {
    http_client: reqwest::Client,
    base_url: String,
    session_id: Option<String>,
}

impl WebDriverSource {
    /// Start a new browser session.
    pub async fn connect(webdriver_url: &str, headless: bool) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(120))
            .connect_timeout(StdDuration::from_secs(10))
            .build()?;

        let mut args = vec!["--disable-gpu", "--no-sandbox", "--window-size=1920,1080"];
        if headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let mut source = Self {
            http_client,
            base_url: webdriver_url.trim_end_matches('/').to_string(),
            session_id: None,
        };
        let value = source
            .send(Method::POST, "session".to_string(), Some(capabilities))
            .await?;
        let session: NewSession = serde_json::from_value(value)
            .map_err(|e| SourceError::Session(format!("unexpected new-session response: {e}")))?;

        info!(session_id = %session.session_id, "Browser session started");
        source.session_id = Some(session.session_id);
        Ok(source)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn session_path(&self, command: &str) -> Result<String, SourceError> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| SourceError::Session("browser session already closed".to_string()))?;
        if command.is_empty() {
            Ok(format!("session/{id}"))
        } else {
            Ok(format!("session/{id}/{command}"))
        }
    }

    async fn send(&self, method: Method, path: String, body: Option<Value>) -> Result<Value, SourceError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.http_client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let wire: WireResponse = response.json().await?;

        if status.is_success() {
            return Ok(wire.value);
        }
        match serde_json::from_value::<WireError>(wire.value) {
            Ok(err) if TRANSIENT_ERRORS.contains(&err.error.as_str()) => {
                debug!(error = %err.error, message = %err.message, "Element not usable");
                Err(SourceError::missing(err.message))
            }
            Ok(err) => Err(SourceError::Session(format!("{}: {}", err.error, err.message))),
            Err(_) => Err(SourceError::Session(format!("driver returned {status}"))),
        }
    }

    async fn command(&self, method: Method, command: &str, body: Value) -> Result<Value, SourceError> {
        let path = self.session_path(command)?;
        let body = if method == Method::GET { None } else { Some(body) };
        self.send(method, path, body).await
    }

    async fn find_element(&self, selector: &str) -> Result<String, SourceError> {
        let value = self
            .command(
                Method::POST,
                "element",
                json!({ "using": "css selector", "value": selector }),
            )
            .await
            .map_err(|e| match e {
                SourceError::ElementMissing { .. } => SourceError::missing(selector),
                other => other,
            })?;

        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::missing(selector))
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value, SourceError> {
        self.command(
            Method::POST,
            "execute/sync",
            json!({ "script": script, "args": args }),
        )
        .await
    }
}

#[async_trait]
impl PageSource for WebDriverSource {
    async fn open(&mut self, url: &str) -> Result<(), SourceError> {
        self.command(Method::POST, "url", json!({ "url": url }))
            .await
            .map_err(|e| SourceError::Navigation(format!("{url}: {e}")))?;
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), SourceError> {
        self.command(Method::POST, "refresh", json!({}))
            .await
            .map_err(|e| SourceError::Navigation(format!("refresh: {e}")))?;
        debug!("Page refreshed");
        Ok(())
    }

    async fn snapshot(&mut self, rows_selector: &str) -> Result<PageSnapshot, SourceError> {
        let value = self.execute(ROWS_SCRIPT, json!([rows_selector])).await?;
        let rows: Option<Vec<Vec<String>>> = serde_json::from_value(value)
            .map_err(|e| SourceError::Session(format!("unexpected table payload: {e}")))?;
        Ok(PageSnapshot { rows })
    }

    async fn click(&mut self, selector: &str) -> Result<(), SourceError> {
        let element = self.find_element(selector).await?;
        let reference = json!({ ELEMENT_KEY: element });
        self.execute(SCROLL_SCRIPT, json!([reference])).await?;
        self.command(Method::POST, &format!("element/{element}/click"), json!({}))
            .await
            .map_err(|e| match e {
                SourceError::ElementMissing { .. } => SourceError::missing(selector),
                other => other,
            })?;
        Ok(())
    }

    async fn is_enabled(&mut self, selector: &str) -> Result<bool, SourceError> {
        let element = match self.find_element(selector).await {
            Ok(element) => element,
            Err(SourceError::ElementMissing { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        let value = self
            .command(Method::GET, &format!("element/{element}/enabled"), Value::Null)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if self.session_id.is_none() {
            return Ok(());
        }
        let path = self.session_path("")?;
        self.session_id = None;
        self.send(Method::DELETE, path, None).await?;
        info!("Browser session closed");
        Ok(())
    }
}

impl Drop for WebDriverSource {
    fn drop(&mut self) {
        let Some(id) = self.session_id.take() else {
            return;
        };
        // Best effort: the runtime may already be gone.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %id, "Browser session leaked, no runtime to close it");
            return;
        };
        let url = format!("{}/session/{}", self.base_url, id);
        let client = self.http_client.clone();
        handle.spawn(async move {
            if let Err(e) = client.delete(&url).send().await {
                warn!(session_id = %id, error = %e, "Failed to close browser session");
            }
        });
    }
}

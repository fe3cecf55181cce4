//! WebDriver-backed sessions (chromedriver via fantoccini).
//!
//! Sessions are created with `pageLoadStrategy: none` so `goto` returns at
//! once; completion is then decided by polling the page's own readiness
//! state until the requested [`WaitCondition`] holds.

use std::time::{Duration, Instant};

use fantoccini::wd::WebDriverCompatibleCommand;
use fantoccini::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::scripts::READINESS_JS;
use super::{
    BrowserError, BrowserSession, DeviceProfile, NavigationOutcome, PageScript, SessionFactory,
    WaitCondition,
};
use crate::config::ProbeConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long the resource count must stay flat before the network counts as idle.
const QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Opens a fresh chromedriver session per call.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    webdriver_url: String,
    chrome_binary: Option<String>,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            webdriver_url: config.webdriver_url.clone(),
            chrome_binary: config.chrome_binary.clone(),
            headless: config.headless,
        }
    }

    fn capabilities(&self, profile: &DeviceProfile) -> serde_json::Map<String, Value> {
        let mut args = vec!["--no-sandbox".to_string()];
        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
        }
        args.push(format!("--window-size={},{}", profile.width, profile.height));
        args.push(format!("--user-agent={}", profile.user_agent));

        let mut chrome_opts = serde_json::Map::new();
        chrome_opts.insert("args".to_string(), json!(args));
        if let Some(binary) = &self.chrome_binary {
            chrome_opts.insert("binary".to_string(), json!(binary));
        }

        let mut caps = serde_json::Map::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("pageLoadStrategy".to_string(), json!("none"));
        caps.insert("goog:chromeOptions".to_string(), Value::Object(chrome_opts));
        caps
    }
}

#[async_trait::async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self, profile: &DeviceProfile) -> Result<Box<dyn BrowserSession>, BrowserError> {
        debug!(webdriver = %self.webdriver_url, profile = %profile.name, "Opening browser session");

        let client = ClientBuilder::rustls()
            .capabilities(self.capabilities(profile))
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;

        // Window-size flags are ignored by some drivers; best effort.
        if let Err(e) = client.set_window_size(profile.width, profile.height).await {
            debug!(error = %e, "Could not set window size");
        }

        Ok(Box::new(WebDriverSession { client }))
    }
}

pub struct WebDriverSession {
    client: Client,
}

/// A Chrome DevTools call tunnelled through chromedriver's `goog/cdp/execute`.
#[derive(Debug)]
struct CdpCommand {
    method: &'static str,
    params: Value,
}

impl WebDriverCompatibleCommand for CdpCommand {
    fn endpoint(
        &self,
        base_url: &url::Url,
        session_id: Option<&str>,
    ) -> Result<url::Url, url::ParseError> {
        base_url
            .join(&format!("session/{}/", session_id.unwrap_or_default()))?
            .join("goog/cdp/execute")
    }

    fn method_and_body(&self, _request_url: &url::Url) -> (http::Method, Option<String>) {
        let body = json!({ "cmd": self.method, "params": self.params });
        (http::Method::POST, Some(body.to_string()))
    }
}

/// Wrap a page-script body so it can run as a top-level expression.
fn as_expression(script: &PageScript) -> String {
    format!("(function () {{\n{}\n}})();", script.source())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Readiness {
    href: String,
    ready_state: String,
    resources: u64,
    status: u16,
}

impl WebDriverSession {
    async fn readiness(&self) -> Option<Readiness> {
        // Scripts can fail while the old document is being torn down; treat as "not yet".
        let value = self.client.execute(READINESS_JS, vec![]).await.ok()?;
        serde_json::from_value(value).ok()
    }

    async fn wait_until(&self, url: &str, wait: WaitCondition) -> Result<NavigationOutcome, BrowserError> {
        let mut last_count: Option<u64> = None;
        let mut stable_since = Instant::now();

        loop {
            if let Some(state) = self.readiness().await {
                if state.href.starts_with("chrome-error://") {
                    return Err(BrowserError::Navigation {
                        url: url.to_string(),
                        reason: "browser could not load the page".to_string(),
                    });
                }

                if state.href != "about:blank" {
                    let done = match wait {
                        WaitCondition::DomReady => state.ready_state != "loading",
                        WaitCondition::NetworkIdle => {
                            if last_count != Some(state.resources) {
                                last_count = Some(state.resources);
                                stable_since = Instant::now();
                            }
                            state.ready_state == "complete" && stable_since.elapsed() >= QUIET_WINDOW
                        }
                    };

                    if done {
                        return Ok(NavigationOutcome {
                            http_status: (state.status > 0).then_some(state.status),
                            final_url: Some(state.href),
                        });
                    }
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait::async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitCondition,
        timeout: Duration,
    ) -> Result<NavigationOutcome, BrowserError> {
        let attempt = async {
            self.client
                .goto(url)
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            self.wait_until(url, wait).await
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn preload(&mut self, script: &PageScript) -> Result<(), BrowserError> {
        self.client
            .issue_cmd(CdpCommand {
                method: "Page.addScriptToEvaluateOnNewDocument",
                params: json!({ "source": as_expression(script) }),
            })
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Script {
                script: script.name(),
                reason: e.to_string(),
            })
    }

    async fn evaluate(&mut self, script: &PageScript) -> Result<Value, BrowserError> {
        self.client
            .execute(&script.source(), vec![])
            .await
            .map_err(|e| BrowserError::Script {
                script: script.name(),
                reason: e.to_string(),
            })
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        self.client
            .screenshot()
            .await
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.client.close().await.map_err(|e| {
            warn!(error = %e, "Browser session did not close cleanly");
            BrowserError::Session(e.to_string())
        })
    }
}

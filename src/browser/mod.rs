//! Browser sessions used by the probe.
//!
//! A [`SessionFactory`] hands out one isolated [`BrowserSession`] per call.
//! The probe owns each session exclusively and closes it before the run ends.

pub mod scripts;
pub mod webdriver;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::scripts::PageScript;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to start browser session: {0}")]
    Session(String),
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("script {script} failed: {reason}")]
    Script { script: &'static str, reason: String },
    #[error("screenshot failed: {0}")]
    Screenshot(String),
}

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// Document complete and no new resource requests for a quiet window.
    NetworkIdle,
    /// DOM parsed (`readyState` past `loading`).
    DomReady,
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::NetworkIdle => write!(f, "network-idle"),
            WaitCondition::DomReady => write!(f, "dom-ready"),
        }
    }
}

/// Viewport and user agent a session emulates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub user_agent: String,
}

impl DeviceProfile {
    pub fn desktop() -> Self {
        Self {
            name: "desktop".to_string(),
            width: 1920,
            height: 1080,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
        }
    }

    pub fn mobile() -> Self {
        Self {
            name: "mobile".to_string(),
            width: 375,
            height: 812,
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) \
                         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 \
                         Mobile/15E148 Safari/604.1"
                .to_string(),
        }
    }
}

/// What the browser reports once a navigation has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationOutcome {
    /// Main document status, when the browser exposes it.
    pub http_status: Option<u16>,
    /// URL after redirects.
    pub final_url: Option<String>,
}

/// One isolated browsing context.
#[async_trait::async_trait]
pub trait BrowserSession: Send {
    /// Load `url`, returning once `wait` is satisfied or failing after `timeout`.
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitCondition,
        timeout: Duration,
    ) -> Result<NavigationOutcome, BrowserError>;

    /// Register `script` to run in every document this session loads from now
    /// on, before any of the page's own scripts.
    async fn preload(&mut self, script: &PageScript) -> Result<(), BrowserError>;

    /// Run one of the known page scripts and return its JSON result.
    async fn evaluate(&mut self, script: &PageScript) -> Result<serde_json::Value, BrowserError>;

    /// PNG of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    /// Tear the session down.
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, profile: &DeviceProfile) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

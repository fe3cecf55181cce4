//! Shared fixtures: a scripted in-memory browser and temporary SQLite stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use funnelwatch::browser::{
    BrowserError, BrowserSession, DeviceProfile, NavigationOutcome, PageScript, SessionFactory,
    WaitCondition,
};
use funnelwatch::config::{AppConfig, ProbeConfig};
use funnelwatch::storage::sqlite::SqliteStore;
use funnelwatch::storage::{NewSite, RecordStore};
use funnelwatch::Services;
use serde_json::{json, Value};
use tempfile::TempDir;

/// What every session opened by a [`FakeBrowser`] does.
#[derive(Debug, Clone, Default)]
pub struct PageScriptResults {
    /// Navigation fails on every attempt.
    pub unreachable: bool,
    /// Navigation fails only in mobile sessions.
    pub mobile_unreachable: bool,
    pub http_status: Option<u16>,
    /// Simulated navigation time.
    pub load_delay: Duration,
    /// Results keyed by [`PageScript::name`]; a missing key makes the script fail.
    pub scripts: HashMap<&'static str, Value>,
    /// Errors the page throws while it loads. Only a capture preloaded
    /// before navigation sees them.
    pub load_errors: Vec<String>,
}

impl PageScriptResults {
    /// A small, fast, well-formed landing page.
    pub fn healthy_page() -> Self {
        let mut scripts = HashMap::new();
        scripts.insert("navigation-timing", json!({"domContentLoaded": 120, "loadComplete": 180}));
        scripts.insert("install-error-capture", Value::Null);
        scripts.insert(
            "form-scan",
            json!({"forms": 1, "emailInputs": 1, "textInputs": 1, "textareas": 1,
                   "submitButtons": 1, "contactBlocks": 0}),
        );
        scripts.insert("fill-inputs", json!({"filled": ["email", "name"], "submitBlocked": true}));
        scripts.insert(
            "cta-scan",
            json!({"buttons": 2, "ctaLinks": 1, "textCtas": 0, "sampled": 3, "clickable": 3}),
        );
        scripts.insert("tracking", json!(["Facebook Pixel", "Google Tag Manager"]));
        scripts.insert("page-errors", json!([]));
        scripts.insert("collect-links", json!([]));
        scripts.insert("image-scan", json!({"total": 4, "broken": []}));
        scripts.insert("viewport-meta", json!({"present": true, "content": "width=device-width"}));

        Self {
            http_status: Some(200),
            scripts,
            ..Default::default()
        }
    }

    pub fn with_script(mut self, name: &'static str, value: Value) -> Self {
        self.scripts.insert(name, value);
        self
    }
}

/// One recorded navigation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCall {
    pub profile: String,
    pub wait: WaitCondition,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
pub struct BrowserLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub navigations: Mutex<Vec<NavigationCall>>,
    pub scripts_run: Mutex<Vec<&'static str>>,
    pub preloads: Mutex<Vec<&'static str>>,
}

impl BrowserLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<NavigationCall> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn scripts_run(&self) -> Vec<&'static str> {
        self.scripts_run.lock().unwrap().clone()
    }

    pub fn preloads(&self) -> Vec<&'static str> {
        self.preloads.lock().unwrap().clone()
    }
}

/// Session factory whose pages answer from a fixed script table.
pub struct FakeBrowser {
    page: PageScriptResults,
    pub log: Arc<BrowserLog>,
}

impl FakeBrowser {
    pub fn new(page: PageScriptResults) -> Arc<Self> {
        Arc::new(Self {
            page,
            log: Arc::new(BrowserLog::default()),
        })
    }
}

#[async_trait]
impl SessionFactory for FakeBrowser {
    async fn open(&self, profile: &DeviceProfile) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.log.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeSession {
            profile: profile.name.clone(),
            page: self.page.clone(),
            log: self.log.clone(),
            capture_preloaded: false,
            captured: Vec::new(),
        }))
    }
}

struct FakeSession {
    profile: String,
    page: PageScriptResults,
    log: Arc<BrowserLog>,
    capture_preloaded: bool,
    /// Load-time errors recorded by a preloaded capture.
    captured: Vec<String>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitCondition,
        timeout: Duration,
    ) -> Result<NavigationOutcome, BrowserError> {
        self.log.navigations.lock().unwrap().push(NavigationCall {
            profile: self.profile.clone(),
            wait,
            timeout,
        });

        if !self.page.load_delay.is_zero() {
            tokio::time::sleep(self.page.load_delay).await;
        }

        let unreachable =
            self.page.unreachable || (self.page.mobile_unreachable && self.profile == "mobile");
        if unreachable {
            return Err(BrowserError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        if self.capture_preloaded {
            self.captured.extend(self.page.load_errors.iter().cloned());
        }

        Ok(NavigationOutcome {
            http_status: self.page.http_status,
            final_url: Some(url.to_string()),
        })
    }

    async fn preload(&mut self, script: &PageScript) -> Result<(), BrowserError> {
        self.log.preloads.lock().unwrap().push(script.name());
        if *script == PageScript::InstallErrorCapture {
            self.capture_preloaded = true;
        }
        Ok(())
    }

    async fn evaluate(&mut self, script: &PageScript) -> Result<Value, BrowserError> {
        self.log.scripts_run.lock().unwrap().push(script.name());
        let value = self
            .page
            .scripts
            .get(script.name())
            .cloned()
            .ok_or_else(|| BrowserError::Script {
                script: script.name(),
                reason: "not scripted".to_string(),
            })?;

        if *script == PageScript::PageErrors {
            let mut errors: Vec<Value> = self.captured.iter().map(|e| json!(e)).collect();
            errors.extend(value.as_array().cloned().unwrap_or_default());
            return Ok(Value::Array(errors));
        }
        Ok(value)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        self.log.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Probe settings with every wait shortened and nothing touching the network.
pub fn fast_probe_config() -> ProbeConfig {
    ProbeConfig {
        timeout_ms: 1_000,
        navigation_attempts: 3,
        settle_delay_ms: 0,
        check_links: false,
        screenshot_dir: None,
        ..ProbeConfig::default()
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.probe = fast_probe_config();
    config.queue.poll_interval_ms = 10;
    config.monitoring.delay_between_sites_ms = 0;
    config.alerts.webhook_url = None;
    config
}

/// A fresh SQLite store; keep the directory alive for the test's duration.
pub fn temp_store() -> (TempDir, Arc<dyn RecordStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("funnelwatch.db")).unwrap();
    (dir, Arc::new(store))
}

pub async fn add_site(store: &Arc<dyn RecordStore>, name: &str, url: &str) -> String {
    store
        .add_site(NewSite {
            display_name: name.to_string(),
            url: url.to_string(),
            check_frequency: "daily".to_string(),
        })
        .await
        .unwrap()
        .id
}

/// Services over a temp store and a fake browser.
pub fn test_services(page: PageScriptResults) -> (TempDir, Services, Arc<FakeBrowser>) {
    let (dir, store) = temp_store();
    let browser = FakeBrowser::new(page);
    let services = Services::with_parts(test_config(), store, browser.clone()).unwrap();
    (dir, services, browser)
}

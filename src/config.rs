//! TOML configuration for funnelwatch.
//!
//! Every section carries defaults, so an empty file (or no file at all) is a
//! valid configuration. Secrets and endpoints can be overridden from the
//! environment after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::probes::score::{ScorePolicy, SlowLoadPenalty};

/// Environment variable naming the config file path.
pub const CONFIG_ENV: &str = "FUNNELWATCH_CONFIG";

/// Config file looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "funnelwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration:
    /// 1. An explicit path (a failure here is an error).
    /// 2. The path in `FUNNELWATCH_CONFIG`.
    /// 3. `./funnelwatch.toml`.
    /// 4. Compiled-in defaults.
    ///
    /// Environment overrides are applied in every case.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FUNNELWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Let deployment secrets and endpoints come from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AIRTABLE_API_KEY") {
            self.store.airtable.api_key = Some(v);
        }
        if let Some(v) = lookup("AIRTABLE_BASE_ID") {
            self.store.airtable.base_id = Some(v);
        }
        if let Some(v) = lookup("N8N_WEBHOOK_URL") {
            self.alerts.webhook_url = Some(v);
        }
        if let Some(v) = lookup("N8N_WEBHOOK_KEY") {
            self.alerts.webhook_key = Some(v);
        }
        if let Some(v) = lookup("WEBDRIVER_URL") {
            self.probe.webdriver_url = v;
        }
        if let Some(v) = lookup("CHROME_PATH") {
            self.probe.chrome_binary = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
    /// Origin allowed by CORS (the dashboard front end).
    pub frontend_url: String,
    /// Deployment label echoed in alert payloads.
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3001".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            environment: "development".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Sqlite,
    Airtable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file (created on first use).
    pub sqlite_path: PathBuf,
    pub airtable: AirtableConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("data/funnelwatch.db"),
            airtable: AirtableConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirtableConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub base_id: Option<String>,
    pub sites_table: String,
    pub history_table: String,
    /// Upper bound on rows fetched by a single site listing.
    pub max_records: usize,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.airtable.com/v0".to_string(),
            api_key: None,
            base_id: None,
            sites_table: "URL_A_SURVEILLER".to_string(),
            history_table: "Historique_Tests_Tunnels".to_string(),
            max_records: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// WebDriver endpoint (chromedriver).
    pub webdriver_url: String,
    /// Explicit Chrome/Chromium binary; the driver's default otherwise.
    pub chrome_binary: Option<String>,
    pub headless: bool,
    /// Base navigation timeout; attempt `n` waits `n` times this long.
    pub timeout_ms: u64,
    pub navigation_attempts: u32,
    /// Pause after navigation so client-side rendering can finish.
    pub settle_delay_ms: u64,
    pub score_policy: ScorePolicy,
    pub slow_load: SlowLoadPenalty,
    pub interact_forms: bool,
    pub check_mobile: bool,
    pub check_links: bool,
    /// Links sampled per run; never more than 10.
    pub max_links: usize,
    pub link_timeout_ms: u64,
    pub check_images: bool,
    pub max_console_errors: usize,
    /// Screenshots are skipped when unset.
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            chrome_binary: None,
            headless: true,
            timeout_ms: 30_000,
            navigation_attempts: 3,
            settle_delay_ms: 2_500,
            score_policy: ScorePolicy::Banded,
            slow_load: SlowLoadPenalty::default(),
            interact_forms: true,
            check_mobile: true,
            check_links: true,
            max_links: 10,
            link_timeout_ms: 5_000,
            check_images: true,
            max_console_errors: 5,
            screenshot_dir: Some(PathBuf::from("data/screenshots")),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    /// Pending entries allowed before enqueue is refused; unbounded when unset.
    pub max_pending: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_pending: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    /// Shared secret appended to every payload as `key`.
    pub webhook_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_key: None,
            timeout_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Cron expression (5 or 6 fields, UTC).
    pub cron: String,
    /// Pause between two sites of the same sweep.
    pub delay_between_sites_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "0 0 8 * * *".to_string(),
            delay_between_sites_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:3001");
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.store.airtable.sites_table, "URL_A_SURVEILLER");
        assert_eq!(cfg.probe.timeout_ms, 30_000);
        assert_eq!(cfg.probe.navigation_attempts, 3);
        assert_eq!(cfg.probe.max_links, 10);
        assert_eq!(cfg.probe.score_policy, ScorePolicy::Banded);
        assert_eq!(cfg.queue.poll_interval_ms, 1_000);
        assert!(cfg.queue.max_pending.is_none());
        assert!(cfg.alerts.webhook_url.is_none());
        assert!(!cfg.monitoring.enabled);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:8080"
environment = "production"

[store]
backend = "airtable"

[store.airtable]
base_id = "appXYZ"
history_table = "History"

[probe]
timeout_ms = 10000
score_policy = "linear"
check_mobile = false

[probe.slow_load]
moderate_ms = 2000
moderate_penalty = 3

[queue]
poll_interval_ms = 250
max_pending = 20

[alerts]
webhook_url = "https://hooks.example.com/alert"

[monitoring]
enabled = true
cron = "0 6 * * *"

[logging]
json = true
"#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.server.environment, "production");
        assert_eq!(cfg.store.backend, StoreBackend::Airtable);
        assert_eq!(cfg.store.airtable.base_id.as_deref(), Some("appXYZ"));
        assert_eq!(cfg.store.airtable.history_table, "History");
        assert_eq!(cfg.store.airtable.sites_table, "URL_A_SURVEILLER");
        assert_eq!(cfg.probe.timeout_ms, 10_000);
        assert_eq!(cfg.probe.score_policy, ScorePolicy::Linear);
        assert!(!cfg.probe.check_mobile);
        assert_eq!(cfg.probe.slow_load.moderate_ms, 2_000);
        assert_eq!(cfg.probe.slow_load.moderate_penalty, 3);
        assert_eq!(cfg.probe.slow_load.severe_ms, SlowLoadPenalty::default().severe_ms);
        assert_eq!(cfg.queue.max_pending, Some(20));
        assert!(cfg.monitoring.enabled);
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        let defaults = AppConfig::default();

        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(cfg.probe.settle_delay_ms, defaults.probe.settle_delay_ms);
        assert_eq!(cfg.monitoring.cron, defaults.monitoring.cron);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("funnelwatch.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9999"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = AppConfig::load(Path::new("/nonexistent/path/funnelwatch.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AIRTABLE_API_KEY", "key123"),
            ("N8N_WEBHOOK_URL", "https://n8n.example.com/hook"),
            ("WEBDRIVER_URL", "http://driver:4444"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.store.airtable.api_key.as_deref(), Some("key123"));
        assert_eq!(
            cfg.alerts.webhook_url.as_deref(),
            Some("https://n8n.example.com/hook")
        );
        assert_eq!(cfg.probe.webdriver_url, "http://driver:4444");
        assert!(cfg.probe.chrome_binary.is_none());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.server.bind, roundtripped.server.bind);
        assert_eq!(cfg.probe.max_links, roundtripped.probe.max_links);
    }
}

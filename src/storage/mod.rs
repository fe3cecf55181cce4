//! Record store: monitored sites and the append-only result history.
//!
//! Two backends implement [`RecordStore`]: a local SQLite database (default)
//! and the Airtable REST API.

pub mod airtable;
pub mod schema;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::{MonitoredSite, SiteUpdate, TestResult};

pub use self::airtable::AirtableStore;
pub use self::sqlite::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("site not found: {0}")]
    NotFound(String),
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("malformed record: {0}")]
    Decode(String),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Input for creating a site locally.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSite {
    pub display_name: String,
    pub url: String,
    #[serde(default = "default_frequency")]
    pub check_frequency: String,
}

fn default_frequency() -> String {
    "daily".to_string()
}

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>, StoreError>;

    async fn get_site(&self, id: &str) -> Result<MonitoredSite, StoreError>;

    /// Apply the allow-listed fields and return the updated site.
    async fn update_site(&self, id: &str, update: &SiteUpdate)
        -> Result<MonitoredSite, StoreError>;

    async fn add_site(&self, _site: NewSite) -> Result<MonitoredSite, StoreError> {
        Err(StoreError::Unsupported("adding sites"))
    }

    async fn remove_site(&self, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("removing sites"))
    }

    async fn append_result(&self, result: &TestResult) -> Result<(), StoreError>;

    /// Latest `limit` results for a site, newest first; equal timestamps order by id descending.
    async fn history(&self, site_id: &str, limit: usize) -> Result<Vec<TestResult>, StoreError>;

    /// Every result at or after `since`, newest first, optionally for one site.
    async fn results_since(
        &self,
        since: DateTime<Utc>,
        site_id: Option<&str>,
    ) -> Result<Vec<TestResult>, StoreError>;
}

/// Newest first, ties broken by id descending.
pub fn sort_newest_first(results: &mut [TestResult]) {
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Build the configured backend.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    match config.backend {
        StoreBackend::Sqlite => {
            tracing::info!(path = %config.sqlite_path.display(), "Opening SQLite store");
            let store = SqliteStore::open(&config.sqlite_path)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Airtable => {
            tracing::info!(base = ?config.airtable.base_id, "Using Airtable store");
            let store = AirtableStore::new(&config.airtable)?;
            Ok(Arc::new(store))
        }
    }
}

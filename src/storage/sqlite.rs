use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{open_pool, NewSite, Pool, RecordStore, StoreError};
use crate::model::{format_timestamp, MonitoredSite, SiteUpdate, TestResult};

/// Local backend: sites and results in one SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            pool: open_pool(path)?,
        })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run blocking database work off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

const SITE_COLUMNS: &str =
    "id, url, display_name, check_frequency, status, alert_email, priority";

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoredSite> {
    Ok(MonitoredSite {
        id: row.get(0)?,
        url: row.get(1)?,
        display_name: row.get(2)?,
        check_frequency: row.get(3)?,
        status: row.get(4)?,
        alert_email: row.get(5)?,
        priority: row.get(6)?,
    })
}

fn load_site(conn: &Connection, id: &str) -> Result<MonitoredSite, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
        [id],
        site_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn decode_results(rows: Vec<String>) -> Result<Vec<TestResult>, StoreError> {
    rows.iter()
        .map(|json| serde_json::from_str(json).map_err(|e| StoreError::Decode(e.to_string())))
        .collect()
}

#[async_trait::async_trait]
impl RecordStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sites WHERE url != '' ORDER BY display_name, id",
                SITE_COLUMNS
            ))?;
            let sites = stmt
                .query_map([], site_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sites)
        })
        .await
    }

    async fn get_site(&self, id: &str) -> Result<MonitoredSite, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| load_site(conn, &id)).await
    }

    async fn update_site(
        &self,
        id: &str,
        update: &SiteUpdate,
    ) -> Result<MonitoredSite, StoreError> {
        let id = id.to_string();
        let update = update.clone();
        self.with_conn(move |conn| {
            let mut site = load_site(conn, &id)?;
            update.apply_to(&mut site);
            conn.execute(
                "UPDATE sites SET check_frequency = ?2, status = ?3, alert_email = ?4,
                     priority = ?5, updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    site.id,
                    site.check_frequency,
                    site.status,
                    site.alert_email,
                    site.priority
                ],
            )?;
            Ok(site)
        })
        .await
    }

    async fn add_site(&self, new: NewSite) -> Result<MonitoredSite, StoreError> {
        let site = MonitoredSite {
            id: format!("site-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            url: new.url,
            display_name: new.display_name,
            check_frequency: new.check_frequency,
            status: None,
            alert_email: None,
            priority: None,
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sites (id, url, display_name, check_frequency) VALUES (?1, ?2, ?3, ?4)",
                params![site.id, site.url, site.display_name, site.check_frequency],
            )?;
            Ok(site)
        })
        .await
    }

    async fn remove_site(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM sites WHERE id = ?1", [&id])?;
            if removed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn append_result(&self, result: &TestResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result).map_err(|e| StoreError::Decode(e.to_string()))?;
        let result = result.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO test_results
                    (id, site_id, url, tested_at, status, performance_score, load_time_ms, alert_sent, result_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    result.id,
                    result.site_id,
                    result.url,
                    format_timestamp(&result.timestamp),
                    result.status.as_str(),
                    result.performance_score,
                    result.load_time_ms as i64,
                    result.alert_sent,
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn history(&self, site_id: &str, limit: usize) -> Result<Vec<TestResult>, StoreError> {
        let site_id = site_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT result_json FROM test_results
                 WHERE site_id = ?1
                 ORDER BY tested_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![site_id, limit as i64], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            decode_results(rows)
        })
        .await
    }

    async fn results_since(
        &self,
        since: DateTime<Utc>,
        site_id: Option<&str>,
    ) -> Result<Vec<TestResult>, StoreError> {
        let since = format_timestamp(&since);
        let site_id = site_id.map(str::to_string);
        self.with_conn(move |conn| {
            let rows = match site_id {
                Some(site) => {
                    let mut stmt = conn.prepare(
                        "SELECT result_json FROM test_results
                         WHERE tested_at >= ?1 AND site_id = ?2
                         ORDER BY tested_at DESC, id DESC",
                    )?;
                    let rows = stmt
                        .query_map(params![since, site], |r| r.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT result_json FROM test_results
                         WHERE tested_at >= ?1
                         ORDER BY tested_at DESC, id DESC",
                    )?;
                    let rows = stmt
                        .query_map(params![since], |r| r.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            decode_results(rows)
        })
        .await
    }
}

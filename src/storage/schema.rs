//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            display_name TEXT NOT NULL,
            check_frequency TEXT NOT NULL DEFAULT 'daily',
            status TEXT,
            alert_email TEXT,
            priority TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only. tested_at is RFC 3339 UTC with milliseconds, so it sorts as text.
        CREATE TABLE IF NOT EXISTS test_results (
            id TEXT PRIMARY KEY,
            site_id TEXT NOT NULL,
            url TEXT NOT NULL,
            tested_at TEXT NOT NULL,
            status TEXT NOT NULL,
            performance_score INTEGER NOT NULL,
            load_time_ms INTEGER NOT NULL,
            alert_sent INTEGER NOT NULL DEFAULT 0,
            result_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_test_results_site_time
            ON test_results (site_id, tested_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_test_results_time
            ON test_results (tested_at DESC);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('sites', 'test_results')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}

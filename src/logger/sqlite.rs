//! SQLite activity history in WAL mode, queryable after the fact.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{MfcError, Result};

pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MfcError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── activity_log ────────────────────

    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, path, category, destination,
                duration_ms, success, error_code, error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.path,
                row.category,
                row.destination,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, path, category, destination,
                    duration_ms, success, error_code, error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    path: row.get(3)?,
                    category: row.get(4)?,
                    destination: row.get(5)?,
                    duration_ms: row.get(6)?,
                    success: row.get(7)?,
                    error_code: row.get(8)?,
                    error_message: row.get(9)?,
                    details: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Successful deletions and relocations per category since `since`.
    pub fn cleaned_by_category_since(&self, since: &str) -> Result<Vec<CategoryCount>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT category, event_type, COUNT(*) FROM activity_log
             WHERE success = 1 AND category IS NOT NULL AND timestamp >= ?1
               AND event_type IN ('file_delete', 'file_relocate')
             GROUP BY category, event_type ORDER BY category, event_type",
        )?;
        let counts = stmt
            .query_map(params![since], |row| {
                Ok(CategoryCount {
                    category: row.get(0)?,
                    event_type: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Delete rows older than `retention_days`; returns how many went.
    pub fn prune_activity_log(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff_str = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let deleted = self.conn.execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            params![cutoff_str],
        )?;
        Ok(deleted)
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

/// Row of the `activity_log` table.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub path: Option<String>,
    pub category: Option<String>,
    pub destination: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub event_type: String,
    pub count: i64,
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[MFC-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            path TEXT,
            category TEXT,
            destination TEXT,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, SqliteLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = SqliteLogger::open(&dir.path().join("activity.sqlite3")).unwrap();
        (dir, logger)
    }

    fn row(event_type: &str, timestamp: &str, success: i32) -> ActivityRow {
        ActivityRow {
            timestamp: timestamp.to_string(),
            event_type: event_type.to_string(),
            severity: "info".to_string(),
            path: Some("/media/movies/X/X.mkv".to_string()),
            category: Some("movie".to_string()),
            destination: None,
            duration_ms: Some(12),
            success,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, logger) = temp_db();
        assert!(logger.is_wal_mode());
    }

    #[test]
    fn insert_and_query_newest_first() {
        let (_dir, logger) = temp_db();
        logger
            .log_activity(&row("file_delete", "2026-03-01T10:00:00.000Z", 1))
            .unwrap();
        logger
            .log_activity(&row("file_relocate", "2026-03-01T10:00:01.000Z", 0))
            .unwrap();

        let rows = logger.recent_activity(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_type, "file_relocate");
        assert_eq!(rows[0].success, 0);
        assert_eq!(rows[1].category.as_deref(), Some("movie"));
    }

    #[test]
    fn counts_and_prunes() {
        let (_dir, logger) = temp_db();
        logger
            .log_activity(&row("file_delete", "2000-01-01T00:00:00.000Z", 1))
            .unwrap();
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        logger.log_activity(&row("file_delete", &now, 1)).unwrap();

        assert_eq!(
            logger
                .count_events_since("file_delete", "1999-01-01T00:00:00Z")
                .unwrap(),
            2
        );
        assert_eq!(logger.prune_activity_log(30).unwrap(), 1);
        assert_eq!(logger.recent_activity(10).unwrap().len(), 1);
    }

    #[test]
    fn groups_cleaned_files_by_category() {
        let (_dir, logger) = temp_db();
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        logger.log_activity(&row("file_delete", &now, 1)).unwrap();
        logger.log_activity(&row("file_delete", &now, 1)).unwrap();
        logger.log_activity(&row("file_delete", &now, 0)).unwrap();
        let mut episode = row("file_relocate", &now, 1);
        episode.category = Some("episode".to_string());
        logger.log_activity(&episode).unwrap();
        logger.log_activity(&row("pass_complete", &now, 1)).unwrap();

        let counts = logger
            .cleaned_by_category_since("2000-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(
            counts,
            vec![
                CategoryCount {
                    category: "episode".to_string(),
                    event_type: "file_relocate".to_string(),
                    count: 1,
                },
                CategoryCount {
                    category: "movie".to_string(),
                    event_type: "file_delete".to_string(),
                    count: 2,
                },
            ]
        );
    }

    #[test]
    fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("again.db");
        drop(SqliteLogger::open(&path).unwrap());
        let logger = SqliteLogger::open(&path).unwrap();
        assert_eq!(logger.path(), path.as_path());
    }
}

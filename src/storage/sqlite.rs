//! SQLite-backed local store
//!
//! Reports are stored as JSON documents keyed by identifier. Small pieces of
//! device state (rate-limit history, ban deadline) live in a key/value table
//! in the same database.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LocalStore, RateLimitStore};
use crate::error::StorageError;
use crate::model::Report;
use crate::rate_limit::RateLimitState;

const KEY_HISTORY: &str = "rate_limit_history";
const KEY_BAN_UNTIL: &str = "rate_limit_ban_until";

/// Report and device-state storage in a single SQLite file.
pub struct SqliteStore {
    db: Mutex<Connection>,
    max_reports: usize,
}

impl SqliteStore {
    /// Open or create the database in `data_dir`.
    pub fn open(data_dir: &Path, max_reports: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("safespeak.db");
        let db = Connection::open(&db_path)?;

        // WAL keeps readers unblocked while a write commits
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_schema(&db)?;

        info!(path = %db_path.display(), max_reports, "Local store initialized");

        Ok(Self {
            db: Mutex::new(db),
            max_reports,
        })
    }

    /// In-memory database, for tests and throwaway runs.
    pub fn open_in_memory(max_reports: usize) -> Result<Self, StorageError> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Mutex::new(db),
            max_reports,
        })
    }

    fn init_schema(db: &Connection) -> Result<(), StorageError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            CREATE TABLE IF NOT EXISTS local_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Number of stored reports.
    pub async fn count(&self) -> Result<usize, StorageError> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row("SELECT count(*) FROM reports", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn read_state(db: &Connection, key: &str) -> Result<Option<String>, StorageError> {
        let value = db
            .query_row(
                "SELECT value FROM local_state WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_state(db: &Connection, key: &str, value: &str) -> Result<(), StorageError> {
        db.execute(
            "INSERT INTO local_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put(&self, report: &Report) -> Result<(), StorageError> {
        let data = serde_json::to_string(report)?;
        let db = self.db.lock().await;

        let exists = db
            .query_row("SELECT 1 FROM reports WHERE id = ?1", [&report.id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            let count: i64 =
                db.query_row("SELECT count(*) FROM reports", [], |row| row.get(0))?;
            if count as usize >= self.max_reports {
                return Err(StorageError::CapacityExceeded {
                    limit: self.max_reports,
                });
            }
        }

        db.execute(
            "INSERT INTO reports (id, timestamp, data, updated_at)
             VALUES (?1, ?2, ?3, strftime('%s', 'now'))
             ON CONFLICT(id) DO UPDATE SET data = ?3, updated_at = strftime('%s', 'now')",
            rusqlite::params![report.id, report.timestamp as i64, data],
        )?;
        debug!(report_id = %report.id, bytes = data.len(), "Saved report");
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Report>, StorageError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare_cached("SELECT data FROM reports")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(serde_json::from_str(&row?)?);
        }
        Ok(reports)
    }

    async fn get(&self, id: &str) -> Result<Option<Report>, StorageError> {
        let db = self.db.lock().await;
        let data = db
            .query_row("SELECT data FROM reports WHERE id = ?1", [id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn load_rate_limit(&self) -> Result<RateLimitState, StorageError> {
        let db = self.db.lock().await;
        let history = match Self::read_state(&db, KEY_HISTORY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        // An unreadable deadline counts as no ban
        let ban_until = Self::read_state(&db, KEY_BAN_UNTIL)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        Ok(RateLimitState { history, ban_until })
    }

    async fn save_rate_limit(&self, state: &RateLimitState) -> Result<(), StorageError> {
        let history = serde_json::to_string(&state.history)?;
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        Self::write_state(&tx, KEY_HISTORY, &history)?;
        Self::write_state(&tx, KEY_BAN_UNTIL, &state.ban_until.to_string())?;
        tx.commit()?;
        Ok(())
    }
}

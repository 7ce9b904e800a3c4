//! Persistence layer (spec §4.A).
//!
//! A strongly-typed record store, grounded in the teacher's `vault/vault_db.rs`:
//! a single `rusqlite::Connection` behind `Arc<Mutex<...>>`, prepared statements,
//! `INSERT ... ON CONFLICT DO UPDATE` upserts. Generalised here from one table
//! family to every entity in spec §3.
//!
//! Rust has no session-attached entities to "expunge after flush" — every
//! `insert_*` already returns a fully owned, freestanding struct, so the
//! `expunge_after_flush` requirement of spec §4.A is satisfied by construction.

pub mod accounts;
pub mod activity;
pub mod analysis;
pub mod experts;
pub mod instruments;
pub mod llm_usage;
pub mod orders;
pub mod recommendations;
pub mod rulesets;
pub mod queue_tasks;
pub mod schema;
pub mod settings;
pub mod transactions;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::warn;

const DEFAULT_PERF_LOG_THRESHOLD_MS: u64 = 100;

/// Shared handle to the SQLite connection plus the monotonic sequence counter
/// used to break ties in priority ordering (queue tasks) and keep activity log
/// insertion order stable even when two rows share a timestamp.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    seq: Arc<AtomicI64>,
    perf_log_threshold_ms: Arc<AtomicU64>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let conn = Connection::open(path).context("open trade-core db")?;
        schema::init(&conn).context("init schema")?;
        let threshold = read_perf_log_threshold_sync(&conn).unwrap_or(DEFAULT_PERF_LOG_THRESHOLD_MS);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            seq: Arc::new(AtomicI64::new(0)),
            perf_log_threshold_ms: Arc::new(AtomicU64::new(threshold)),
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory db")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            seq: Arc::new(AtomicI64::new(0)),
            perf_log_threshold_ms: Arc::new(AtomicU64::new(DEFAULT_PERF_LOG_THRESHOLD_MS)),
        })
    }

    pub fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Re-reads `db_perf_log_threshold_ms` from the settings table and makes
    /// it take effect on every clone of this `Db` (spec §6 application
    /// setting). Called once at startup after `seed_app_settings` has had a
    /// chance to write the default for a fresh database — `Db::open` itself
    /// runs before that seeding, so it only sees a persisted override from a
    /// previous run.
    pub async fn refresh_perf_log_threshold(&self) -> rusqlite::Result<()> {
        let value = self
            .get_setting(settings::SettingOwner::App, "db_perf_log_threshold_ms")
            .await?
            .and_then(|v| v.as_f64());
        if let Some(ms) = value {
            self.perf_log_threshold_ms.store(ms.max(0.0) as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Runs `f` against the locked connection, logging a warning if it exceeds
    /// `db_perf_log_threshold_ms` (spec §6 application setting).
    pub async fn with_conn<T>(&self, label: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let guard = self.conn.lock().await;
        let start = Instant::now();
        let result = f(&guard);
        let elapsed = start.elapsed();
        let threshold = self.perf_log_threshold_ms.load(Ordering::Relaxed);
        if elapsed.as_millis() as u64 > threshold {
            warn!(op = label, elapsed_ms = elapsed.as_millis() as u64, "slow db operation");
        }
        result
    }
}

/// Synchronous read used only at `Db::open`, before the connection is behind
/// the async `Mutex`.
fn read_perf_log_threshold_sync(conn: &Connection) -> Option<u64> {
    conn.query_row(
        "SELECT value FROM settings WHERE owner_kind = 'app' AND owner_id IS NULL AND key = 'db_perf_log_threshold_ms'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|raw| raw.parse::<f64>().ok())
    .map(|v| v.max(0.0) as u64)
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

//! Persistence for `PersistedQueueTask` rows (spec §3, §4.D) — what survives a
//! restart. The in-memory priority scheduling lives in `crate::queue`; this
//! module is purely the durable record of it, grounded in the teacher's
//! `vault_db.rs` upsert style.

use super::{now_iso, Db};
use crate::queue::task::{QueueTask, TaskPayload, TaskStatus};
use rusqlite::{params, OptionalExtension};

impl Db {
    pub async fn insert_queue_task(&self, task: &QueueTask) -> rusqlite::Result<()> {
        let task = task.clone();
        let payload_json = serde_json::to_string(&task.payload).unwrap();
        self.with_conn("insert_queue_task", move |conn| {
            conn.execute(
                "INSERT INTO queue_tasks
                 (id, kind, priority, payload, status, dedup_key, batch_id, retry_count,
                  error_message, submitted_at, claimed_at, completed_at, seq)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    task.id,
                    task.payload.kind_tag(),
                    task.priority,
                    payload_json,
                    task.status.as_str(),
                    task.payload.dedup_key(),
                    task.batch_id,
                    task.retry_count,
                    task.error_message,
                    task.submitted_at,
                    task.claimed_at,
                    task.completed_at,
                    task.seq,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn claim_queue_task(&self, id: &str) -> rusqlite::Result<()> {
        let id = id.to_string();
        let now = now_iso();
        self.with_conn("claim_queue_task", move |conn| {
            conn.execute(
                "UPDATE queue_tasks SET status = 'RUNNING', claimed_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn finalize_queue_task(&self, id: &str, status: TaskStatus, error_message: Option<String>) -> rusqlite::Result<()> {
        let id = id.to_string();
        let now = now_iso();
        self.with_conn("finalize_queue_task", move |conn| {
            conn.execute(
                "UPDATE queue_tasks SET status = ?1, error_message = ?2, completed_at = ?3 WHERE id = ?4",
                params![status.as_str(), error_message, now, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_queue_task(&self, id: &str) -> rusqlite::Result<Option<QueueTask>> {
        let id = id.to_string();
        self.with_conn("get_queue_task", move |conn| {
            conn.query_row(&select_sql("WHERE id = ?1"), params![id], row_to_task)
                .optional()
        })
        .await
    }

    pub async fn list_queue_tasks_by_status(&self, status: TaskStatus) -> rusqlite::Result<Vec<QueueTask>> {
        self.with_conn("list_queue_tasks_by_status", move |conn| {
            let mut stmt = conn.prepare(&select_sql("WHERE status = ?1 ORDER BY priority ASC, seq ASC"))?;
            let rows = stmt.query_map(params![status.as_str()], row_to_task)?;
            rows.collect()
        })
        .await
    }

    pub async fn list_all_queue_tasks(&self) -> rusqlite::Result<Vec<QueueTask>> {
        self.with_conn("list_all_queue_tasks", |conn| {
            let mut stmt = conn.prepare(&select_sql("ORDER BY priority ASC, seq ASC"))?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect()
        })
        .await
    }

    /// Active (PENDING or RUNNING) tasks sharing a dedup key — the basis for
    /// spec invariant 6 (§3) and the Worker Queue's duplicate rejection.
    pub async fn active_tasks_with_dedup_key(&self, dedup_key: &str) -> rusqlite::Result<Vec<QueueTask>> {
        let dedup_key = dedup_key.to_string();
        self.with_conn("active_tasks_with_dedup_key", move |conn| {
            let mut stmt = conn.prepare(&select_sql("WHERE dedup_key = ?1 AND status IN ('PENDING','RUNNING')"))?;
            let rows = stmt.query_map(params![dedup_key], row_to_task)?;
            rows.collect()
        })
        .await
    }

    /// On startup, any task left RUNNING must be marked FAILED with an
    /// "application restart" error (spec §4.D, §7).
    pub async fn fail_stuck_running_tasks(&self) -> rusqlite::Result<usize> {
        self.with_conn("fail_stuck_running_tasks", |conn| {
            let now = now_iso();
            let n = conn.execute(
                "UPDATE queue_tasks SET status = 'FAILED', error_message = ?1, completed_at = ?2
                 WHERE status = 'RUNNING'",
                params!["Application was restarted while task was running", now],
            )?;
            Ok(n)
        })
        .await
    }
}

fn select_sql(clause: &str) -> String {
    format!(
        "SELECT id, payload, priority, status, batch_id, retry_count, error_message,
                submitted_at, claimed_at, completed_at, seq
         FROM queue_tasks {clause}"
    )
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<QueueTask> {
    let payload_raw: String = row.get(1)?;
    let status: String = row.get(3)?;
    let payload: TaskPayload = serde_json::from_str(&payload_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(QueueTask {
        id: row.get(0)?,
        payload,
        priority: row.get(2)?,
        status: TaskStatus::from_str(&status),
        batch_id: row.get(4)?,
        retry_count: row.get(5)?,
        error_message: row.get(6)?,
        submitted_at: row.get(7)?,
        claimed_at: row.get(8)?,
        completed_at: row.get(9)?,
        seq: row.get(10)?,
    })
}

//! Activity log (spec §4.G) — the audit trail paired with `tracing` output at
//! every significant call site (order submission, reconciliation, schedule
//! firing, task failure).

use super::{now_iso, Db};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub severity: String,
    pub kind: String,
    pub description: String,
    pub data: serde_json::Value,
    pub account_id: Option<i64>,
    pub expert_instance_id: Option<i64>,
    pub created_at: String,
}

impl Db {
    pub async fn log_activity(
        &self,
        severity: Severity,
        kind: &str,
        description: &str,
        data: serde_json::Value,
        account_id: Option<i64>,
        expert_instance_id: Option<i64>,
    ) -> rusqlite::Result<()> {
        let id = Uuid::new_v4().to_string();
        let kind = kind.to_string();
        let description = description.to_string();
        let now = now_iso();
        let seq = self.next_seq();
        self.with_conn("log_activity", move |conn| {
            conn.execute(
                "INSERT INTO activity_log
                 (id, severity, kind, description, data, account_id, expert_instance_id, created_at, seq)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    id,
                    severity.as_str(),
                    kind,
                    description,
                    data.to_string(),
                    account_id,
                    expert_instance_id,
                    now,
                    seq,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Most recent entries first (spec §4.G: "sorted by timestamp descending").
    pub async fn list_recent_activity(&self, limit: i64) -> rusqlite::Result<Vec<ActivityEntry>> {
        self.with_conn("list_recent_activity", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, severity, kind, description, data, account_id, expert_instance_id, created_at
                 FROM activity_log ORDER BY seq DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                let data_raw: String = row.get(4)?;
                Ok(ActivityEntry {
                    id: row.get(0)?,
                    severity: row.get(1)?,
                    kind: row.get(2)?,
                    description: row.get(3)?,
                    data: serde_json::from_str(&data_raw).unwrap_or(serde_json::Value::Null),
                    account_id: row.get(5)?,
                    expert_instance_id: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

use super::Db;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertInstance {
    pub id: i64,
    pub account_id: i64,
    pub expert_class_tag: String,
    pub enabled: bool,
    pub virtual_equity_percent: f64,
    pub ruleset_id: Option<i64>,
    pub alias: Option<String>,
}

impl Db {
    pub async fn add_expert_instance(
        &self,
        account_id: i64,
        expert_class_tag: &str,
        virtual_equity_percent: f64,
        ruleset_id: Option<i64>,
        alias: Option<&str>,
    ) -> rusqlite::Result<ExpertInstance> {
        let expert_class_tag = expert_class_tag.to_string();
        let alias = alias.map(|s| s.to_string());
        self.with_conn("add_expert_instance", move |conn| {
            conn.execute(
                "INSERT INTO expert_instances (account_id, expert_class_tag, enabled, virtual_equity_percent, ruleset_id, alias)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5)",
                params![account_id, expert_class_tag, virtual_equity_percent, ruleset_id, alias],
            )?;
            let id = conn.last_insert_rowid();
            Ok(ExpertInstance {
                id,
                account_id,
                expert_class_tag,
                enabled: true,
                virtual_equity_percent,
                ruleset_id,
                alias,
            })
        })
        .await
    }

    pub async fn get_expert_instance(&self, id: i64) -> rusqlite::Result<Option<ExpertInstance>> {
        self.with_conn("get_expert_instance", move |conn| {
            conn.query_row(
                "SELECT id, account_id, expert_class_tag, enabled, virtual_equity_percent, ruleset_id, alias
                 FROM expert_instances WHERE id = ?1",
                params![id],
                row_to_expert,
            )
            .optional()
        })
        .await
    }

    pub async fn list_expert_instances(&self) -> rusqlite::Result<Vec<ExpertInstance>> {
        self.with_conn("list_expert_instances", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, account_id, expert_class_tag, enabled, virtual_equity_percent, ruleset_id, alias
                 FROM expert_instances ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_expert)?;
            rows.collect()
        })
        .await
    }

    pub async fn list_enabled_expert_instances(&self) -> rusqlite::Result<Vec<ExpertInstance>> {
        Ok(self
            .list_expert_instances()
            .await?
            .into_iter()
            .filter(|e| e.enabled)
            .collect())
    }
}

fn row_to_expert(row: &rusqlite::Row) -> rusqlite::Result<ExpertInstance> {
    Ok(ExpertInstance {
        id: row.get(0)?,
        account_id: row.get(1)?,
        expert_class_tag: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        virtual_equity_percent: row.get(4)?,
        ruleset_id: row.get(5)?,
        alias: row.get(6)?,
    })
}

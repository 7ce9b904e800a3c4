//! Rulesets and their ordered event-actions (spec §3, §4.A reordering
//! primitives).

use super::Db;
use crate::rules::actions::ActionDescriptor;
use crate::rules::conditions::Condition;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub subtype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAction {
    pub id: i64,
    pub ruleset_id: i64,
    pub kind: String,
    pub order_index: i64,
    pub triggers: Vec<Condition>,
    pub actions: Vec<ActionDescriptor>,
    pub continue_processing: bool,
}

impl Db {
    pub async fn create_ruleset(&self, name: &str, kind: &str, subtype: &str) -> rusqlite::Result<Ruleset> {
        let name = name.to_string();
        let kind = kind.to_string();
        let subtype = subtype.to_string();
        self.with_conn("create_ruleset", move |conn| {
            conn.execute(
                "INSERT INTO rulesets (name, kind, subtype) VALUES (?1, ?2, ?3)",
                params![name, kind, subtype],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Ruleset { id, name, kind, subtype })
        })
        .await
    }

    pub async fn get_ruleset(&self, id: i64) -> rusqlite::Result<Option<Ruleset>> {
        self.with_conn("get_ruleset", move |conn| {
            conn.query_row(
                "SELECT id, name, kind, subtype FROM rulesets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Ruleset {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        subtype: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    pub async fn add_event_action(
        &self,
        ruleset_id: i64,
        kind: &str,
        triggers: Vec<Condition>,
        actions: Vec<ActionDescriptor>,
        continue_processing: bool,
    ) -> rusqlite::Result<EventAction> {
        let kind = kind.to_string();
        let triggers_json = serde_json::to_string(&triggers).unwrap();
        let actions_json = serde_json::to_string(&actions).unwrap();
        self.with_conn("add_event_action", move |conn| {
            let next_index: i64 = conn.query_row(
                "SELECT COALESCE(MAX(order_index) + 1, 0) FROM event_actions WHERE ruleset_id = ?1",
                params![ruleset_id],
                |r| r.get(0),
            )?;
            conn.execute(
                "INSERT INTO event_actions (ruleset_id, kind, order_index, triggers, actions, continue_processing)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ruleset_id, kind, next_index, triggers_json, actions_json, continue_processing as i64],
            )?;
            let id = conn.last_insert_rowid();
            Ok(EventAction {
                id,
                ruleset_id,
                kind,
                order_index: next_index,
                triggers,
                actions,
                continue_processing,
            })
        })
        .await
    }

    /// Ordered event-actions for a ruleset, by `order_index` ascending (spec
    /// §4.C.1 "Load the ruleset and its ordered event-actions").
    pub async fn event_actions_for_ruleset(&self, ruleset_id: i64) -> rusqlite::Result<Vec<EventAction>> {
        self.with_conn("event_actions_for_ruleset", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ruleset_id, kind, order_index, triggers, actions, continue_processing
                 FROM event_actions WHERE ruleset_id = ?1 ORDER BY order_index ASC",
            )?;
            let rows = stmt.query_map(params![ruleset_id], row_to_event_action)?;
            rows.collect()
        })
        .await
    }

    /// Reassigns `order_index` to exactly `0..ids.len()` following `ids`'
    /// order (spec §4.A).
    pub async fn reorder(&self, ruleset_id: i64, ids: Vec<i64>) -> rusqlite::Result<()> {
        self.with_conn("reorder", move |conn| {
            let tx = conn.unchecked_transaction()?;
            for (idx, id) in ids.iter().enumerate() {
                tx.execute(
                    "UPDATE event_actions SET order_index = ?1 WHERE id = ?2 AND ruleset_id = ?3",
                    params![idx as i64, id, ruleset_id],
                )?;
            }
            tx.commit()
        })
        .await
    }

    pub async fn move_up(&self, ruleset_id: i64, event_action_id: i64) -> rusqlite::Result<()> {
        self.swap_adjacent(ruleset_id, event_action_id, -1).await
    }

    pub async fn move_down(&self, ruleset_id: i64, event_action_id: i64) -> rusqlite::Result<()> {
        self.swap_adjacent(ruleset_id, event_action_id, 1).await
    }

    async fn swap_adjacent(&self, ruleset_id: i64, event_action_id: i64, direction: i64) -> rusqlite::Result<()> {
        self.with_conn("swap_adjacent", move |conn| {
            let current_index: i64 = conn.query_row(
                "SELECT order_index FROM event_actions WHERE id = ?1 AND ruleset_id = ?2",
                params![event_action_id, ruleset_id],
                |r| r.get(0),
            )?;
            let neighbor_index = current_index + direction;
            let neighbor_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM event_actions WHERE ruleset_id = ?1 AND order_index = ?2",
                    params![ruleset_id, neighbor_index],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(neighbor_id) = neighbor_id {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "UPDATE event_actions SET order_index = ?1 WHERE id = ?2",
                    params![neighbor_index, event_action_id],
                )?;
                tx.execute(
                    "UPDATE event_actions SET order_index = ?1 WHERE id = ?2",
                    params![current_index, neighbor_id],
                )?;
                tx.commit()?;
            }
            Ok(())
        })
        .await
    }
}

fn row_to_event_action(row: &rusqlite::Row) -> rusqlite::Result<EventAction> {
    let triggers_raw: String = row.get(4)?;
    let actions_raw: String = row.get(5)?;
    Ok(EventAction {
        id: row.get(0)?,
        ruleset_id: row.get(1)?,
        kind: row.get(2)?,
        order_index: row.get(3)?,
        triggers: serde_json::from_str(&triggers_raw).unwrap_or_default(),
        actions: serde_json::from_str(&actions_raw).unwrap_or_default(),
        continue_processing: row.get::<_, i64>(6)? != 0,
    })
}

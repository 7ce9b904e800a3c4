//! Convenience layer over the persisted activity/LLM-usage logs (spec §4.G).
//! Most call sites go straight through `db::activity`/`db::llm_usage` for a
//! one-off message; the helpers here exist for the handful of event shapes
//! that recur across broker/queue/scheduler call sites, so the message
//! format and the state-transition fields line up every time.

pub use crate::db::activity::{ActivityEntry, Severity};
use crate::db::Db;

/// TP/SL adjustment (spec §4.G: "TP/SL adjusted (with before/after and percent)").
pub async fn log_tp_sl_adjustment(
    db: &Db,
    account_id: i64,
    transaction_id: i64,
    is_tp: bool,
    before: Option<f64>,
    after: f64,
) -> rusqlite::Result<()> {
    let field = if is_tp { "take_profit" } else { "stop_loss" };
    db.log_activity(
        Severity::Info,
        "tp_sl_adjusted",
        &format!("{field} adjusted for transaction {transaction_id}: {before:?} -> {after:.4}"),
        serde_json::json!({"transaction_id": transaction_id, "field": field, "before": before, "after": after}),
        Some(account_id),
        None,
    )
    .await
}

/// Close-order submission/retry (spec §4.G: "close-order submitted/retried").
pub async fn log_close_order_event(db: &Db, account_id: i64, transaction_id: i64, event: &str) -> rusqlite::Result<()> {
    db.log_activity(
        Severity::Info,
        "close_order_event",
        &format!("transaction {transaction_id}: {event}"),
        serde_json::json!({"transaction_id": transaction_id, "event": event}),
        Some(account_id),
        None,
    )
    .await
}

/// Application startup / scheduler refresh (spec §4.G).
pub async fn log_system_event(db: &Db, kind: &str, description: &str) -> rusqlite::Result<()> {
    db.log_activity(Severity::Info, kind, description, serde_json::json!({}), None, None).await
}

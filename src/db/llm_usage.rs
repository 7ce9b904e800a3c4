//! Append-only LLM usage ledger (spec §4.G), populated by experts that call
//! out to a language model during `run_analysis`.

use super::{now_iso, Db};
use rusqlite::params;
use uuid::Uuid;

impl Db {
    pub async fn log_llm_usage(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        cost_usd: f64,
    ) -> rusqlite::Result<()> {
        let id = Uuid::new_v4().to_string();
        let provider = provider.to_string();
        let model = model.to_string();
        let now = now_iso();
        self.with_conn("log_llm_usage", move |conn| {
            conn.execute(
                "INSERT INTO llm_usage_log
                 (id, provider, model, prompt_tokens, completion_tokens, cost_usd, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![id, provider, model, prompt_tokens, completion_tokens, cost_usd, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn total_llm_cost_usd(&self) -> rusqlite::Result<f64> {
        self.with_conn("total_llm_cost_usd", |conn| {
            conn.query_row("SELECT COALESCE(SUM(cost_usd), 0.0) FROM llm_usage_log", [], |r| r.get(0))
        })
        .await
    }
}

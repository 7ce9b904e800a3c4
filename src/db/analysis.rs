use super::{now_iso, Db};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Running => "RUNNING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
            AnalysisStatus::Skipped => "SKIPPED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "RUNNING" => AnalysisStatus::Running,
            "COMPLETED" => AnalysisStatus::Completed,
            "FAILED" => AnalysisStatus::Failed,
            "SKIPPED" => AnalysisStatus::Skipped,
            _ => AnalysisStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisUseCase {
    EnterMarket,
    OpenPositions,
}

impl AnalysisUseCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisUseCase::EnterMarket => "ENTER_MARKET",
            AnalysisUseCase::OpenPositions => "OPEN_POSITIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTER_MARKET" => Some(AnalysisUseCase::EnterMarket),
            "OPEN_POSITIONS" => Some(AnalysisUseCase::OpenPositions),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub id: i64,
    pub symbol: String,
    pub expert_instance_id: i64,
    pub status: AnalysisStatus,
    pub use_case: AnalysisUseCase,
    pub state: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub id: i64,
    pub market_analysis_id: i64,
    pub name: String,
    pub kind: String,
    pub text: String,
    pub created_at: String,
}

impl Db {
    pub async fn create_market_analysis(
        &self,
        symbol: &str,
        expert_instance_id: i64,
        use_case: AnalysisUseCase,
    ) -> rusqlite::Result<MarketAnalysis> {
        let symbol = symbol.to_string();
        let now = now_iso();
        self.with_conn("create_market_analysis", move |conn| {
            conn.execute(
                "INSERT INTO market_analyses (symbol, expert_instance_id, status, use_case, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?5)",
                params![symbol, expert_instance_id, AnalysisStatus::Pending.as_str(), use_case.as_str(), now],
            )?;
            let id = conn.last_insert_rowid();
            Ok(MarketAnalysis {
                id,
                symbol,
                expert_instance_id,
                status: AnalysisStatus::Pending,
                use_case,
                state: serde_json::json!({}),
                created_at: now.clone(),
                updated_at: now,
            })
        })
        .await
    }

    pub async fn get_market_analysis(&self, id: i64) -> rusqlite::Result<Option<MarketAnalysis>> {
        self.with_conn("get_market_analysis", move |conn| {
            conn.query_row(
                "SELECT id, symbol, expert_instance_id, status, use_case, state, created_at, updated_at
                 FROM market_analyses WHERE id = ?1",
                params![id],
                row_to_analysis,
            )
            .optional()
        })
        .await
    }

    pub async fn update_market_analysis_status(
        &self,
        id: i64,
        status: AnalysisStatus,
        state_patch: Option<serde_json::Value>,
    ) -> rusqlite::Result<()> {
        let now = now_iso();
        self.with_conn("update_market_analysis_status", move |conn| {
            if let Some(patch) = state_patch {
                let current: String = conn.query_row(
                    "SELECT state FROM market_analyses WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )?;
                let mut state: serde_json::Value =
                    serde_json::from_str(&current).unwrap_or_else(|_| serde_json::json!({}));
                if let (Some(state_obj), Some(patch_obj)) = (state.as_object_mut(), patch.as_object()) {
                    for (k, v) in patch_obj {
                        state_obj.insert(k.clone(), v.clone());
                    }
                }
                conn.execute(
                    "UPDATE market_analyses SET status = ?1, state = ?2, updated_at = ?3 WHERE id = ?4",
                    params![status.as_str(), state.to_string(), now, id],
                )?;
            } else {
                conn.execute(
                    "UPDATE market_analyses SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, id],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn list_market_analyses_by_status(&self, status: AnalysisStatus) -> rusqlite::Result<Vec<MarketAnalysis>> {
        self.with_conn("list_market_analyses_by_status", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, symbol, expert_instance_id, status, use_case, state, created_at, updated_at
                 FROM market_analyses WHERE status = ?1",
            )?;
            let rows = stmt.query_map(params![status.as_str()], row_to_analysis)?;
            rows.collect()
        })
        .await
    }

    /// Startup reconciliation (spec §7): any analysis left RUNNING across a
    /// restart is marked FAILED with `startup_cleanup = true`, symmetric with
    /// `fail_stuck_running_tasks` for the Worker Queue.
    pub async fn fail_stuck_running_analyses(&self) -> rusqlite::Result<Vec<MarketAnalysis>> {
        let running = self.list_market_analyses_by_status(AnalysisStatus::Running).await?;
        for analysis in &running {
            self.update_market_analysis_status(
                analysis.id,
                AnalysisStatus::Failed,
                Some(serde_json::json!({
                    "startup_cleanup": true,
                    "failure_reason": "Application was restarted while analysis was running",
                })),
            )
            .await?;
        }
        Ok(running)
    }

    pub async fn add_analysis_output(
        &self,
        market_analysis_id: i64,
        name: &str,
        kind: &str,
        text: &str,
    ) -> rusqlite::Result<AnalysisOutput> {
        let name = name.to_string();
        let kind = kind.to_string();
        let text = text.to_string();
        let now = now_iso();
        self.with_conn("add_analysis_output", move |conn| {
            conn.execute(
                "INSERT INTO analysis_outputs (market_analysis_id, name, kind, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![market_analysis_id, name, kind, text, now],
            )?;
            let id = conn.last_insert_rowid();
            Ok(AnalysisOutput {
                id,
                market_analysis_id,
                name,
                kind,
                text,
                created_at: now,
            })
        })
        .await
    }
}

fn row_to_analysis(row: &rusqlite::Row) -> rusqlite::Result<MarketAnalysis> {
    let status: String = row.get(3)?;
    let use_case: String = row.get(4)?;
    let state_raw: String = row.get(5)?;
    Ok(MarketAnalysis {
        id: row.get(0)?,
        symbol: row.get(1)?,
        expert_instance_id: row.get(2)?,
        status: AnalysisStatus::from_str(&status),
        use_case: AnalysisUseCase::parse(&use_case).unwrap_or(AnalysisUseCase::EnterMarket),
        state: serde_json::from_str(&state_raw).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

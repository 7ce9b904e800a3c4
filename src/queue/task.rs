//! Task kinds carried by the Worker Queue (spec §4.D).

use crate::db::analysis::AnalysisUseCase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpansionType {
    Dynamic,
    Expert,
    OpenPositions,
}

impl ExpansionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionType::Dynamic => "DYNAMIC",
            ExpansionType::Expert => "EXPERT",
            ExpansionType::OpenPositions => "OPEN_POSITIONS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TaskPayload {
    Analysis {
        expert_instance_id: i64,
        symbol: String,
        use_case: AnalysisUseCase,
        bypass_balance_check: bool,
        bypass_transaction_check: bool,
    },
    InstrumentExpansion {
        expert_instance_id: i64,
        expansion_type: ExpansionType,
        use_case: AnalysisUseCase,
    },
}

impl TaskPayload {
    /// Dedup key: real symbols dedup against other analyses of the same
    /// `(expert, symbol, use_case)`; special expansion symbols dedup
    /// separately, namespaced by expansion type so they never collide with a
    /// real ticker of the same spelling (Open Question 3, SPEC_FULL §4.3).
    pub fn dedup_key(&self) -> String {
        match self {
            TaskPayload::Analysis { expert_instance_id, symbol, use_case, .. } => {
                format!("analysis:{expert_instance_id}:{symbol}:{}", use_case.as_str())
            }
            TaskPayload::InstrumentExpansion { expert_instance_id, expansion_type, use_case } => {
                format!(
                    "expansion:{expert_instance_id}:{}:{}",
                    expansion_type.as_str(),
                    use_case.as_str()
                )
            }
        }
    }

    pub fn kind_tag(&self) -> &'static str {
        match self {
            TaskPayload::Analysis { .. } => "analysis",
            TaskPayload::InstrumentExpansion { .. } => "expansion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "RUNNING" => TaskStatus::Running,
            "COMPLETED" => TaskStatus::Completed,
            "FAILED" => TaskStatus::Failed,
            "CANCELED" => TaskStatus::Canceled,
            _ => TaskStatus::Pending,
        }
    }
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: String,
    pub payload: TaskPayload,
    pub priority: i64,
    pub status: TaskStatus,
    pub batch_id: Option<String>,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub submitted_at: String,
    pub claimed_at: Option<String>,
    pub completed_at: Option<String>,
    pub seq: i64,
}

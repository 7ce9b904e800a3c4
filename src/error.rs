//! Error taxonomy (see spec §7).
//!
//! Pure computation layers (rules, conditions) never raise these — they catch
//! everything and fold it into a result entry instead. Everywhere else, these
//! are the explicit result type callers match on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate task for (expert={expert_instance_id}, symbol={symbol}, use_case={use_case:?})")]
    DuplicateTask {
        expert_instance_id: i64,
        symbol: String,
        use_case: crate::db::analysis::AnalysisUseCase,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("broker rejected order: {0}")]
    Broker(String),

    #[error("transient broker error: {0}")]
    BrokerTransient(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

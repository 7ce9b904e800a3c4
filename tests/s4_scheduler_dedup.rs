//! S4: a scheduled fire that lands while the previous fire for the same
//! `(expert, symbol, use_case)` is still pending must not queue twice.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use trade_core::db::analysis::AnalysisUseCase;
use trade_core::db::Db;
use trade_core::error::CoreError;
use trade_core::expert::ExpertRegistry;
use trade_core::queue::executor::{DefaultExecutor, TaskExecutor};
use trade_core::queue::task::TaskPayload;
use trade_core::queue::WorkerQueue;
use trade_core::scheduler::JobManager;

#[tokio::test]
async fn duplicate_scheduled_fire_is_rejected_while_prior_fire_is_pending() {
    // Zero workers: the task stays PENDING so the dedup check in `submit`
    // itself is what this test exercises, with no race against execution.
    let db = Db::open_in_memory().unwrap();
    let account = db.add_account("mock", "Test Account", None).await.unwrap();
    let experts = Arc::new(ExpertRegistry::new());
    let executor = Arc::new(DefaultExecutor::new(db.clone(), HashMap::new(), experts.clone()));
    let queue = WorkerQueue::new(db.clone(), executor.clone() as Arc<dyn TaskExecutor>, 0);
    executor.bind_queue(&queue);
    let job_manager = JobManager::new(db.clone(), queue.clone(), experts, HashMap::new());

    let ruleset = db.create_ruleset("noop", "ENTRY", "ENTER_MARKET").await.unwrap();
    let instance = db.add_expert_instance(account.id, "momentum", 100.0, Some(ruleset.id), None).await.unwrap();

    let first = job_manager.submit_manual(instance.id, "AAPL", AnalysisUseCase::EnterMarket).await.unwrap();

    let second = job_manager.submit_manual(instance.id, "AAPL", AnalysisUseCase::EnterMarket).await;

    match second {
        Err(CoreError::DuplicateTask { expert_instance_id, symbol, use_case }) => {
            assert_eq!(expert_instance_id, instance.id);
            assert_eq!(symbol, "AAPL");
            assert_eq!(use_case, AnalysisUseCase::EnterMarket);
        }
        other => panic!("expected DuplicateTask, got {other:?}"),
    }

    let all = queue.get_all().await.unwrap();
    let matching: Vec<_> = all
        .iter()
        .filter(|t| matches!(&t.payload, TaskPayload::Analysis { symbol, .. } if symbol == "AAPL"))
        .collect();
    assert_eq!(matching.len(), 1, "only the first fire should have produced a queued task");
    assert_eq!(matching[0].id, first.id);
}

//! S3: an OPEN_POSITIONS expansion task fans out one analysis task per
//! currently-open symbol, always at the highest (manual) priority,
//! regardless of the expansion task's own priority.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use trade_core::db::analysis::AnalysisUseCase;
use trade_core::db::transactions::{Side, TransactionStatus};
use trade_core::queue::executor::{DefaultExecutor, TaskExecutor};
use trade_core::queue::task::{ExpansionType, TaskPayload, TaskStatus};
use trade_core::queue::{Submission, WorkerQueue};
use trade_core::scheduler::MANUAL_PRIORITY;

#[tokio::test]
async fn open_positions_expansion_fans_out_only_open_symbols_at_manual_priority() {
    let acc = common::account().await;
    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();

    let mut opened = acc.db.create_transaction("AAPL", 10.0, Side::Buy, 100.0, instance.id).await.unwrap();
    opened.status = TransactionStatus::Opened;
    acc.db.update_transaction(&opened).await.unwrap();

    let mut waiting = acc.db.create_transaction("MSFT", 5.0, Side::Buy, 200.0, instance.id).await.unwrap();
    waiting.status = TransactionStatus::Waiting;
    acc.db.update_transaction(&waiting).await.unwrap();

    let mut closed = acc.db.create_transaction("GOOGL", 1.0, Side::Buy, 50.0, instance.id).await.unwrap();
    closed.status = TransactionStatus::Closed;
    acc.db.update_transaction(&closed).await.unwrap();

    let mut accounts = HashMap::new();
    accounts.insert(acc.account_id, acc.broker.clone());
    let experts = Arc::new(trade_core::expert::ExpertRegistry::new());
    let executor = Arc::new(DefaultExecutor::new(acc.db.clone(), accounts, experts));
    let queue = WorkerQueue::new(acc.db.clone(), executor.clone() as Arc<dyn TaskExecutor>, 2);
    executor.bind_queue(&queue);
    let _ = queue.spawn_workers();

    let task = queue
        .submit(Submission {
            payload: TaskPayload::InstrumentExpansion {
                expert_instance_id: instance.id,
                expansion_type: ExpansionType::OpenPositions,
                use_case: AnalysisUseCase::EnterMarket,
            },
            priority: 50,
            batch_id: None,
        })
        .await
        .unwrap();

    let status = common::wait_for_completion(&queue, &task.id).await;
    assert_eq!(status, TaskStatus::Completed);

    let all = queue.get_all().await.unwrap();
    let spawned: Vec<_> = all
        .iter()
        .filter(|t| matches!(&t.payload, TaskPayload::Analysis { expert_instance_id, .. } if *expert_instance_id == instance.id))
        .collect();

    let symbols: Vec<&str> = spawned
        .iter()
        .map(|t| match &t.payload {
            TaskPayload::Analysis { symbol, .. } => symbol.as_str(),
            _ => unreachable!(),
        })
        .collect();

    assert_eq!(symbols.len(), 2, "only AAPL and MSFT are still open");
    assert!(symbols.contains(&"AAPL"));
    assert!(symbols.contains(&"MSFT"));
    assert!(!symbols.contains(&"GOOGL"));

    for task in &spawned {
        assert_eq!(task.priority, MANUAL_PRIORITY, "expansion-spawned analyses always run at manual priority");
    }
}

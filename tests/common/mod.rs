//! Shared fixtures for the integration suite (spec §8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use trade_core::broker::base::BrokerAccountHandle;
use trade_core::broker::mock::MockBroker;
use trade_core::broker::price_cache::PriceCache;
use trade_core::broker::BrokerAccount;
use trade_core::db::Db;
use trade_core::expert::{Expert, ExpertRegistry, MomentumExpert};
use trade_core::queue::executor::{DefaultExecutor, TaskExecutor};
use trade_core::queue::task::TaskStatus;
use trade_core::queue::WorkerQueue;
use trade_core::scheduler::JobManager;

/// A lone account + broker, for tests that drive `BrokerAccountHandle`
/// directly without going through the queue/scheduler.
pub struct Account {
    pub db: Db,
    pub mock: Arc<MockBroker>,
    pub account_id: i64,
    pub broker: Arc<BrokerAccountHandle>,
}

pub async fn account() -> Account {
    let db = Db::open_in_memory().unwrap();
    let account = db.add_account("mock", "Test Account", None).await.unwrap();
    let mock = Arc::new(MockBroker::new());
    let provider: Arc<dyn BrokerAccount> = mock.clone();
    let price_cache = Arc::new(PriceCache::new(60));
    let broker = Arc::new(BrokerAccountHandle::new(account.id, db.clone(), provider, price_cache));
    Account { db, mock, account_id: account.id, broker }
}

/// Full Worker Queue + Job Manager stack wired to a single mock account, for
/// tests that exercise scheduling and the Trade Action Engine end to end.
pub struct Pipeline {
    pub db: Db,
    pub mock: Arc<MockBroker>,
    pub account_id: i64,
    pub queue: Arc<WorkerQueue>,
    pub job_manager: Arc<JobManager>,
}

pub async fn pipeline() -> Pipeline {
    let db = Db::open_in_memory().unwrap();
    let account = db.add_account("mock", "Test Account", None).await.unwrap();
    let mock = Arc::new(MockBroker::new());
    let provider: Arc<dyn BrokerAccount> = mock.clone();
    let price_cache = Arc::new(PriceCache::new(60));
    let broker = Arc::new(BrokerAccountHandle::new(account.id, db.clone(), provider, price_cache));

    let mut accounts = HashMap::new();
    accounts.insert(account.id, broker);

    let mut registry = ExpertRegistry::new();
    registry.register("momentum", || Arc::new(MomentumExpert) as Arc<dyn Expert>);
    let experts = Arc::new(registry);

    let executor = Arc::new(DefaultExecutor::new(db.clone(), accounts.clone(), experts.clone()));
    let queue = WorkerQueue::new(db.clone(), executor.clone() as Arc<dyn TaskExecutor>, 2);
    executor.bind_queue(&queue);
    let _ = queue.spawn_workers();

    let job_manager = JobManager::new(db.clone(), queue.clone(), experts, accounts);

    Pipeline { db, mock, account_id: account.id, queue, job_manager }
}

/// Polls a queue task until it reaches a terminal status, panicking after a
/// couple of seconds so a regression fails fast instead of hanging.
pub async fn wait_for_completion(queue: &Arc<WorkerQueue>, task_id: &str) -> TaskStatus {
    for _ in 0..150 {
        if let Some(status) = queue.get_task_status(task_id).await.unwrap() {
            if status.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} did not reach a terminal status in time");
}

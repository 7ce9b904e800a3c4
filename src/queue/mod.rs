//! Worker Queue (spec §4.D): a prioritised, deduplicating, persisted task
//! queue with bounded-concurrency execution. Grounded in the teacher's
//! `vault/pool.rs` worker-pool naming and its `tokio::spawn` +
//! `tokio::sync::mpsc`/`broadcast` background-loop idiom in main.rs.

pub mod executor;
pub mod task;

use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use executor::TaskExecutor;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use task::{QueueTask, TaskStatus};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};
use uuid::Uuid;

/// In-memory priority key: lower `priority` sorts first, ties broken by
/// submission `seq` ascending (spec §4.D "strict priority, FIFO tiebreak").
/// Wrapped in `Reverse` so `BinaryHeap` (a max-heap) pops the smallest key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    priority: i64,
    seq: i64,
}

struct HeapEntry {
    key: PriorityKey,
    task_id: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// Submission parameters for a new task (spec §4.D task kinds).
pub struct Submission {
    pub payload: task::TaskPayload,
    pub priority: i64,
    pub batch_id: Option<String>,
}

/// The prioritised, persisted task queue plus its bounded worker pool.
pub struct WorkerQueue {
    db: Db,
    pending: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
    notify: Notify,
    executor: Arc<dyn TaskExecutor>,
    worker_count: usize,
}

impl WorkerQueue {
    pub fn new(db: Db, executor: Arc<dyn TaskExecutor>, worker_count: usize) -> Arc<Self> {
        Arc::new(Self {
            db,
            pending: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            executor,
            worker_count: worker_count.max(1),
        })
    }

    /// Startup recovery (spec §4.D, §7): any task left RUNNING across a
    /// restart is marked FAILED; PENDING tasks are reloaded into the
    /// in-memory heap so they're picked up by the worker pool.
    pub async fn recover(&self) -> CoreResult<()> {
        let failed = self.db.fail_stuck_running_tasks().await?;
        if failed > 0 {
            warn!(count = failed, "marked stuck RUNNING tasks as FAILED after restart");
        }
        let pending = self.db.list_queue_tasks_by_status(TaskStatus::Pending).await?;
        let mut heap = self.pending.lock().await;
        for task in pending {
            heap.push(Reverse(HeapEntry {
                key: PriorityKey { priority: task.priority, seq: task.seq },
                task_id: task.id,
            }));
        }
        Ok(())
    }

    /// Submits a new task, rejecting duplicates sharing an active dedup key
    /// (spec §4.D "rejects ... any duplicate").
    pub async fn submit(&self, submission: Submission) -> CoreResult<QueueTask> {
        let dedup_key = submission.payload.dedup_key();
        let existing = self.db.active_tasks_with_dedup_key(&dedup_key).await?;
        if let Some(dup) = existing.into_iter().next() {
            return Err(match &dup.payload {
                task::TaskPayload::Analysis { expert_instance_id, symbol, use_case, .. } => CoreError::DuplicateTask {
                    expert_instance_id: *expert_instance_id,
                    symbol: symbol.clone(),
                    use_case: *use_case,
                },
                task::TaskPayload::InstrumentExpansion { expert_instance_id, use_case, .. } => CoreError::DuplicateTask {
                    expert_instance_id: *expert_instance_id,
                    symbol: dedup_key.clone(),
                    use_case: *use_case,
                },
            });
        }

        let task = QueueTask {
            id: Uuid::new_v4().to_string(),
            payload: submission.payload,
            priority: submission.priority,
            status: TaskStatus::Pending,
            batch_id: submission.batch_id,
            retry_count: 0,
            error_message: None,
            submitted_at: crate::db::now_iso(),
            claimed_at: None,
            completed_at: None,
            seq: self.db.next_seq(),
        };
        self.db.insert_queue_task(&task).await?;

        let mut heap = self.pending.lock().await;
        heap.push(Reverse(HeapEntry {
            key: PriorityKey { priority: task.priority, seq: task.seq },
            task_id: task.id.clone(),
        }));
        drop(heap);
        self.notify.notify_one();
        Ok(task)
    }

    /// Cancels a PENDING task; a no-op (`false`) once claimed (spec §4.D).
    pub async fn cancel(&self, task_id: &str) -> CoreResult<bool> {
        let Some(task) = self.db.get_queue_task(task_id).await? else {
            return Err(CoreError::NotFound(format!("queue task {task_id}")));
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        self.db.finalize_queue_task(task_id, TaskStatus::Canceled, None).await?;
        let mut heap = self.pending.lock().await;
        heap.retain(|Reverse(e)| e.task_id != task_id);
        Ok(true)
    }

    pub async fn get_pending(&self) -> CoreResult<Vec<QueueTask>> {
        Ok(self.db.list_queue_tasks_by_status(TaskStatus::Pending).await?)
    }

    pub async fn get_running(&self) -> CoreResult<Vec<QueueTask>> {
        Ok(self.db.list_queue_tasks_by_status(TaskStatus::Running).await?)
    }

    pub async fn get_all(&self) -> CoreResult<Vec<QueueTask>> {
        Ok(self.db.list_all_queue_tasks().await?)
    }

    pub async fn get_task_status(&self, task_id: &str) -> CoreResult<Option<TaskStatus>> {
        Ok(self.db.get_queue_task(task_id).await?.map(|t| t.status))
    }

    async fn claim_next(&self) -> Option<String> {
        let mut heap = self.pending.lock().await;
        heap.pop().map(|Reverse(e)| e.task_id)
    }

    /// Spawns the bounded worker pool. Each worker loops: wait for work,
    /// claim the highest-priority pending task, execute it, finalize (spec
    /// §5 "each worker loops").
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_count)
            .map(|idx| {
                let queue = self.clone();
                tokio::spawn(async move { queue.worker_loop(idx).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, worker_idx: usize) {
        loop {
            let task_id = match self.claim_next().await {
                Some(id) => id,
                None => {
                    self.notify.notified().await;
                    continue;
                }
            };
            let Ok(Some(task)) = self.db.get_queue_task(&task_id).await else { continue };
            if task.status != TaskStatus::Pending {
                continue;
            }
            if let Err(e) = self.db.claim_queue_task(&task_id).await {
                error!(worker = worker_idx, error = %e, "failed to claim queue task");
                continue;
            }
            info!(worker = worker_idx, task_id = %task_id, "claimed task");

            let result = self.executor.execute(&task).await;
            match result {
                Ok(()) => {
                    if let Err(e) = self.db.finalize_queue_task(&task_id, TaskStatus::Completed, None).await {
                        error!(task_id = %task_id, error = %e, "failed to finalize completed task");
                    }
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "task failed");
                    if let Err(db_err) = self.db.finalize_queue_task(&task_id, TaskStatus::Failed, Some(e.to_string())).await {
                        error!(task_id = %task_id, error = %db_err, "failed to finalize failed task");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::analysis::AnalysisUseCase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        count: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(&self, _task: &QueueTask) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn analysis_submission(expert_instance_id: i64, symbol: &str, priority: i64) -> Submission {
        Submission {
            payload: task::TaskPayload::Analysis {
                expert_instance_id,
                symbol: symbol.to_string(),
                use_case: AnalysisUseCase::EnterMarket,
                bypass_balance_check: false,
                bypass_transaction_check: false,
            },
            priority,
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let executor = Arc::new(CountingExecutor { count: AtomicUsize::new(0) });
        let queue = WorkerQueue::new(db, executor, 1);
        queue.submit(analysis_submission(1, "AAPL", 0)).await.unwrap();
        let err = queue.submit(analysis_submission(1, "AAPL", 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn worker_processes_submitted_task() {
        let db = Db::open_in_memory().unwrap();
        let executor = Arc::new(CountingExecutor { count: AtomicUsize::new(0) });
        let queue = WorkerQueue::new(db, executor.clone(), 2);
        queue.submit(analysis_submission(1, "AAPL", 0)).await.unwrap();
        let _handles = queue.spawn_workers();
        for _ in 0..50 {
            if executor.count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(executor.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_pending_succeeds_claimed_is_noop() {
        let db = Db::open_in_memory().unwrap();
        let executor = Arc::new(CountingExecutor { count: AtomicUsize::new(0) });
        let queue = WorkerQueue::new(db, executor, 0);
        let task = queue.submit(analysis_submission(1, "MSFT", 0)).await.unwrap();
        assert!(queue.cancel(&task.id).await.unwrap());
        assert!(!queue.cancel(&task.id).await.unwrap());
    }
}

//! Job Manager (spec §4.E): materialises per-expert, per-symbol, per-use-case
//! analysis jobs from schedule settings and fires them into the Worker
//! Queue. Grounded in the teacher's `tokio::time::interval` periodic-task
//! idiom in main.rs and its `tokio::sync::broadcast`/`mpsc` control-channel
//! pattern for the websocket server's shutdown signalling.

pub mod control;
pub mod schedule;

use crate::broker::base::BrokerAccountHandle;
use crate::db::activity::Severity;
use crate::db::analysis::AnalysisUseCase;
use crate::db::experts::ExpertInstance;
use crate::db::settings::{SettingOwner, SettingValue};
use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::expert::{ExpertContext, ExpertRegistry};
use crate::queue::task::{ExpansionType, QueueTask, TaskPayload};
use crate::queue::{Submission, WorkerQueue};
use chrono::{Datelike, NaiveTime, Timelike, Utc};
use control::{ControlCommand, ControlPlane};
use schedule::Schedule;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Manual submissions win over scheduled ones (spec §4.D "priority 10 ...
/// manual submissions, which use 0").
pub const MANUAL_PRIORITY: i64 = 0;
pub const SCHEDULED_PRIORITY: i64 = 10;

#[derive(Debug, Clone)]
struct ScheduledJob {
    job_id: String,
    expert_instance_id: i64,
    symbol: String,
    use_case: AnalysisUseCase,
    schedule: Schedule,
}

/// Background scheduler plus its control plane and the periodic account
/// refresh job (spec §4.E).
pub struct JobManager {
    db: Db,
    queue: Arc<WorkerQueue>,
    experts: Arc<ExpertRegistry>,
    accounts: HashMap<i64, Arc<BrokerAccountHandle>>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    last_fired: Mutex<HashMap<String, String>>,
    control_tx: mpsc::Sender<ControlCommand>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlCommand>>>,
}

impl JobManager {
    pub fn new(
        db: Db,
        queue: Arc<WorkerQueue>,
        experts: Arc<ExpertRegistry>,
        accounts: HashMap<i64, Arc<BrokerAccountHandle>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(64);
        Arc::new(Self {
            db,
            queue,
            experts,
            accounts,
            jobs: Mutex::new(HashMap::new()),
            last_fired: Mutex::new(HashMap::new()),
            control_tx: tx,
            control_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane::new(self.control_tx.clone())
    }

    /// Job IDs currently materialised, for the diagnostics API (spec §4.G).
    pub async fn list_job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Rebuilds the whole job registry from every enabled expert instance's
    /// schedule settings (spec §4.E "Jobs scheduled at startup (and kept in
    /// sync afterwards)").
    pub async fn refresh_all(&self) -> anyhow::Result<()> {
        let instances = self.db.list_enabled_expert_instances().await?;
        self.jobs.lock().await.clear();
        for instance in &instances {
            self.refresh_one(instance).await?;
        }
        self.db
            .log_activity(
                Severity::Info,
                "scheduler_refresh",
                "job registry rebuilt for all enabled experts",
                serde_json::json!({"expert_count": instances.len()}),
                None,
                None,
            )
            .await?;
        Ok(())
    }

    /// Rebuilds only one expert's jobs (spec §4.E `REFRESH_EXPERT_SCHEDULES{expert_id}`).
    pub async fn refresh_expert(&self, expert_id: i64) -> anyhow::Result<()> {
        self.jobs.lock().await.retain(|_, j| j.expert_instance_id != expert_id);
        if let Some(instance) = self.db.get_expert_instance(expert_id).await? {
            if instance.enabled {
                self.refresh_one(&instance).await?;
            }
        }
        Ok(())
    }

    async fn refresh_one(&self, instance: &ExpertInstance) -> anyhow::Result<()> {
        if let Some(raw) = self
            .db
            .get_setting(SettingOwner::Expert(instance.id), "execution_schedule_enter_market")
            .await?
        {
            if let Some(schedule) = parse_schedule(&raw) {
                self.materialize_enter_market(instance, schedule).await?;
            }
        }
        if let Some(raw) = self
            .db
            .get_setting(SettingOwner::Expert(instance.id), "execution_schedule_open_positions")
            .await?
        {
            if let Some(schedule) = parse_schedule(&raw) {
                self.add_job(instance.id, "OPEN_POSITIONS", AnalysisUseCase::OpenPositions, schedule).await;
            }
        }
        Ok(())
    }

    /// Spec §4.E: materialisation depends on the expert's
    /// `instrument_selection_method` setting.
    async fn materialize_enter_market(&self, instance: &ExpertInstance, schedule: Schedule) -> anyhow::Result<()> {
        let method = self
            .db
            .get_setting(SettingOwner::Expert(instance.id), "instrument_selection_method")
            .await?
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "static".to_string());

        match method.as_str() {
            "dynamic" => {
                self.add_job(instance.id, "DYNAMIC", AnalysisUseCase::EnterMarket, schedule).await;
            }
            "expert" => {
                self.add_job(instance.id, "EXPERT", AnalysisUseCase::EnterMarket, schedule).await;
            }
            _ => {
                let Some(broker) = self.accounts.get(&instance.account_id).cloned() else {
                    warn!(expert_instance_id = instance.id, "no broker bound, skipping static schedule materialisation");
                    return Ok(());
                };
                let Some(expert) = self.experts.resolve(&instance.expert_class_tag) else {
                    warn!(expert_instance_id = instance.id, tag = %instance.expert_class_tag, "unknown expert class tag");
                    return Ok(());
                };
                let ctx = ExpertContext {
                    db: self.db.clone(),
                    instance: instance.clone(),
                    broker,
                };
                let symbols = expert.get_enabled_instruments(&ctx).await?;
                for symbol in symbols {
                    self.add_job(instance.id, &symbol, AnalysisUseCase::EnterMarket, schedule.clone()).await;
                }
            }
        }
        Ok(())
    }

    async fn add_job(&self, expert_instance_id: i64, symbol: &str, use_case: AnalysisUseCase, schedule: Schedule) {
        if let Err(e) = schedule.validate() {
            warn!(expert_instance_id, symbol, "invalid schedule, skipping: {e}");
            return;
        }
        let job_id = job_id_for(expert_instance_id, symbol, use_case);
        let job = ScheduledJob {
            job_id: job_id.clone(),
            expert_instance_id,
            symbol: symbol.to_string(),
            use_case,
            schedule,
        };
        // Re-scheduling an existing ID replaces the job (spec §4.E).
        self.jobs.lock().await.insert(job_id, job);
    }

    /// Manual submission API — shares dedup/validation with scheduled fires
    /// (spec §4.E "Manual submissions go through the same Job Manager API").
    pub async fn submit_manual(&self, expert_instance_id: i64, symbol: &str, use_case: AnalysisUseCase) -> CoreResult<QueueTask> {
        self.submit_for(expert_instance_id, symbol, use_case, MANUAL_PRIORITY, None, true, true).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit_for(
        &self,
        expert_instance_id: i64,
        symbol: &str,
        use_case: AnalysisUseCase,
        priority: i64,
        batch_id: Option<String>,
        bypass_balance_check: bool,
        bypass_transaction_check: bool,
    ) -> CoreResult<QueueTask> {
        self.db.ensure_instrument(symbol).await?;
        if is_special_symbol(symbol) {
            let expansion_type = match symbol {
                "DYNAMIC" => ExpansionType::Dynamic,
                "EXPERT" => ExpansionType::Expert,
                _ => ExpansionType::OpenPositions,
            };
            self.queue
                .submit(Submission {
                    payload: TaskPayload::InstrumentExpansion {
                        expert_instance_id,
                        expansion_type,
                        use_case,
                    },
                    priority,
                    batch_id,
                })
                .await
        } else {
            self.queue
                .submit(Submission {
                    payload: TaskPayload::Analysis {
                        expert_instance_id,
                        symbol: symbol.to_string(),
                        use_case,
                        bypass_balance_check,
                        bypass_transaction_check,
                    },
                    priority,
                    batch_id,
                })
                .await
        }
    }

    /// Spec §4.E "When a scheduled job fires".
    async fn fire(&self, job: &ScheduledJob) {
        let now = Utc::now();
        let batch_id = format!("{}_{}_{}", job.expert_instance_id, now.format("%H%M"), now.format("%Y%m%d"));

        if !is_special_symbol(&job.symbol) {
            let skip = match job.use_case {
                AnalysisUseCase::EnterMarket => self
                    .db
                    .has_open_transaction(job.expert_instance_id, &job.symbol)
                    .await
                    .unwrap_or(false),
                AnalysisUseCase::OpenPositions => !self
                    .db
                    .has_open_transaction(job.expert_instance_id, &job.symbol)
                    .await
                    .unwrap_or(true),
            };
            if skip {
                info!(job_id = %job.job_id, "skipping scheduled fire, precondition not met");
                return;
            }
        }

        match self
            .submit_for(job.expert_instance_id, &job.symbol, job.use_case, SCHEDULED_PRIORITY, Some(batch_id), false, false)
            .await
        {
            Ok(_) | Err(CoreError::DuplicateTask { .. }) => {}
            Err(e) => warn!(job_id = %job.job_id, error = %e, "scheduled submission failed"),
        }
    }

    async fn run_account_refresh(&self) {
        for broker in self.accounts.values() {
            if let Err(e) = broker.refresh_orders().await {
                warn!(error = %e, "account refresh: refresh_orders failed");
            }
            if let Err(e) = broker.refresh_transactions().await {
                warn!(error = %e, "account refresh: refresh_transactions failed");
            }
        }
    }

    async fn account_refresh_interval_minutes(&self) -> i64 {
        self.db
            .get_setting_or_default(SettingOwner::App, "account_refresh_interval", SettingValue::Float(5.0))
            .await
            .as_f64()
            .unwrap_or(5.0)
            .max(1.0) as i64
    }

    /// Spawns the scheduler executor, the account refresh loop, and the
    /// control-plane consumer (spec §4.E / §5).
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let ticker = self.clone();
        let refresher = self.clone();
        let controller = self.clone();
        vec![
            tokio::spawn(async move { ticker.tick_loop().await }),
            tokio::spawn(async move { refresher.account_refresh_loop().await }),
            tokio::spawn(async move { controller.control_loop().await }),
        ]
    }

    /// Fires every trigger due this minute, at most once each (overlapping
    /// executions for a given job are coalesced per spec §4.E).
    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(20));
        loop {
            interval.tick().await;
            let now = Utc::now();
            let weekday = now.weekday();
            let time = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap();
            let minute_key = now.format("%Y-%m-%d %H:%M").to_string();

            let jobs = self.jobs.lock().await;
            let mut to_fire = Vec::new();
            {
                let mut last_fired = self.last_fired.lock().await;
                for job in jobs.values() {
                    if job.schedule.matches(weekday, time) && last_fired.get(&job.job_id) != Some(&minute_key) {
                        last_fired.insert(job.job_id.clone(), minute_key.clone());
                        to_fire.push(job.clone());
                    }
                }
            }
            drop(jobs);

            for job in &to_fire {
                self.fire(job).await;
            }
        }
    }

    async fn account_refresh_loop(self: Arc<Self>) {
        loop {
            let minutes = self.account_refresh_interval_minutes().await;
            tokio::time::sleep(std::time::Duration::from_secs((minutes * 60) as u64)).await;
            self.run_account_refresh().await;
        }
    }

    /// Serialises control-plane commands so the UI never blocks on the
    /// scheduler lock (spec §4.E / §5 FIFO ordering guarantee).
    async fn control_loop(self: Arc<Self>) {
        let Some(mut rx) = self.control_rx.lock().await.take() else {
            return;
        };
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ControlCommand::RefreshExpertSchedules { expert_id } => {
                    let result = match expert_id {
                        Some(id) => self.refresh_expert(id).await,
                        None => self.refresh_all().await,
                    };
                    if let Err(e) = result {
                        warn!(error = %e, "scheduler refresh failed");
                    }
                }
                ControlCommand::Shutdown => {
                    info!("job manager control plane shutting down");
                    break;
                }
            }
        }
    }
}

fn job_id_for(expert_instance_id: i64, symbol: &str, use_case: AnalysisUseCase) -> String {
    format!("expert_{expert_instance_id}_symbol_{symbol}_subtype_{}", use_case.as_str())
}

fn is_special_symbol(symbol: &str) -> bool {
    matches!(symbol, "DYNAMIC" | "EXPERT" | "OPEN_POSITIONS")
}

fn parse_schedule(value: &SettingValue) -> Option<Schedule> {
    serde_json::from_value(value.as_json()?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::executor::{DefaultExecutor, TaskExecutor};

    async fn test_manager() -> (Arc<JobManager>, Db) {
        let db = Db::open_in_memory().unwrap();
        let executor = Arc::new(DefaultExecutor::new(db.clone(), HashMap::new(), Arc::new(ExpertRegistry::new())));
        let queue = WorkerQueue::new(db.clone(), executor.clone() as Arc<dyn TaskExecutor>, 0);
        let manager = JobManager::new(db.clone(), queue, Arc::new(ExpertRegistry::new()), HashMap::new());
        (manager, db)
    }

    #[tokio::test]
    async fn job_id_is_deterministic() {
        assert_eq!(job_id_for(3, "AAPL", AnalysisUseCase::EnterMarket), "expert_3_symbol_AAPL_subtype_ENTER_MARKET");
    }

    #[tokio::test]
    async fn manual_submission_creates_pending_task() {
        let (manager, db) = test_manager().await;
        let expert = db.add_expert_instance(1, "momentum", 10.0, None, None).await.unwrap();
        let task = manager.submit_manual(expert.id, "AAPL", AnalysisUseCase::EnterMarket).await.unwrap();
        match task.payload {
            TaskPayload::Analysis { symbol, .. } => assert_eq!(symbol, "AAPL"),
            _ => panic!("expected analysis task"),
        }
    }

    #[tokio::test]
    async fn refresh_all_materialises_open_positions_job() {
        let (manager, db) = test_manager().await;
        let expert = db.add_expert_instance(1, "momentum", 10.0, None, None).await.unwrap();
        db.set_setting(
            SettingOwner::Expert(expert.id),
            "execution_schedule_open_positions",
            SettingValue::Json(serde_json::json!({"days": {"monday": true}, "times": ["09:30"]})),
        )
        .await
        .unwrap();
        manager.refresh_all().await.unwrap();
        let jobs = manager.jobs.lock().await;
        assert!(jobs.contains_key(&job_id_for(expert.id, "OPEN_POSITIONS", AnalysisUseCase::OpenPositions)));
    }
}

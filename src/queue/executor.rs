//! Executor contract (spec §4.D "Executor contract"): turns a claimed
//! `QueueTask` into DB writes, expert calls, and — for analyses — a Trade
//! Action Engine pass that submits orders through the broker layer.

use super::task::{ExpansionType, QueueTask, TaskPayload};
use super::{Submission, WorkerQueue};
use crate::ai_selector::AiInstrumentSelector;
use crate::broker::base::{BrokerAccountHandle, OrderDraft};
use crate::db::analysis::{AnalysisStatus, AnalysisUseCase};
use crate::db::transactions::Side;
use crate::db::Db;
use crate::expert::{Expert, ExpertContext, ExpertRegistry};
use crate::rules::actions::ActionDescriptor;
use crate::rules::conditions::EvaluationContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tracing::{info, warn};

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &QueueTask) -> anyhow::Result<()>;
}

/// The production executor: one `BrokerAccountHandle` per broker account,
/// keyed by `AccountDefinition.id`, plus the expert registry (spec §9:
/// "string tag -> factory").
pub struct DefaultExecutor {
    db: Db,
    accounts: HashMap<i64, Arc<BrokerAccountHandle>>,
    experts: Arc<ExpertRegistry>,
    ai_selector: Option<Arc<dyn AiInstrumentSelector>>,
    queue: OnceCell<Weak<WorkerQueue>>,
    max_instruments: usize,
}

impl DefaultExecutor {
    pub fn new(db: Db, accounts: HashMap<i64, Arc<BrokerAccountHandle>>, experts: Arc<ExpertRegistry>) -> Self {
        Self::with_ai_selector(db, accounts, experts, None)
    }

    /// Same as `new`, but wires a concrete `AiInstrumentSelector` for the
    /// `DYNAMIC` expansion path (spec §4.D). No concrete selector ships in
    /// this crate (Open Question 6, DESIGN.md) — `main.rs` currently passes
    /// `None` here, so `run_expansion_task` falls back to the expert's own
    /// `get_recommended_instruments`.
    pub fn with_ai_selector(
        db: Db,
        accounts: HashMap<i64, Arc<BrokerAccountHandle>>,
        experts: Arc<ExpertRegistry>,
        ai_selector: Option<Arc<dyn AiInstrumentSelector>>,
    ) -> Self {
        Self {
            db,
            accounts,
            experts,
            ai_selector,
            queue: OnceCell::new(),
            max_instruments: 20,
        }
    }

    /// Completes the back-reference to the owning queue once it exists, so
    /// executors spawned from within a task (expansion -> analysis) resubmit
    /// through the same dedup/persistence path (spec §4.D).
    pub fn bind_queue(&self, queue: &Arc<WorkerQueue>) {
        let _ = self.queue.set(Arc::downgrade(queue));
    }

    fn queue(&self) -> anyhow::Result<Arc<WorkerQueue>> {
        self.queue
            .get()
            .and_then(|w| w.upgrade())
            .ok_or_else(|| anyhow::anyhow!("executor not bound to a queue"))
    }

    async fn broker_for_expert(&self, expert_instance_id: i64) -> anyhow::Result<Arc<BrokerAccountHandle>> {
        let instance = self
            .db
            .get_expert_instance(expert_instance_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("expert instance {expert_instance_id} not found"))?;
        self.accounts
            .get(&instance.account_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no broker account bound for account {}", instance.account_id))
    }

    async fn run_analysis_task(
        &self,
        expert_instance_id: i64,
        symbol: &str,
        use_case: AnalysisUseCase,
        bypass_balance_check: bool,
        bypass_transaction_check: bool,
    ) -> anyhow::Result<()> {
        let instance = self
            .db
            .get_expert_instance(expert_instance_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("expert instance {expert_instance_id} not found"))?;

        if use_case == AnalysisUseCase::EnterMarket && !bypass_transaction_check {
            if self.db.has_open_transaction(expert_instance_id, symbol).await? {
                info!(expert_instance_id, symbol, "skipping ENTER_MARKET, transaction already open");
                return Ok(());
            }
        }

        self.db.ensure_instrument(symbol).await?;
        let broker = self.broker_for_expert(expert_instance_id).await?;

        if use_case == AnalysisUseCase::EnterMarket && !bypass_balance_check {
            let info = broker.get_account_info().await?;
            if info.cash <= 0.0 {
                info!(expert_instance_id, symbol, "skipping ENTER_MARKET, no cash available");
                return Ok(());
            }
        }

        let expert = self
            .experts
            .resolve(&instance.expert_class_tag)
            .ok_or_else(|| anyhow::anyhow!("no expert registered for tag {}", instance.expert_class_tag))?;

        let analysis = self.db.create_market_analysis(symbol, expert_instance_id, use_case).await?;
        self.db
            .update_market_analysis_status(analysis.id, AnalysisStatus::Running, None)
            .await?;

        let ctx = ExpertContext {
            db: self.db.clone(),
            instance: instance.clone(),
            broker: broker.clone(),
        };

        match expert.run_analysis(&ctx, symbol, analysis.id).await {
            Ok(()) => {
                self.db
                    .update_market_analysis_status(analysis.id, AnalysisStatus::Completed, None)
                    .await?;
            }
            Err(e) => {
                self.db
                    .update_market_analysis_status(
                        analysis.id,
                        AnalysisStatus::Failed,
                        Some(serde_json::json!({"failure_reason": e.to_string()})),
                    )
                    .await?;
                self.db
                    .log_activity(
                        crate::db::activity::Severity::Error,
                        "analysis_failed",
                        &format!("analysis {} failed: {e}", analysis.id),
                        serde_json::json!({"market_analysis_id": analysis.id}),
                        Some(broker.account_id),
                        Some(expert_instance_id),
                    )
                    .await?;
                return Err(e);
            }
        }

        self.apply_recommendation(&ctx, analysis.id, symbol).await
    }

    /// Immediately translates the produced recommendation into broker
    /// actions through the Trade Action Engine (spec §4.D executor contract,
    /// last sentence).
    async fn apply_recommendation(&self, ctx: &ExpertContext, market_analysis_id: i64, symbol: &str) -> anyhow::Result<()> {
        let Some(recommendation) = self.db.latest_recommendation_for_analysis(market_analysis_id).await? else {
            return Ok(());
        };
        let Some(ruleset_id) = ctx.instance.ruleset_id else {
            return Ok(());
        };

        let has_position = self.db.has_open_transaction(ctx.instance.id, symbol).await?;
        let open_symbols = self.db.open_symbols_for_expert(ctx.instance.id).await?;

        let open_tx = self
            .db
            .list_transactions()
            .await?
            .into_iter()
            .find(|t| t.symbol == symbol && t.expert_instance_id == ctx.instance.id && t.status != crate::db::transactions::TransactionStatus::Closed);

        // days_opened / profit_loss_percent are computed against whatever
        // existing transaction this expert has open on this symbol (spec
        // §4.C.2: "against a supplied existing order's creation time"); both
        // stay None when there is none, which the engine already treats as
        // "condition evaluates false" rather than an error.
        let (days_opened, profit_loss_percent) = match &open_tx {
            Some(tx) => {
                let days = tx
                    .open_date
                    .as_deref()
                    .map(|d| (chrono::Utc::now() - crate::db::parse_ts(d)).num_seconds() as f64 / 86_400.0);
                let pl = match tx.open_price {
                    Some(open_price) if open_price > 0.0 => {
                        match ctx.broker.get_instrument_current_price(symbol, crate::broker::price_cache::PriceType::Mid).await {
                            Ok(current) => {
                                let raw = (current - open_price) / open_price * 100.0;
                                Some(if tx.side == Side::Sell { -raw } else { raw })
                            }
                            Err(_) => None,
                        }
                    }
                    _ => None,
                };
                (days, pl)
            }
            None => (None, None),
        };

        let eval_ctx = EvaluationContext {
            bullish: recommendation.action == crate::db::recommendations::RecommendedAction::Buy,
            bearish: recommendation.action == crate::db::recommendations::RecommendedAction::Sell,
            has_position,
            has_position_account_wide: !open_symbols.is_empty(),
            confidence: recommendation.confidence,
            expected_profit_target_percent: recommendation.expected_profit_percent,
            risk_level: Some(recommendation.risk_level),
            time_horizon: Some(recommendation.time_horizon),
            current_rating: Some(recommendation.action),
            days_opened,
            profit_loss_percent,
        };

        let results = crate::rules::evaluate_ruleset(&self.db, ruleset_id, &eval_ctx).await;
        for result in results {
            match result {
                crate::rules::EngineResult::Actions { actions, .. } => {
                    self.execute_actions(ctx, symbol, actions).await?;
                }
                crate::rules::EngineResult::Error(msg) => {
                    warn!(expert_instance_id = ctx.instance.id, symbol, "rule engine error: {msg}");
                }
            }
        }
        Ok(())
    }

    async fn execute_actions(&self, ctx: &ExpertContext, symbol: &str, actions: Vec<ActionDescriptor>) -> anyhow::Result<()> {
        let mut open_tx = self
            .db
            .list_transactions()
            .await?
            .into_iter()
            .find(|t| t.symbol == symbol && t.expert_instance_id == ctx.instance.id && t.status != crate::db::transactions::TransactionStatus::Closed);

        for action in actions {
            match action {
                ActionDescriptor::Buy { quantity } => {
                    let draft = OrderDraft::market_entry(symbol, Side::Buy, quantity, ctx.instance.id);
                    let order = ctx.broker.submit_order(draft).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    if let Some(tx_id) = order.transaction_id {
                        open_tx = self.db.get_transaction(tx_id).await?;
                    }
                }
                ActionDescriptor::Sell { quantity } => {
                    let draft = OrderDraft::market_entry(symbol, Side::Sell, quantity, ctx.instance.id);
                    let order = ctx.broker.submit_order(draft).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    if let Some(tx_id) = order.transaction_id {
                        open_tx = self.db.get_transaction(tx_id).await?;
                    }
                }
                ActionDescriptor::SetTp { percent } => {
                    if let Some(tx) = &open_tx {
                        let open_price = tx.open_price.unwrap_or(0.0);
                        let price = crate::broker::base::target_price(tx.side, open_price, percent, true);
                        ctx.broker.adjust_tp(tx.id, price).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    }
                }
                ActionDescriptor::SetSl { percent } => {
                    if let Some(tx) = &open_tx {
                        let open_price = tx.open_price.unwrap_or(0.0);
                        let price = crate::broker::base::target_price(tx.side, open_price, percent, false);
                        ctx.broker.adjust_sl(tx.id, price).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    }
                }
                ActionDescriptor::AdjustTpSl { tp_percent, sl_percent } => {
                    if let Some(tx) = &open_tx {
                        let open_price = tx.open_price.unwrap_or(0.0);
                        let tp = crate::broker::base::target_price(tx.side, open_price, tp_percent, true);
                        let sl = crate::broker::base::target_price(tx.side, open_price, sl_percent, false);
                        ctx.broker.adjust_tp_sl(tx.id, tp, sl).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    }
                }
                ActionDescriptor::Close => {
                    if let Some(tx) = &open_tx {
                        ctx.broker.close_transaction(tx.id).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_expansion_task(&self, expert_instance_id: i64, expansion_type: ExpansionType, use_case: AnalysisUseCase) -> anyhow::Result<()> {
        let instance = self
            .db
            .get_expert_instance(expert_instance_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("expert instance {expert_instance_id} not found"))?;
        let expert = self
            .experts
            .resolve(&instance.expert_class_tag)
            .ok_or_else(|| anyhow::anyhow!("no expert registered for tag {}", instance.expert_class_tag))?;

        let symbols = match expansion_type {
            ExpansionType::Dynamic => {
                let broker = self.broker_for_expert(expert_instance_id).await?;
                let ctx = ExpertContext {
                    db: self.db.clone(),
                    instance: instance.clone(),
                    broker,
                };
                let mut symbols = match &self.ai_selector {
                    Some(selector) => selector.select_instruments(&ctx, self.max_instruments).await?,
                    None => {
                        warn!(expert_instance_id, "no AiInstrumentSelector wired, falling back to expert.get_recommended_instruments()");
                        expert.get_recommended_instruments(&ctx).await?
                    }
                };
                symbols.truncate(self.max_instruments);
                symbols
            }
            ExpansionType::Expert => {
                if !expert.properties().should_expand_instrument_jobs {
                    self.submit_analysis(expert_instance_id, "EXPERT", use_case, 0).await?;
                    return Ok(());
                }
                let broker = self.broker_for_expert(expert_instance_id).await?;
                let ctx = ExpertContext {
                    db: self.db.clone(),
                    instance: instance.clone(),
                    broker,
                };
                expert.get_recommended_instruments(&ctx).await?
            }
            ExpansionType::OpenPositions => self.db.open_symbols_for_expert(expert_instance_id).await?,
        };

        for symbol in symbols {
            self.submit_analysis(expert_instance_id, &symbol, use_case, 0).await?;
        }
        Ok(())
    }

    async fn submit_analysis(&self, expert_instance_id: i64, symbol: &str, use_case: AnalysisUseCase, priority: i64) -> anyhow::Result<()> {
        let queue = self.queue()?;
        let submission = Submission {
            payload: TaskPayload::Analysis {
                expert_instance_id,
                symbol: symbol.to_string(),
                use_case,
                bypass_balance_check: false,
                bypass_transaction_check: false,
            },
            priority,
            batch_id: None,
        };
        match queue.submit(submission).await {
            Ok(_) | Err(crate::error::CoreError::DuplicateTask { .. }) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }
}

#[async_trait]
impl TaskExecutor for DefaultExecutor {
    async fn execute(&self, task: &QueueTask) -> anyhow::Result<()> {
        match &task.payload {
            TaskPayload::Analysis {
                expert_instance_id,
                symbol,
                use_case,
                bypass_balance_check,
                bypass_transaction_check,
            } => {
                self.run_analysis_task(*expert_instance_id, symbol, *use_case, *bypass_balance_check, *bypass_transaction_check)
                    .await
            }
            TaskPayload::InstrumentExpansion {
                expert_instance_id,
                expansion_type,
                use_case,
            } => self.run_expansion_task(*expert_instance_id, *expansion_type, *use_case).await,
        }
    }
}

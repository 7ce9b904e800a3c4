//! The shared logic every `BrokerAccount` provider gets for free: validation,
//! transaction coupling, TP/SL lifecycle, reconciliation, and transaction
//! close (spec §4.B.3-§4.B.7). Grounded in the teacher's `vault/trade_executor.rs`
//! owning-wrapper shape: one `BrokerAccountHandle` per account, holding the
//! provider trait object plus the shared `Db` and `PriceCache` handles.

use super::price_cache::{PriceCache, PriceType};
use super::{order_type_for_side, AccountInfo, BrokerAccount, OrderSnapshot, Position, SubmitRequest};
use crate::db::activity::Severity;
use crate::db::orders::{GoodFor, OrderStatus, OrderType, TradingOrder};
use crate::db::settings::{SettingOwner, SettingValue};
use crate::db::transactions::{Side, Transaction, TransactionStatus};
use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything needed to place an order, before persistence assigns an ID.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub transaction_id: Option<i64>,
    pub expert_instance_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub depends_on_order: Option<i64>,
    pub depends_order_status_trigger: Option<OrderStatus>,
    pub good_for: GoodFor,
    pub comment: String,
    pub is_closing_order: bool,
    pub tp_percent: Option<f64>,
    pub sl_percent: Option<f64>,
}

impl OrderDraft {
    pub fn market_entry(symbol: &str, side: Side, quantity: f64, expert_instance_id: i64) -> Self {
        Self {
            transaction_id: None,
            expert_instance_id: Some(expert_instance_id),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            depends_on_order: None,
            depends_order_status_trigger: None,
            good_for: GoodFor::Gtc,
            comment: String::new(),
            is_closing_order: false,
            tp_percent: None,
            sl_percent: None,
        }
    }
}

/// Pure, side-effect-free validation (spec §4.B.3 step 1).
fn validate_draft(draft: &OrderDraft) -> Vec<String> {
    let mut errors = Vec::new();
    if draft.quantity <= 0.0 {
        errors.push("quantity must be > 0".to_string());
    }
    if draft.symbol.trim().is_empty() {
        errors.push("symbol is required".to_string());
    }
    if draft.order_type.requires_limit_price() && draft.limit_price.is_none() {
        errors.push("limit_price is required for this order type".to_string());
    }
    if draft.order_type.requires_stop_price() && draft.stop_price.is_none() {
        errors.push("stop_price is required for this order type".to_string());
    }
    if draft.depends_on_order.is_some() && draft.depends_order_status_trigger.is_none() {
        errors.push("depends_order_status_trigger is required when depends_on_order is set".to_string());
    }
    if draft.order_type != OrderType::Market && draft.transaction_id.is_none() {
        errors.push("non-MARKET order requires an existing transaction_id".to_string());
    }
    errors
}

/// Minimum-percent enforcement (spec §4.B.5). Returns the enforced price,
/// unchanged if already compliant.
pub fn enforce_min_tp(side: Side, open_price: f64, tp: f64, min_pct: f64) -> f64 {
    match side {
        Side::Buy => {
            let floor = open_price * (1.0 + min_pct / 100.0);
            if tp < floor {
                floor
            } else {
                tp
            }
        }
        Side::Sell => {
            let ceiling = open_price * (1.0 - min_pct / 100.0);
            if tp > ceiling {
                ceiling
            } else {
                tp
            }
        }
    }
}

pub fn enforce_min_sl(side: Side, open_price: f64, sl: f64, min_pct: f64) -> f64 {
    match side {
        Side::Buy => {
            let ceiling = open_price * (1.0 - min_pct / 100.0);
            if sl > ceiling {
                ceiling
            } else {
                sl
            }
        }
        Side::Sell => {
            let floor = open_price * (1.0 + min_pct / 100.0);
            if sl < floor {
                floor
            } else {
                sl
            }
        }
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Activity-log terminology for a side (spec §4.B.5's "LONG"/"SHORT" scenario
/// text), distinct from `Side::as_str`'s `BUY`/`SELL` wire representation.
fn side_label(side: Side) -> &'static str {
    match side {
        Side::Buy => "LONG",
        Side::Sell => "SHORT",
    }
}

/// The tracking comment of spec §3 invariant 8 / §6: `<epoch-micros>-[ACC:n/EXP:n/TR:n/ORD:n] <comment>`,
/// truncated to 128 characters.
fn tracking_comment(account_id: i64, expert_instance_id: Option<i64>, transaction_id: i64, order_id: i64, user_comment: &str) -> String {
    let epoch_micros = chrono::Utc::now().timestamp_micros();
    let exp_part = expert_instance_id.map(|e| format!("/EXP:{e}")).unwrap_or_default();
    let full = format!("{epoch_micros}-[ACC:{account_id}{exp_part}/TR:{transaction_id}/ORD:{order_id}] {user_comment}");
    if full.len() > 128 {
        full.chars().take(128).collect()
    } else {
        full
    }
}

/// One broker connection, wrapping a concrete `BrokerAccount` provider with
/// the shared submit/adjust/refresh/close logic (the "base class" of spec §4.B).
pub struct BrokerAccountHandle {
    pub account_id: i64,
    pub db: Db,
    pub provider: Arc<dyn BrokerAccount>,
    pub price_cache: Arc<PriceCache>,
}

impl BrokerAccountHandle {
    pub fn new(account_id: i64, db: Db, provider: Arc<dyn BrokerAccount>, price_cache: Arc<PriceCache>) -> Self {
        Self {
            account_id,
            db,
            provider,
            price_cache,
        }
    }

    pub async fn get_balance(&self) -> anyhow::Result<Option<f64>> {
        self.provider.get_balance().await
    }

    pub async fn get_account_info(&self) -> anyhow::Result<AccountInfo> {
        self.provider.get_account_info().await
    }

    pub async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        self.provider.get_positions().await
    }

    /// Cached single-symbol price accessor (spec §4.B.2).
    pub async fn get_instrument_current_price(&self, symbol: &str, price_type: PriceType) -> anyhow::Result<f64> {
        let provider = self.provider.clone();
        let symbol_owned = symbol.to_string();
        self.price_cache
            .get_or_fetch(self.account_id, symbol, price_type, move || async move {
                let result = provider._get_instrument_current_price_impl(&[symbol_owned.clone()], price_type).await?;
                result
                    .get(&symbol_owned)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("provider did not return a price for {symbol_owned}"))
            })
            .await
    }

    pub async fn get_instrument_current_prices(&self, symbols: &[String], price_type: PriceType) -> anyhow::Result<HashMap<String, f64>> {
        let provider = self.provider.clone();
        self.price_cache
            .get_or_fetch_bulk(self.account_id, symbols, price_type, move |missing| async move {
                provider._get_instrument_current_price_impl(&missing, price_type).await
            })
            .await
    }

    async fn min_tp_sl_percent(&self) -> f64 {
        self.db
            .get_setting_or_default(SettingOwner::App, "min_tp_sl_percent", SettingValue::Float(3.0))
            .await
            .as_f64()
            .unwrap_or(3.0)
    }

    /// spec §4.B.3: validation, transaction coupling, dependent quantity sync,
    /// comment stamping, persist-before-broker-call, provider call, TP/SL
    /// application, transaction quantity recompute.
    pub async fn submit_order(&self, draft: OrderDraft) -> CoreResult<TradingOrder> {
        let errors = validate_draft(&draft);
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }

        // Position-size cap (defence in depth) — only when the expert has the
        // setting and this isn't a closing order.
        if !draft.is_closing_order {
            if let Some(expert_instance_id) = draft.expert_instance_id {
                if let Some(max_per_instrument_pct) = self
                    .db
                    .get_setting(SettingOwner::Expert(expert_instance_id), "max_virtual_equity_per_instrument_percent")
                    .await?
                    .and_then(|v| v.as_f64())
                {
                    if let Some(expert) = self.db.get_expert_instance(expert_instance_id).await? {
                        let account_info = self.get_account_info().await.map_err(CoreError::Internal)?;
                        let current_price = self
                            .get_instrument_current_price(&draft.symbol, PriceType::Mid)
                            .await
                            .map_err(CoreError::Internal)?;
                        let max_allowed = account_info.equity * (expert.virtual_equity_percent / 100.0) * (max_per_instrument_pct / 100.0);
                        if draft.quantity * current_price > max_allowed {
                            return Err(CoreError::Validation(format!(
                                "order size {:.2} exceeds max allowed {:.2} for expert {}",
                                draft.quantity * current_price,
                                max_allowed,
                                expert_instance_id
                            )));
                        }
                    }
                }
            }
        }

        let mut draft = draft;

        // Transaction coupling (step 2).
        let transaction_id = match draft.transaction_id {
            Some(id) => {
                self.db
                    .get_transaction(id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("transaction {id}")))?;
                id
            }
            None => {
                let expert_instance_id = draft
                    .expert_instance_id
                    .ok_or_else(|| CoreError::Validation("expert_instance_id required to open a new transaction".to_string()))?;
                let open_price = self
                    .get_instrument_current_price(&draft.symbol, PriceType::Mid)
                    .await
                    .map_err(CoreError::Internal)?;
                let tx = self
                    .db
                    .create_transaction(&draft.symbol, draft.quantity, draft.side, open_price, expert_instance_id)
                    .await?;
                draft.transaction_id = Some(tx.id);
                tx.id
            }
        };
        let mut transaction = self
            .db
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {transaction_id}")))?;

        // Dependent quantity sync (step 3).
        if let Some(parent_id) = draft.depends_on_order {
            if draft.order_type.is_limit() || draft.order_type.is_stop() {
                if let Some(parent) = self.db.get_order(parent_id).await? {
                    if parent.order_type != OrderType::Market {
                        draft.quantity = parent.quantity;
                    }
                }
            }
        }

        // Comment stamping (step 4) — ORD:n needs the row's own id, so we
        // stamp with a placeholder, persist, then rewrite the comment with
        // the real id before calling the broker (still well before the
        // broker call, matching the spirit of "persist before call").
        let initial_status = if draft.depends_on_order.is_some() {
            OrderStatus::WaitingTrigger
        } else {
            OrderStatus::Pending
        };
        let mut data = serde_json::json!({});
        if let Some(p) = draft.tp_percent {
            data["tp_percent"] = serde_json::json!(p);
        }
        if let Some(p) = draft.sl_percent {
            data["sl_percent"] = serde_json::json!(p);
        }
        if draft.is_closing_order {
            data["closing"] = serde_json::json!(true);
        }

        let row = TradingOrder {
            id: 0,
            account_id: self.account_id,
            transaction_id: Some(transaction_id),
            symbol: draft.symbol.clone(),
            side: draft.side,
            quantity: draft.quantity,
            order_type: draft.order_type,
            limit_price: draft.limit_price,
            stop_price: draft.stop_price,
            status: initial_status,
            filled_quantity: 0.0,
            open_price: None,
            broker_order_id: None,
            depends_on_order: draft.depends_on_order,
            depends_order_status_trigger: draft.depends_order_status_trigger,
            good_for: draft.good_for,
            comment: draft.comment.clone(),
            data,
            created_at: crate::db::now_iso(),
        };
        let mut row = self.db.insert_order(&row).await?; // step 5: persist before broker call
        row.comment = tracking_comment(self.account_id, draft.expert_instance_id, transaction_id, row.id, &draft.comment);
        self.db.update_order(&row).await?;

        // step 6: call the broker, unless this leg is waiting on its parent.
        if row.status != OrderStatus::WaitingTrigger {
            match self.provider._submit_order_impl(&SubmitRequest {
                order: row.clone(),
                tp_percent: draft.tp_percent,
                sl_percent: draft.sl_percent,
            }).await {
                Ok(snapshot) => {
                    row.broker_order_id = Some(snapshot.broker_order_id);
                    row.status = snapshot.status;
                    row.filled_quantity = snapshot.filled_quantity;
                    row.open_price = snapshot.open_price;
                    self.db.update_order(&row).await?;
                }
                Err(e) => {
                    row.status = OrderStatus::Error;
                    self.db.update_order(&row).await?;
                    self.db
                        .log_activity(
                            Severity::Error,
                            "order_submit_failed",
                            &format!("order {} rejected: {e}", row.id),
                            serde_json::json!({"order_id": row.id}),
                            Some(self.account_id),
                            draft.expert_instance_id,
                        )
                        .await?;
                    return Err(CoreError::Broker(e.to_string()));
                }
            }
        }

        // step 7: apply supplied TP/SL uniformly via the stateless helpers.
        if draft.tp_percent.is_some() || draft.sl_percent.is_some() {
            let open_price = transaction.open_price.unwrap_or(row.open_price.unwrap_or(0.0));
            if let (Some(tp), Some(sl)) = (draft.tp_percent, draft.sl_percent) {
                let tp_price = target_price(draft.side, open_price, tp, true);
                let sl_price = target_price(draft.side, open_price, sl, false);
                self.adjust_tp_sl(transaction_id, tp_price, sl_price).await?;
            } else if let Some(tp) = draft.tp_percent {
                self.adjust_tp(transaction_id, target_price(draft.side, open_price, tp, true)).await?;
            } else if let Some(sl) = draft.sl_percent {
                self.adjust_sl(transaction_id, target_price(draft.side, open_price, sl, false)).await?;
            }
        }

        // step 8: recompute transaction quantity from accumulated entry orders.
        self.recompute_transaction_quantity(&mut transaction).await?;

        Ok(row)
    }

    async fn recompute_transaction_quantity(&self, transaction: &mut Transaction) -> CoreResult<()> {
        let orders = self.db.orders_for_transaction(transaction.id).await?;
        let excluded = |s: OrderStatus| matches!(s, OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired | OrderStatus::Error);
        let total: f64 = orders
            .iter()
            .filter(|o| o.is_entry() && !excluded(o.status))
            .map(|o| o.quantity)
            .sum();
        if total > 0.0 {
            transaction.quantity = total;
            self.db.update_transaction(transaction).await?;
        }
        Ok(())
    }

    /// Locates the entry order (no `depends_on_order`) to hang a new TP/SL
    /// leg off of (spec §4.B.4).
    async fn entry_order_for(&self, transaction_id: i64) -> CoreResult<Option<TradingOrder>> {
        let orders = self.db.orders_for_transaction(transaction_id).await?;
        Ok(orders.into_iter().find(|o| o.is_entry()))
    }

    /// spec §4.B.5. Idempotent: a second call with the same price that
    /// already matches the live order is a DB-only no-op.
    pub async fn adjust_tp(&self, transaction_id: i64, price: f64) -> CoreResult<()> {
        self.adjust_leg(transaction_id, Some(price), None).await
    }

    pub async fn adjust_sl(&self, transaction_id: i64, price: f64) -> CoreResult<()> {
        self.adjust_leg(transaction_id, None, Some(price)).await
    }

    pub async fn adjust_tp_sl(&self, transaction_id: i64, tp: f64, sl: f64) -> CoreResult<()> {
        self.adjust_leg(transaction_id, Some(tp), Some(sl)).await
    }

    async fn adjust_leg(&self, transaction_id: i64, tp: Option<f64>, sl: Option<f64>) -> CoreResult<()> {
        let mut transaction = self
            .db
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {transaction_id}")))?;
        let min_pct = self.min_tp_sl_percent().await;
        let open_price = transaction.open_price.unwrap_or(0.0);

        if let Some(tp) = tp {
            let enforced = enforce_min_tp(transaction.side, open_price, tp, min_pct);
            if !approx_eq(enforced, tp) {
                self.db
                    .log_activity(
                        Severity::Info,
                        "tp_enforcement",
                        &format!("TP enforcement ({}): requested {tp:.4}, enforced {enforced:.4}", side_label(transaction.side)),
                        serde_json::json!({"transaction_id": transaction_id, "requested": tp, "enforced": enforced}),
                        Some(self.account_id),
                        None,
                    )
                    .await?;
            }
            self.apply_leg(&mut transaction, enforced, true).await?;
        }
        if let Some(sl) = sl {
            let enforced = enforce_min_sl(transaction.side, open_price, sl, min_pct);
            if !approx_eq(enforced, sl) {
                self.db
                    .log_activity(
                        Severity::Info,
                        "sl_enforcement",
                        &format!("SL enforcement ({}): requested {sl:.4}, enforced {enforced:.4}", side_label(transaction.side)),
                        serde_json::json!({"transaction_id": transaction_id, "requested": sl, "enforced": enforced}),
                        Some(self.account_id),
                        None,
                    )
                    .await?;
            }
            self.apply_leg(&mut transaction, enforced, false).await?;
        }
        Ok(())
    }

    async fn apply_leg(&self, transaction: &mut Transaction, enforced_price: f64, is_tp: bool) -> CoreResult<()> {
        if is_tp {
            transaction.take_profit = Some(enforced_price);
        } else {
            transaction.stop_loss = Some(enforced_price);
        }
        self.db.update_transaction(transaction).await?;

        let existing = if is_tp {
            self.db.active_tp_order(transaction.id, transaction.side).await?
        } else {
            self.db.active_sl_order(transaction.id, transaction.side).await?
        };

        let Some(mut order) = existing else {
            // No existing leg: create one, WAITING_TRIGGER unless the entry is
            // already filled.
            let Some(entry) = self.entry_order_for(transaction.id).await? else {
                return Ok(());
            };
            let leg_side = transaction.side.opposite();
            let draft = OrderDraft {
                transaction_id: Some(transaction.id),
                expert_instance_id: None,
                symbol: transaction.symbol.clone(),
                side: leg_side,
                quantity: entry.quantity,
                order_type: order_type_for_side(leg_side, is_tp),
                limit_price: if is_tp { Some(enforced_price) } else { None },
                stop_price: if is_tp { None } else { Some(enforced_price) },
                depends_on_order: if entry.status.is_executed() { None } else { Some(entry.id) },
                depends_order_status_trigger: if entry.status.is_executed() { None } else { Some(OrderStatus::Filled) },
                good_for: GoodFor::Gtc,
                comment: if is_tp { "take profit".to_string() } else { "stop loss".to_string() },
                is_closing_order: false,
                tp_percent: None,
                sl_percent: None,
            };
            self.submit_order(draft).await?;
            return Ok(());
        };

        let current_price = if is_tp { order.limit_price } else { order.stop_price };
        if current_price.map(|p| approx_eq(p, enforced_price)).unwrap_or(false) {
            return Ok(()); // idempotent: already at the requested price.
        }
        crate::activity::log_tp_sl_adjustment(&self.db, self.account_id, transaction.id, is_tp, current_price, enforced_price).await?;

        if is_tp {
            order.limit_price = Some(enforced_price);
        } else {
            order.stop_price = Some(enforced_price);
        }

        if order.broker_order_id.is_none() {
            // Not yet live at the broker: DB-only update.
            self.db.update_order(&order).await?;
            return Ok(());
        }

        let updated_in_place = if is_tp {
            self.provider._update_broker_tp_order(&order, enforced_price).await
        } else {
            self.provider._update_broker_sl_order(&order, enforced_price).await
        };

        match updated_in_place {
            Ok(true) => {
                self.db.update_order(&order).await?;
            }
            Ok(false) => {
                // Cancel-and-replace, with rollback on failure.
                let original_price = current_price;
                let original_tp = transaction.take_profit;
                let original_sl = transaction.stop_loss;
                if let Err(e) = self.cancel_and_replace_leg(transaction, &order, enforced_price, is_tp).await {
                    if is_tp {
                        transaction.take_profit = original_tp;
                    } else {
                        transaction.stop_loss = original_sl;
                    }
                    self.db.update_transaction(transaction).await?;
                    if is_tp {
                        order.limit_price = original_price;
                    } else {
                        order.stop_price = original_price;
                    }
                    self.db.update_order(&order).await?;
                    return Err(CoreError::Broker(format!("rollback after failed TP/SL replace: {e}")));
                }
            }
            Err(e) => return Err(CoreError::BrokerTransient(e.to_string())),
        }
        Ok(())
    }

    async fn cancel_and_replace_leg(&self, transaction: &Transaction, old_order: &TradingOrder, new_price: f64, is_tp: bool) -> anyhow::Result<()> {
        if let Some(broker_id) = &old_order.broker_order_id {
            self.provider.cancel_order(broker_id).await?;
        }
        let mut canceled = old_order.clone();
        canceled.status = OrderStatus::Canceled;
        self.db.update_order(&canceled).await?;

        let draft = OrderDraft {
            transaction_id: Some(transaction.id),
            expert_instance_id: None,
            symbol: old_order.symbol.clone(),
            side: old_order.side,
            quantity: old_order.quantity,
            order_type: old_order.order_type,
            limit_price: if is_tp { Some(new_price) } else { None },
            stop_price: if is_tp { None } else { Some(new_price) },
            depends_on_order: None,
            depends_order_status_trigger: None,
            good_for: old_order.good_for,
            comment: old_order.comment.clone(),
            is_closing_order: false,
            tp_percent: None,
            sl_percent: None,
        };
        self.submit_order(draft).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(())
    }

    /// spec §4.B.6, operation 1: provider syncs every non-terminal local
    /// order. Also resolves §4.F dependent triggers.
    pub async fn refresh_orders(&self) -> CoreResult<()> {
        let non_terminal = self.db.non_terminal_orders_for_account(self.account_id).await?;
        for mut order in non_terminal {
            if let Some(broker_id) = order.broker_order_id.clone() {
                if let Some(snapshot) = self.provider.get_order(&broker_id).await.map_err(CoreError::Internal)? {
                    order.status = snapshot.status;
                    order.filled_quantity = snapshot.filled_quantity;
                    if snapshot.open_price.is_some() {
                        order.open_price = snapshot.open_price;
                    }
                    self.db.update_order(&order).await?;
                }
            } else if order.status == OrderStatus::WaitingTrigger {
                self.resolve_dependent(&order).await?;
            }
        }
        Ok(())
    }

    /// spec §4.F: submits a WAITING_TRIGGER order once its parent reaches the
    /// configured trigger status, or cancels it if the parent terminates
    /// without doing so.
    async fn resolve_dependent(&self, dependent: &TradingOrder) -> CoreResult<()> {
        let Some(parent_id) = dependent.depends_on_order else { return Ok(()) };
        let Some(parent) = self.db.get_order(parent_id).await? else { return Ok(()) };

        if parent.quantity <= 0.0 && parent.status.is_terminal() {
            let mut d = dependent.clone();
            d.status = OrderStatus::Canceled;
            self.db.update_order(&d).await?;
            return Ok(());
        }

        if Some(parent.status) == dependent.depends_order_status_trigger {
            let mut draft_quantity = dependent.quantity;
            if parent.status == OrderStatus::Filled {
                draft_quantity = parent.quantity;
            }
            let mut d = dependent.clone();
            d.quantity = draft_quantity;
            if d.data.get("tp_percent").is_none() && d.data.get("sl_percent").is_none() {
                // re-anchor fallback: nothing stored, leave prices as-is.
            }
            d.status = OrderStatus::Pending;
            self.db.update_order(&d).await?;
            match self
                .provider
                ._submit_order_impl(&SubmitRequest {
                    order: d.clone(),
                    tp_percent: d.data.get("tp_percent").and_then(|v| v.as_f64()),
                    sl_percent: d.data.get("sl_percent").and_then(|v| v.as_f64()),
                })
                .await
            {
                Ok(snapshot) => {
                    d.broker_order_id = Some(snapshot.broker_order_id);
                    d.status = snapshot.status;
                    d.filled_quantity = snapshot.filled_quantity;
                    self.db.update_order(&d).await?;
                }
                Err(e) => {
                    d.status = OrderStatus::Error;
                    self.db.update_order(&d).await?;
                    self.db
                        .log_activity(
                            Severity::Error,
                            "dependent_order_submit_failed",
                            &format!("dependent order {} failed: {e}", d.id),
                            serde_json::json!({"order_id": d.id}),
                            Some(self.account_id),
                            None,
                        )
                        .await?;
                }
            }
        } else if parent.status.is_terminal() && parent.status != OrderStatus::Filled {
            let mut d = dependent.clone();
            d.status = OrderStatus::Canceled;
            self.db.update_order(&d).await?;
        }
        Ok(())
    }

    /// spec §4.B.6, operation 2: the ten-rule reconciliation pass.
    pub async fn refresh_transactions(&self) -> CoreResult<()> {
        for transaction in self.db.list_transactions().await? {
            let orders = self.db.orders_for_transaction(transaction.id).await?;
            if orders.iter().all(|o| o.account_id != self.account_id) {
                continue;
            }
            self.reconcile_one(transaction, orders).await?;
        }
        Ok(())
    }

    async fn reconcile_one(&self, mut transaction: Transaction, orders: Vec<TradingOrder>) -> CoreResult<()> {
        let entries: Vec<&TradingOrder> = orders.iter().filter(|o| o.is_entry()).collect();
        let dependents: Vec<&TradingOrder> = orders.iter().filter(|o| !o.is_entry()).collect();

        // Rule 1: promote WAITING -> OPENED on first entry execution.
        if transaction.status == TransactionStatus::Waiting && entries.iter().any(|o| o.status.is_executed()) {
            transaction.status = TransactionStatus::Opened;
            if transaction.open_date.is_none() {
                transaction.open_date = Some(crate::db::now_iso());
            }
            self.db
                .log_activity(
                    Severity::Info,
                    "transaction_opened",
                    &format!("transaction {} opened", transaction.id),
                    serde_json::json!({"transaction_id": transaction.id}),
                    Some(self.account_id),
                    Some(transaction.expert_instance_id),
                )
                .await?;
        }

        // Rule 2: open_price from the oldest filled entry order.
        if let Some(oldest) = self.db.oldest_filled_entry_order(transaction.id).await? {
            if let Some(p) = oldest.open_price {
                transaction.open_price = Some(p);
            }
        }

        // Rule 3: recompute quantity, side-aware.
        let buy_fills: f64 = entries.iter().filter(|o| o.side == Side::Buy).map(|o| o.filled_quantity).sum();
        let sell_fills: f64 = entries.iter().filter(|o| o.side == Side::Sell).map(|o| o.filled_quantity).sum();
        transaction.quantity = match transaction.side {
            Side::Buy => buy_fills - sell_fills,
            Side::Sell => sell_fills - buy_fills,
        };

        // Rule 4: close_price from the most recent filled closing/dependent order.
        if let Some(closing) = self.db.most_recent_filled_closing_order(transaction.id).await? {
            if let Some(p) = closing.open_price {
                transaction.close_price = Some(p);
            }
        }

        self.db.update_transaction(&transaction).await?;

        if transaction.status == TransactionStatus::Closed {
            return Ok(());
        }

        // Rules 5-10: closure determination, first match wins.
        let oco_filled = orders.iter().any(|o| o.order_type == OrderType::Oco && o.status.is_executed());
        let dependent_filled = dependents.iter().any(|o| o.status.is_executed());
        let total_buy: f64 = orders.iter().filter(|o| o.side == Side::Buy).map(|o| o.filled_quantity).sum();
        let total_sell: f64 = orders.iter().filter(|o| o.side == Side::Sell).map(|o| o.filled_quantity).sum();
        let any_fill = total_buy > 0.0 || total_sell > 0.0;
        let balanced = any_fill && (total_buy - total_sell).abs() < 1e-4;
        let entries_terminal = !entries.is_empty() && entries.iter().all(|o| o.status.is_terminal());
        let entries_ever_filled = entries.iter().any(|o| o.status.is_executed() || o.filled_quantity > 0.0);
        let dependents_active = dependents.iter().any(|o| !o.status.is_terminal());
        let all_terminal = !orders.is_empty() && orders.iter().all(|o| o.status.is_terminal());

        let reason = if oco_filled {
            Some("oco_leg_filled")
        } else if dependent_filled {
            Some("tp_sl_filled")
        } else if balanced {
            Some("position_balanced")
        } else if entries_terminal && !entries_ever_filled {
            Some("entry_orders_terminal_no_execution")
        } else if entries_terminal && transaction.status == TransactionStatus::Opened && !dependents_active {
            Some("entry_orders_terminal_after_opening")
        } else if all_terminal {
            Some("all_orders_terminal")
        } else {
            None
        };

        if let Some(reason) = reason {
            let close_price = if reason == "position_balanced" {
                orders.iter().filter(|o| o.status.is_executed()).max_by_key(|o| o.id).and_then(|o| o.open_price)
            } else {
                transaction.close_price
            };
            self.db.close_transaction_with_reason(transaction.id, close_price, reason).await?;
            self.db
                .log_activity(
                    Severity::Info,
                    "transaction_closed",
                    &format!("transaction {} closed: {reason}", transaction.id),
                    serde_json::json!({"transaction_id": transaction.id, "reason": reason}),
                    Some(self.account_id),
                    Some(transaction.expert_instance_id),
                )
                .await?;
        }
        Ok(())
    }

    /// spec §4.B.7.
    pub async fn close_transaction(&self, transaction_id: i64) -> CoreResult<()> {
        let mut transaction = self
            .db
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {transaction_id}")))?;
        transaction.status = TransactionStatus::Closing;
        self.db.update_transaction(&transaction).await?;

        let orders = self.db.orders_for_transaction(transaction_id).await?;
        let mut has_filled_entry = false;
        let mut closing_order: Option<TradingOrder> = None;
        for mut order in orders {
            if order.is_entry() && order.status.is_executed() {
                has_filled_entry = true;
            }
            if order.data.get("closing").and_then(|v| v.as_bool()) == Some(true) {
                closing_order = Some(order.clone());
                continue;
            }
            match order.status {
                OrderStatus::Pending | OrderStatus::WaitingTrigger => {
                    order.status = OrderStatus::Closed;
                    self.db.update_order(&order).await?;
                }
                s if !s.is_terminal() => {
                    if let Some(broker_id) = order.broker_order_id.clone() {
                        self.provider.cancel_order(&broker_id).await.map_err(CoreError::Internal)?;
                    }
                }
                _ => {}
            }
        }

        if let Some(mut closing) = closing_order {
            if closing.status == OrderStatus::Error {
                let still_exists = self
                    .provider
                    .get_positions()
                    .await
                    .map_err(CoreError::Internal)?
                    .iter()
                    .any(|p| p.symbol == transaction.symbol && p.qty.abs() > 1e-9);
                if !still_exists {
                    closing.status = OrderStatus::Canceled;
                    self.db.update_order(&closing).await?;
                    self.db.close_transaction_with_reason(transaction_id, None, "position_not_at_broker").await?;
                    return Ok(());
                }
                // retry submission
                let req = SubmitRequest {
                    order: closing.clone(),
                    tp_percent: None,
                    sl_percent: None,
                };
                if let Ok(snapshot) = self.provider._submit_order_impl(&req).await {
                    closing.broker_order_id = Some(snapshot.broker_order_id);
                    closing.status = snapshot.status;
                    self.db.update_order(&closing).await?;
                }
            }
        } else if has_filled_entry {
            let entry = self
                .entry_order_for(transaction_id)
                .await?
                .ok_or_else(|| CoreError::NotFound("entry order".to_string()))?;
            let draft = OrderDraft {
                transaction_id: Some(transaction_id),
                expert_instance_id: None,
                symbol: transaction.symbol.clone(),
                side: entry.side.opposite(),
                quantity: transaction.quantity.abs(),
                order_type: OrderType::Market,
                limit_price: None,
                stop_price: None,
                depends_on_order: None,
                depends_order_status_trigger: None,
                good_for: GoodFor::Gtc,
                comment: "closing position".to_string(),
                is_closing_order: true,
                tp_percent: None,
                sl_percent: None,
            };
            self.submit_order(draft).await?;
        }

        let remaining = self.db.orders_for_transaction(transaction_id).await?;
        if remaining.iter().all(|o| o.status.is_terminal()) {
            self.db.close_transaction_with_reason(transaction_id, None, "manual_close").await?;
        }
        Ok(())
    }

    /// Non-blocking variant: performs the same close, then reconciles in the
    /// background so UI callers never wait on broker I/O (spec §4.B.7).
    pub async fn close_transaction_async(self: Arc<Self>, transaction_id: i64) -> CoreResult<()> {
        self.close_transaction(transaction_id).await?;
        let handle = self.clone();
        tokio::spawn(async move {
            let _ = handle.refresh_orders().await;
            let _ = handle.refresh_transactions().await;
        });
        Ok(())
    }

    /// Startup-only resync of every transaction's status from its orders,
    /// before the scheduler starts firing (SPEC_FULL §2).
    pub async fn resync_all_transactions(&self) -> CoreResult<()> {
        self.refresh_orders().await?;
        self.refresh_transactions().await
    }
}

pub fn target_price(side: Side, open_price: f64, percent: f64, is_tp: bool) -> f64 {
    match (side, is_tp) {
        (Side::Buy, true) => open_price * (1.0 + percent / 100.0),
        (Side::Buy, false) => open_price * (1.0 - percent / 100.0),
        (Side::Sell, true) => open_price * (1.0 - percent / 100.0),
        (Side::Sell, false) => open_price * (1.0 + percent / 100.0),
    }
}

//! Broker Account abstraction (spec §4.B, §6 provider contract).
//!
//! `BrokerAccount` is the thin hook trait every concrete broker implements;
//! `BrokerAccountHandle` (in `base.rs`) is the "base class" that wraps a
//! provider with the shared validation/TP-SL/reconciliation logic so no
//! provider has to reimplement it. Grounded in the shape of the teacher's
//! `vault/trade_executor.rs` (an owning wrapper around a per-user execution
//! loop) and `scrapers/polymarket_api.rs` (the provider-client hook style).

pub mod base;
pub mod mock;
pub mod price_cache;

use crate::db::orders::{OrderStatus, OrderType, TradingOrder};
use crate::db::transactions::Side;
use async_trait::async_trait;
use price_cache::PriceType;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountInfo {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub unrealized_pl: f64,
}

/// What a provider reports back about an order it knows of; the base layer
/// merges this into the local `TradingOrder` row during `refresh_orders`.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub broker_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub open_price: Option<f64>,
}

/// Everything a provider needs to place an order: the validated, persisted
/// row plus the optional TP/SL percent the caller wants applied afterward.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub order: TradingOrder,
    pub tp_percent: Option<f64>,
    pub sl_percent: Option<f64>,
}

/// The provider contract of spec §6. Every method here is a "hook": small,
/// broker-specific, no shared logic. `BrokerAccountHandle` in `base.rs` is
/// the caller; providers never call each other's hooks.
#[async_trait]
pub trait BrokerAccount: Send + Sync {
    fn provider_tag(&self) -> &str;

    async fn get_balance(&self) -> anyhow::Result<Option<f64>>;
    async fn get_account_info(&self) -> anyhow::Result<AccountInfo>;
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>>;
    async fn get_orders(&self, status: Option<OrderStatus>) -> anyhow::Result<Vec<OrderSnapshot>>;
    async fn get_order(&self, broker_order_id: &str) -> anyhow::Result<Option<OrderSnapshot>>;
    async fn symbols_exist(&self, symbols: &[String]) -> anyhow::Result<HashMap<String, bool>>;

    /// Default built from `symbols_exist` (SPEC_FULL §2, grounded in
    /// `AccountInterface.filter_supported_symbols`).
    async fn filter_supported_symbols(&self, symbols: &[String]) -> anyhow::Result<Vec<String>> {
        let existence = self.symbols_exist(symbols).await?;
        Ok(symbols
            .iter()
            .filter(|s| existence.get(*s).copied().unwrap_or(false))
            .cloned()
            .collect())
    }

    /// Raw, uncached price fetch — `BrokerAccountHandle::get_instrument_current_price`
    /// is the cached public accessor (spec §4.B.2).
    async fn _get_instrument_current_price_impl(
        &self,
        symbols: &[String],
        price_type: PriceType,
    ) -> anyhow::Result<HashMap<String, f64>>;

    /// Places `order` at the broker. Must return a snapshot with
    /// `broker_order_id` and the first observed status.
    async fn _submit_order_impl(&self, req: &SubmitRequest) -> anyhow::Result<OrderSnapshot>;

    async fn _set_order_tp_impl(&self, _order: &TradingOrder, _price: f64) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn _set_order_sl_impl(&self, _order: &TradingOrder, _price: f64) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn _set_order_tp_sl_impl(&self, _order: &TradingOrder, _tp: f64, _sl: f64) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// In-place modification where the broker supports it; `Ok(false)` tells
    /// the base layer to cancel-and-replace instead.
    async fn _update_broker_tp_order(&self, _order: &TradingOrder, _new_price: f64) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn _update_broker_sl_order(&self, _order: &TradingOrder, _new_price: f64) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// For brokers offering a single STOP_LIMIT order combining TP+SL.
    async fn _replace_order_with_stop_limit(
        &self,
        _existing: &TradingOrder,
        _tp: f64,
        _sl: f64,
    ) -> anyhow::Result<Option<OrderSnapshot>> {
        Ok(None)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> anyhow::Result<()>;
    async fn modify_order(&self, broker_order_id: &str, new_quantity: Option<f64>, new_price: Option<f64>) -> anyhow::Result<()>;
    async fn refresh_positions(&self) -> anyhow::Result<Vec<Position>> {
        self.get_positions().await
    }
}

pub fn order_type_for_side(side: Side, is_limit: bool) -> OrderType {
    match (side, is_limit) {
        (Side::Buy, true) => OrderType::LimitBuy,
        (Side::Sell, true) => OrderType::LimitSell,
        (Side::Buy, false) => OrderType::StopBuy,
        (Side::Sell, false) => OrderType::StopSell,
    }
}

//! Reference `BrokerAccount` implementation used by integration tests (spec
//! §8 scenario S1's "MockBroker" fixture). Market orders fill immediately at
//! the configured price; limit/stop orders sit `SUBMITTED` until a test calls
//! [`MockBroker::fill_order`] to simulate an execution report.

use super::price_cache::PriceType;
use super::{AccountInfo, BrokerAccount, OrderSnapshot, Position, SubmitRequest};
use crate::db::orders::{OrderStatus, OrderType, TradingOrder};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct MockOrder {
    snapshot: OrderSnapshot,
    symbol: String,
    requested_quantity: f64,
}

pub struct MockBroker {
    next_id: AtomicU64,
    orders: Mutex<HashMap<String, MockOrder>>,
    prices: Mutex<HashMap<String, f64>>,
    account_info: Mutex<AccountInfo>,
    positions: Mutex<Vec<Position>>,
    supported_symbols: Mutex<Option<Vec<String>>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            orders: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            account_info: Mutex::new(AccountInfo {
                equity: 100_000.0,
                cash: 100_000.0,
                buying_power: 100_000.0,
            }),
            positions: Mutex::new(Vec::new()),
            supported_symbols: Mutex::new(None),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    pub fn set_account_info(&self, info: AccountInfo) {
        *self.account_info.lock() = info;
    }

    pub fn restrict_symbols(&self, symbols: Vec<String>) {
        *self.supported_symbols.lock() = Some(symbols);
    }

    /// Test hook: simulates an execution report arriving for a previously
    /// submitted order.
    pub fn fill_order(&self, broker_order_id: &str, filled_quantity: f64, price: f64) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(broker_order_id) {
            order.snapshot.filled_quantity = filled_quantity;
            order.snapshot.open_price = Some(price);
            order.snapshot.status = if filled_quantity + 1e-9 >= order.requested_quantity {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
        }
    }

    pub fn reject_order(&self, broker_order_id: &str) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(broker_order_id) {
            order.snapshot.status = OrderStatus::Rejected;
        }
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl BrokerAccount for MockBroker {
    fn provider_tag(&self) -> &str {
        "mock"
    }

    async fn get_balance(&self) -> anyhow::Result<Option<f64>> {
        Ok(Some(self.account_info.lock().cash))
    }

    async fn get_account_info(&self) -> anyhow::Result<AccountInfo> {
        Ok(*self.account_info.lock())
    }

    async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        Ok(self.positions.lock().clone())
    }

    async fn get_orders(&self, status: Option<OrderStatus>) -> anyhow::Result<Vec<OrderSnapshot>> {
        Ok(self
            .orders
            .lock()
            .values()
            .map(|o| o.snapshot.clone())
            .filter(|s| status.map(|st| st == s.status).unwrap_or(true))
            .collect())
    }

    async fn get_order(&self, broker_order_id: &str) -> anyhow::Result<Option<OrderSnapshot>> {
        Ok(self.orders.lock().get(broker_order_id).map(|o| o.snapshot.clone()))
    }

    async fn symbols_exist(&self, symbols: &[String]) -> anyhow::Result<HashMap<String, bool>> {
        let restricted = self.supported_symbols.lock().clone();
        Ok(symbols
            .iter()
            .map(|s| {
                let exists = restricted.as_ref().map(|list| list.contains(s)).unwrap_or(true);
                (s.clone(), exists)
            })
            .collect())
    }

    async fn _get_instrument_current_price_impl(&self, symbols: &[String], _price_type: PriceType) -> anyhow::Result<HashMap<String, f64>> {
        let prices = self.prices.lock();
        Ok(symbols
            .iter()
            .map(|s| (s.clone(), prices.get(s).copied().unwrap_or(100.0)))
            .collect())
    }

    async fn _submit_order_impl(&self, req: &SubmitRequest) -> anyhow::Result<OrderSnapshot> {
        let order: &TradingOrder = &req.order;
        let broker_order_id = self.next_order_id();
        let price = self.prices.lock().get(&order.symbol).copied().unwrap_or(100.0);

        let snapshot = if order.order_type == OrderType::Market {
            OrderSnapshot {
                broker_order_id: broker_order_id.clone(),
                status: OrderStatus::Filled,
                filled_quantity: order.quantity,
                open_price: Some(price),
            }
        } else {
            OrderSnapshot {
                broker_order_id: broker_order_id.clone(),
                status: OrderStatus::Submitted,
                filled_quantity: 0.0,
                open_price: None,
            }
        };

        self.orders.lock().insert(
            broker_order_id,
            MockOrder {
                snapshot: snapshot.clone(),
                symbol: order.symbol.clone(),
                requested_quantity: order.quantity,
            },
        );
        Ok(snapshot)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> anyhow::Result<()> {
        if let Some(order) = self.orders.lock().get_mut(broker_order_id) {
            order.snapshot.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn modify_order(&self, broker_order_id: &str, new_quantity: Option<f64>, new_price: Option<f64>) -> anyhow::Result<()> {
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(broker_order_id) else {
            return Ok(());
        };
        if let Some(q) = new_quantity {
            order.snapshot.filled_quantity = order.snapshot.filled_quantity.min(q);
        }
        if let Some(p) = new_price {
            order.snapshot.open_price = Some(p);
            let symbol = order.symbol.clone();
            drop(orders);
            self.set_price(&symbol, p);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::transactions::Side;

    fn draft_order(symbol: &str, side: Side, quantity: f64, order_type: OrderType) -> TradingOrder {
        TradingOrder {
            id: 0,
            account_id: 1,
            transaction_id: Some(1),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type,
            limit_price: None,
            stop_price: None,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            open_price: None,
            broker_order_id: None,
            depends_on_order: None,
            depends_order_status_trigger: None,
            good_for: crate::db::orders::GoodFor::Gtc,
            comment: String::new(),
            data: serde_json::json!({}),
            created_at: crate::db::now_iso(),
        }
    }

    #[tokio::test]
    async fn market_order_fills_immediately() {
        let broker = MockBroker::new();
        broker.set_price("AAPL", 150.0);
        let snapshot = broker
            ._submit_order_impl(&SubmitRequest {
                order: draft_order("AAPL", Side::Buy, 10.0, OrderType::Market),
                tp_percent: None,
                sl_percent: None,
            })
            .await
            .unwrap();
        assert_eq!(snapshot.status, OrderStatus::Filled);
        assert_eq!(snapshot.filled_quantity, 10.0);
        assert_eq!(snapshot.open_price, Some(150.0));
    }

    #[tokio::test]
    async fn limit_order_waits_for_manual_fill() {
        let broker = MockBroker::new();
        let snapshot = broker
            ._submit_order_impl(&SubmitRequest {
                order: draft_order("AAPL", Side::Sell, 5.0, OrderType::LimitSell),
                tp_percent: None,
                sl_percent: None,
            })
            .await
            .unwrap();
        assert_eq!(snapshot.status, OrderStatus::Submitted);
        broker.fill_order(&snapshot.broker_order_id, 5.0, 160.0);
        let refreshed = broker.get_order(&snapshot.broker_order_id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, OrderStatus::Filled);
        assert_eq!(refreshed.open_price, Some(160.0));
    }

    #[tokio::test]
    async fn restricted_symbols_report_nonexistent() {
        let broker = MockBroker::new();
        broker.restrict_symbols(vec!["AAPL".to_string()]);
        let existence = broker.symbols_exist(&["AAPL".to_string(), "ZZZZ".to_string()]).await.unwrap();
        assert_eq!(existence.get("AAPL"), Some(&true));
        assert_eq!(existence.get("ZZZZ"), Some(&false));
    }
}

use super::{now_iso, Db};
use super::transactions::Side;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    LimitBuy,
    LimitSell,
    StopBuy,
    StopSell,
    StopLimitBuy,
    StopLimitSell,
    Oco,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::LimitBuy => "LIMIT_BUY",
            OrderType::LimitSell => "LIMIT_SELL",
            OrderType::StopBuy => "STOP_BUY",
            OrderType::StopSell => "STOP_SELL",
            OrderType::StopLimitBuy => "STOP_LIMIT_BUY",
            OrderType::StopLimitSell => "STOP_LIMIT_SELL",
            OrderType::Oco => "OCO",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "LIMIT_BUY" => OrderType::LimitBuy,
            "LIMIT_SELL" => OrderType::LimitSell,
            "STOP_BUY" => OrderType::StopBuy,
            "STOP_SELL" => OrderType::StopSell,
            "STOP_LIMIT_BUY" => OrderType::StopLimitBuy,
            "STOP_LIMIT_SELL" => OrderType::StopLimitSell,
            "OCO" => OrderType::Oco,
            _ => OrderType::Market,
        }
    }
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::LimitBuy | OrderType::LimitSell | OrderType::StopLimitBuy | OrderType::StopLimitSell)
    }
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::StopBuy | OrderType::StopSell | OrderType::StopLimitBuy | OrderType::StopLimitSell)
    }
    pub fn is_limit(&self) -> bool {
        matches!(self, OrderType::LimitBuy | OrderType::LimitSell)
    }
    pub fn is_stop(&self) -> bool {
        matches!(self, OrderType::StopBuy | OrderType::StopSell)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    WaitingTrigger,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Error,
    Closed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::WaitingTrigger => "WAITING_TRIGGER",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Error => "ERROR",
            OrderStatus::Closed => "CLOSED",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "WAITING_TRIGGER" => OrderStatus::WaitingTrigger,
            "SUBMITTED" => OrderStatus::Submitted,
            "ACCEPTED" => OrderStatus::Accepted,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            "ERROR" => OrderStatus::Error,
            "CLOSED" => OrderStatus::Closed,
            _ => OrderStatus::Pending,
        }
    }
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired | OrderStatus::Error | OrderStatus::Closed | OrderStatus::Filled
        )
    }
    pub fn is_executed(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GoodFor {
    Gtc,
    Day,
    Ioc,
    Fok,
}

impl GoodFor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoodFor::Gtc => "GTC",
            GoodFor::Day => "DAY",
            GoodFor::Ioc => "IOC",
            GoodFor::Fok => "FOK",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "DAY" => GoodFor::Day,
            "IOC" => GoodFor::Ioc,
            "FOK" => GoodFor::Fok,
            _ => GoodFor::Gtc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingOrder {
    pub id: i64,
    pub account_id: i64,
    pub transaction_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub open_price: Option<f64>,
    pub broker_order_id: Option<String>,
    pub depends_on_order: Option<i64>,
    pub depends_order_status_trigger: Option<OrderStatus>,
    pub good_for: GoodFor,
    pub comment: String,
    pub data: serde_json::Value,
    pub created_at: String,
}

impl TradingOrder {
    pub fn is_entry(&self) -> bool {
        self.depends_on_order.is_none()
    }
}

impl Db {
    pub async fn insert_order(&self, order: &TradingOrder) -> rusqlite::Result<TradingOrder> {
        let order = order.clone();
        self.with_conn("insert_order", move |conn| {
            conn.execute(
                "INSERT INTO trading_orders
                 (account_id, transaction_id, symbol, side, quantity, order_type, limit_price, stop_price,
                  status, filled_quantity, open_price, broker_order_id, depends_on_order,
                  depends_order_status_trigger, good_for, comment, data, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                params![
                    order.account_id,
                    order.transaction_id,
                    order.symbol,
                    order.side.as_str(),
                    order.quantity,
                    order.order_type.as_str(),
                    order.limit_price,
                    order.stop_price,
                    order.status.as_str(),
                    order.filled_quantity,
                    order.open_price,
                    order.broker_order_id,
                    order.depends_on_order,
                    order.depends_order_status_trigger.map(|s| s.as_str()),
                    order.good_for.as_str(),
                    order.comment,
                    order.data.to_string(),
                    order.created_at,
                ],
            )?;
            let id = conn.last_insert_rowid();
            let mut out = order;
            out.id = id;
            Ok(out)
        })
        .await
    }

    pub async fn get_order(&self, id: i64) -> rusqlite::Result<Option<TradingOrder>> {
        self.with_conn("get_order", move |conn| {
            conn.query_row(&select_order_sql("WHERE id = ?1"), params![id], row_to_order)
                .optional()
        })
        .await
    }

    pub async fn update_order(&self, order: &TradingOrder) -> rusqlite::Result<()> {
        let order = order.clone();
        self.with_conn("update_order", move |conn| {
            conn.execute(
                "UPDATE trading_orders SET transaction_id=?1, quantity=?2, status=?3, filled_quantity=?4,
                    open_price=?5, broker_order_id=?6, limit_price=?7, stop_price=?8, comment=?9, data=?10
                 WHERE id = ?11",
                params![
                    order.transaction_id,
                    order.quantity,
                    order.status.as_str(),
                    order.filled_quantity,
                    order.open_price,
                    order.broker_order_id,
                    order.limit_price,
                    order.stop_price,
                    order.comment,
                    order.data.to_string(),
                    order.id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn orders_for_transaction(&self, transaction_id: i64) -> rusqlite::Result<Vec<TradingOrder>> {
        self.with_conn("orders_for_transaction", move |conn| {
            let mut stmt = conn.prepare(&select_order_sql("WHERE transaction_id = ?1 ORDER BY id"))?;
            let rows = stmt.query_map(params![transaction_id], row_to_order)?;
            rows.collect()
        })
        .await
    }

    pub async fn non_terminal_orders_for_account(&self, account_id: i64) -> rusqlite::Result<Vec<TradingOrder>> {
        self.with_conn("non_terminal_orders_for_account", move |conn| {
            let mut stmt = conn.prepare(&select_order_sql(
                "WHERE account_id = ?1 AND status NOT IN ('FILLED','CANCELED','REJECTED','EXPIRED','ERROR','CLOSED') ORDER BY id",
            ))?;
            let rows = stmt.query_map(params![account_id], row_to_order)?;
            rows.collect()
        })
        .await
    }

    pub async fn waiting_trigger_orders_depending_on(&self, parent_id: i64) -> rusqlite::Result<Vec<TradingOrder>> {
        self.with_conn("waiting_trigger_orders_depending_on", move |conn| {
            let mut stmt = conn.prepare(&select_order_sql(
                "WHERE depends_on_order = ?1 AND status = 'WAITING_TRIGGER' ORDER BY id",
            ))?;
            let rows = stmt.query_map(params![parent_id], row_to_order)?;
            rows.collect()
        })
        .await
    }

    pub async fn oldest_filled_entry_order(&self, transaction_id: i64) -> rusqlite::Result<Option<TradingOrder>> {
        self.with_conn("oldest_filled_entry_order", move |conn| {
            conn.query_row(
                &select_order_sql(
                    "WHERE transaction_id = ?1 AND depends_on_order IS NULL AND status IN ('FILLED','PARTIALLY_FILLED')
                     ORDER BY created_at ASC, id ASC LIMIT 1",
                ),
                params![transaction_id],
                row_to_order,
            )
            .optional()
        })
        .await
    }

    pub async fn most_recent_filled_closing_order(&self, transaction_id: i64) -> rusqlite::Result<Option<TradingOrder>> {
        self.with_conn("most_recent_filled_closing_order", move |conn| {
            conn.query_row(
                &select_order_sql(
                    "WHERE transaction_id = ?1 AND depends_on_order IS NOT NULL AND status IN ('FILLED','PARTIALLY_FILLED')
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                ),
                params![transaction_id],
                row_to_order,
            )
            .optional()
        })
        .await
    }

    /// Existing active (non-terminal) TP or SL order for a transaction: a
    /// limit-only order (TP) or a stop-only order (SL) on the opposite side
    /// to the entry (spec §4.B.5).
    pub async fn active_tp_order(&self, transaction_id: i64, entry_side: Side) -> rusqlite::Result<Option<TradingOrder>> {
        let opp = entry_side.opposite();
        self.with_conn("active_tp_order", move |conn| {
            conn.query_row(
                &select_order_sql(
                    "WHERE transaction_id = ?1 AND side = ?2 AND limit_price IS NOT NULL AND stop_price IS NULL
                     AND status NOT IN ('FILLED','CANCELED','REJECTED','EXPIRED','ERROR','CLOSED')
                     ORDER BY id DESC LIMIT 1",
                ),
                params![transaction_id, opp.as_str()],
                row_to_order,
            )
            .optional()
        })
        .await
    }

    pub async fn active_sl_order(&self, transaction_id: i64, entry_side: Side) -> rusqlite::Result<Option<TradingOrder>> {
        let opp = entry_side.opposite();
        self.with_conn("active_sl_order", move |conn| {
            conn.query_row(
                &select_order_sql(
                    "WHERE transaction_id = ?1 AND side = ?2 AND stop_price IS NOT NULL AND limit_price IS NULL
                     AND status NOT IN ('FILLED','CANCELED','REJECTED','EXPIRED','ERROR','CLOSED')
                     ORDER BY id DESC LIMIT 1",
                ),
                params![transaction_id, opp.as_str()],
                row_to_order,
            )
            .optional()
        })
        .await
    }
}

fn select_order_sql(clause: &str) -> String {
    format!(
        "SELECT id, account_id, transaction_id, symbol, side, quantity, order_type, limit_price, stop_price,
                status, filled_quantity, open_price, broker_order_id, depends_on_order,
                depends_order_status_trigger, good_for, comment, data, created_at
         FROM trading_orders {clause}"
    )
}

fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<TradingOrder> {
    let side: String = row.get(4)?;
    let order_type: String = row.get(6)?;
    let status: String = row.get(9)?;
    let trigger: Option<String> = row.get(14)?;
    let good_for: String = row.get(15)?;
    let data_raw: String = row.get(17)?;
    Ok(TradingOrder {
        id: row.get(0)?,
        account_id: row.get(1)?,
        transaction_id: row.get(2)?,
        symbol: row.get(3)?,
        side: Side::from_str(&side),
        quantity: row.get(5)?,
        order_type: OrderType::from_str(&order_type),
        limit_price: row.get(7)?,
        stop_price: row.get(8)?,
        status: OrderStatus::from_str(&status),
        filled_quantity: row.get(10)?,
        open_price: row.get(11)?,
        broker_order_id: row.get(12)?,
        depends_on_order: row.get(13)?,
        depends_order_status_trigger: trigger.as_deref().map(OrderStatus::from_str),
        good_for: GoodFor::from_str(&good_for),
        comment: row.get(16)?,
        data: serde_json::from_str(&data_raw).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get(18)?,
    })
}

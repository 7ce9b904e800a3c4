use super::{now_iso, Db};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
    pub fn from_str(s: &str) -> Self {
        if s == "SELL" {
            Side::Sell
        } else {
            Side::Buy
        }
    }
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Waiting,
    Opened,
    Closing,
    Closed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Waiting => "WAITING",
            TransactionStatus::Opened => "OPENED",
            TransactionStatus::Closing => "CLOSING",
            TransactionStatus::Closed => "CLOSED",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "OPENED" => TransactionStatus::Opened,
            "CLOSING" => TransactionStatus::Closing,
            "CLOSED" => TransactionStatus::Closed,
            _ => TransactionStatus::Waiting,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub side: Side,
    pub open_price: Option<f64>,
    pub close_price: Option<f64>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,
    pub status: TransactionStatus,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub expert_instance_id: i64,
    pub close_reason: Option<String>,
}

impl Db {
    pub async fn create_transaction(
        &self,
        symbol: &str,
        quantity: f64,
        side: Side,
        open_price: f64,
        expert_instance_id: i64,
    ) -> rusqlite::Result<Transaction> {
        let symbol = symbol.to_string();
        self.with_conn("create_transaction", move |conn| {
            conn.execute(
                "INSERT INTO transactions (symbol, quantity, side, open_price, status, expert_instance_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![symbol, quantity, side.as_str(), open_price, TransactionStatus::Waiting.as_str(), expert_instance_id],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Transaction {
                id,
                symbol,
                quantity,
                side,
                open_price: Some(open_price),
                close_price: None,
                open_date: None,
                close_date: None,
                status: TransactionStatus::Waiting,
                take_profit: None,
                stop_loss: None,
                expert_instance_id,
                close_reason: None,
            })
        })
        .await
    }

    pub async fn get_transaction(&self, id: i64) -> rusqlite::Result<Option<Transaction>> {
        self.with_conn("get_transaction", move |conn| {
            conn.query_row(
                "SELECT id, symbol, quantity, side, open_price, close_price, open_date, close_date,
                        status, take_profit, stop_loss, expert_instance_id, close_reason
                 FROM transactions WHERE id = ?1",
                params![id],
                row_to_tx,
            )
            .optional()
        })
        .await
    }

    pub async fn list_transactions(&self) -> rusqlite::Result<Vec<Transaction>> {
        self.with_conn("list_transactions", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, symbol, quantity, side, open_price, close_price, open_date, close_date,
                        status, take_profit, stop_loss, expert_instance_id, close_reason
                 FROM transactions ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_tx)?;
            rows.collect()
        })
        .await
    }

    /// (expert, symbol) pairs currently WAITING or OPENED — used by the Worker
    /// Queue's ENTER_MARKET skip check and by the `OPEN_POSITIONS` instrument
    /// expansion (spec §4.D, §4.E).
    pub async fn open_symbols_for_expert(&self, expert_instance_id: i64) -> rusqlite::Result<Vec<String>> {
        self.with_conn("open_symbols_for_expert", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT symbol FROM transactions
                 WHERE expert_instance_id = ?1 AND status IN ('WAITING', 'OPENED')
                 ORDER BY symbol",
            )?;
            let rows = stmt.query_map(params![expert_instance_id], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    pub async fn has_open_transaction(&self, expert_instance_id: i64, symbol: &str) -> rusqlite::Result<bool> {
        let symbol = symbol.to_string();
        self.with_conn("has_open_transaction", move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM transactions
                 WHERE expert_instance_id = ?1 AND symbol = ?2 AND status IN ('WAITING', 'OPENED')",
                params![expert_instance_id, symbol],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn update_transaction(&self, tx: &Transaction) -> rusqlite::Result<()> {
        let tx = tx.clone();
        self.with_conn("update_transaction", move |conn| {
            conn.execute(
                "UPDATE transactions SET quantity = ?1, side = ?2, open_price = ?3, close_price = ?4,
                    open_date = ?5, close_date = ?6, status = ?7, take_profit = ?8, stop_loss = ?9,
                    close_reason = ?10
                 WHERE id = ?11",
                params![
                    tx.quantity,
                    tx.side.as_str(),
                    tx.open_price,
                    tx.close_price,
                    tx.open_date,
                    tx.close_date,
                    tx.status.as_str(),
                    tx.take_profit,
                    tx.stop_loss,
                    tx.close_reason,
                    tx.id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn open_transaction_now(&self, id: i64) -> rusqlite::Result<()> {
        let now = now_iso();
        self.with_conn("open_transaction_now", move |conn| {
            conn.execute(
                "UPDATE transactions SET status = ?1, open_date = COALESCE(open_date, ?2) WHERE id = ?3",
                params![TransactionStatus::Opened.as_str(), now, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn close_transaction_with_reason(
        &self,
        id: i64,
        close_price: Option<f64>,
        reason: &str,
    ) -> rusqlite::Result<()> {
        let reason = reason.to_string();
        let now = now_iso();
        self.with_conn("close_transaction_with_reason", move |conn| {
            conn.execute(
                "UPDATE transactions SET status = ?1, close_price = COALESCE(?2, close_price),
                    close_date = COALESCE(close_date, ?3), close_reason = ?4 WHERE id = ?5",
                params![TransactionStatus::Closed.as_str(), close_price, now, reason, id],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_tx(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let side: String = row.get(3)?;
    let status: String = row.get(8)?;
    Ok(Transaction {
        id: row.get(0)?,
        symbol: row.get(1)?,
        quantity: row.get(2)?,
        side: Side::from_str(&side),
        open_price: row.get(4)?,
        close_price: row.get(5)?,
        open_date: row.get(6)?,
        close_date: row.get(7)?,
        status: TransactionStatus::from_str(&status),
        take_profit: row.get(9)?,
        stop_loss: row.get(10)?,
        expert_instance_id: row.get(11)?,
        close_reason: row.get(12)?,
    })
}

use super::Db;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub kind: String,
    pub categories: Vec<String>,
    pub labels: Vec<String>,
}

impl Db {
    /// Auto-adds the instrument with label `auto_added` if it doesn't already
    /// exist (supplemented from `JobManager.submit_market_analysis`, see
    /// SPEC_FULL §2).
    pub async fn ensure_instrument(&self, symbol: &str) -> rusqlite::Result<Instrument> {
        if let Some(existing) = self.get_instrument_by_symbol(symbol).await? {
            return Ok(existing);
        }
        let symbol = symbol.to_string();
        self.with_conn("ensure_instrument", move |conn| {
            conn.execute(
                "INSERT INTO instruments (symbol, kind, categories, labels) VALUES (?1, 'stock', '[]', ?2)",
                params![symbol, serde_json::to_string(&vec!["auto_added"]).unwrap()],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Instrument {
                id,
                symbol,
                kind: "stock".to_string(),
                categories: vec![],
                labels: vec!["auto_added".to_string()],
            })
        })
        .await
    }

    pub async fn get_instrument_by_symbol(&self, symbol: &str) -> rusqlite::Result<Option<Instrument>> {
        let symbol = symbol.to_string();
        self.with_conn("get_instrument_by_symbol", move |conn| {
            conn.query_row(
                "SELECT id, symbol, kind, categories, labels FROM instruments WHERE symbol = ?1",
                params![symbol],
                row_to_instrument,
            )
            .optional()
        })
        .await
    }

    pub async fn list_instruments(&self) -> rusqlite::Result<Vec<Instrument>> {
        self.with_conn("list_instruments", |conn| {
            let mut stmt = conn.prepare("SELECT id, symbol, kind, categories, labels FROM instruments ORDER BY symbol")?;
            let rows = stmt.query_map([], row_to_instrument)?;
            rows.collect()
        })
        .await
    }
}

fn row_to_instrument(row: &rusqlite::Row) -> rusqlite::Result<Instrument> {
    let categories_raw: String = row.get(3)?;
    let labels_raw: String = row.get(4)?;
    Ok(Instrument {
        id: row.get(0)?,
        symbol: row.get(1)?,
        kind: row.get(2)?,
        categories: serde_json::from_str(&categories_raw).unwrap_or_default(),
        labels: serde_json::from_str(&labels_raw).unwrap_or_default(),
    })
}

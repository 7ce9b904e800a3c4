//! Extensible, typed key/value settings attached to an account, an expert
//! instance, or the application itself (spec §4.A "get_setting", §3 Setting).

use super::Db;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value")]
pub enum SettingValue {
    Str(String),
    Float(f64),
    Bool(bool),
    Json(serde_json::Value),
}

impl SettingValue {
    fn kind_tag(&self) -> &'static str {
        match self {
            SettingValue::Str(_) => "string",
            SettingValue::Float(_) => "float",
            SettingValue::Bool(_) => "bool",
            SettingValue::Json(_) => "json",
        }
    }

    fn to_storage(&self) -> String {
        match self {
            SettingValue::Str(s) => s.clone(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Json(v) => v.to_string(),
        }
    }

    fn from_storage(kind: &str, raw: &str) -> Self {
        match kind {
            "float" => SettingValue::Float(raw.parse().unwrap_or(0.0)),
            "bool" => SettingValue::Bool(raw == "true"),
            "json" => SettingValue::Json(serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)),
            _ => SettingValue::Str(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            SettingValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingOwner {
    Account(i64),
    Expert(i64),
    App,
}

impl SettingOwner {
    fn parts(&self) -> (&'static str, Option<i64>) {
        match self {
            SettingOwner::Account(id) => ("account", Some(*id)),
            SettingOwner::Expert(id) => ("expert", Some(*id)),
            SettingOwner::App => ("app", None),
        }
    }
}

impl Db {
    pub async fn set_setting(
        &self,
        owner: SettingOwner,
        key: &str,
        value: SettingValue,
    ) -> rusqlite::Result<()> {
        let (owner_kind, owner_id) = owner.parts();
        let key = key.to_string();
        let value_kind = value.kind_tag();
        let raw = value.to_storage();
        self.with_conn("set_setting", move |conn| {
            conn.execute(
                "INSERT INTO settings (owner_kind, owner_id, key, value_kind, value)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(owner_kind, owner_id, key) DO UPDATE SET
                    value_kind = excluded.value_kind,
                    value = excluded.value",
                params![owner_kind, owner_id, key, value_kind, raw],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_setting(&self, owner: SettingOwner, key: &str) -> rusqlite::Result<Option<SettingValue>> {
        let (owner_kind, owner_id) = owner.parts();
        let key = key.to_string();
        self.with_conn("get_setting", move |conn| {
            conn.query_row(
                "SELECT value_kind, value FROM settings WHERE owner_kind = ?1 AND owner_id IS ?2 AND key = ?3",
                params![owner_kind, owner_id, key],
                |row| {
                    let kind: String = row.get(0)?;
                    let raw: String = row.get(1)?;
                    Ok(SettingValue::from_storage(&kind, &raw))
                },
            )
            .optional()
        })
        .await
    }

    pub async fn get_setting_or_default(&self, owner: SettingOwner, key: &str, default: SettingValue) -> SettingValue {
        self.get_setting(owner, key).await.ok().flatten().unwrap_or(default)
    }

    pub async fn list_settings(&self, owner: SettingOwner) -> rusqlite::Result<Vec<(String, SettingValue)>> {
        let (owner_kind, owner_id) = owner.parts();
        self.with_conn("list_settings", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value_kind, value FROM settings WHERE owner_kind = ?1 AND owner_id IS ?2",
            )?;
            let rows = stmt.query_map(params![owner_kind, owner_id], |row| {
                let key: String = row.get(0)?;
                let kind: String = row.get(1)?;
                let raw: String = row.get(2)?;
                Ok((key, SettingValue::from_storage(&kind, &raw)))
            })?;
            rows.collect()
        })
        .await
    }
}

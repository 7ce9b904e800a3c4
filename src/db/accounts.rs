use super::Db;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDefinition {
    pub id: i64,
    pub provider_tag: String,
    pub name: String,
    pub description: Option<String>,
}

impl Db {
    pub async fn add_account(
        &self,
        provider_tag: &str,
        name: &str,
        description: Option<&str>,
    ) -> rusqlite::Result<AccountDefinition> {
        let provider_tag = provider_tag.to_string();
        let name = name.to_string();
        let description = description.map(|s| s.to_string());
        self.with_conn("add_account", move |conn| {
            conn.execute(
                "INSERT INTO account_definitions (provider_tag, name, description) VALUES (?1, ?2, ?3)",
                params![provider_tag, name, description],
            )?;
            let id = conn.last_insert_rowid();
            Ok(AccountDefinition {
                id,
                provider_tag,
                name,
                description,
            })
        })
        .await
    }

    pub async fn get_account(&self, id: i64) -> rusqlite::Result<Option<AccountDefinition>> {
        self.with_conn("get_account", move |conn| {
            conn.query_row(
                "SELECT id, provider_tag, name, description FROM account_definitions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(AccountDefinition {
                        id: row.get(0)?,
                        provider_tag: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    pub async fn list_accounts(&self) -> rusqlite::Result<Vec<AccountDefinition>> {
        self.with_conn("list_accounts", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, provider_tag, name, description FROM account_definitions ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(AccountDefinition {
                    id: row.get(0)?,
                    provider_tag: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

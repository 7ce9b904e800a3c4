//! SQL schema for every entity family in spec §3.
//!
//! Grounded in `vault/vault_db.rs`'s `CREATE TABLE IF NOT EXISTS` + WAL pragma
//! style; generalised from one table family to the full data model.

use rusqlite::{Connection, Result};

pub fn init(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON").ok();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS account_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_tag TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS expert_instances (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES account_definitions(id),
            expert_class_tag TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            virtual_equity_percent REAL NOT NULL DEFAULT 100.0,
            ruleset_id INTEGER,
            alias TEXT
        );

        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_kind TEXT NOT NULL,       -- 'account' | 'expert' | 'app'
            owner_id INTEGER,               -- NULL for app-wide settings
            key TEXT NOT NULL,
            value_kind TEXT NOT NULL,       -- 'string' | 'float' | 'bool' | 'json'
            value TEXT NOT NULL,
            UNIQUE(owner_kind, owner_id, key)
        );

        CREATE TABLE IF NOT EXISTS instruments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL DEFAULT 'stock',
            categories TEXT NOT NULL DEFAULT '[]',
            labels TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS market_analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            expert_instance_id INTEGER NOT NULL REFERENCES expert_instances(id),
            status TEXT NOT NULL,
            use_case TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS analysis_outputs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            market_analysis_id INTEGER NOT NULL REFERENCES market_analyses(id),
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS expert_recommendations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            expert_instance_id INTEGER NOT NULL REFERENCES expert_instances(id),
            market_analysis_id INTEGER NOT NULL REFERENCES market_analyses(id),
            symbol TEXT NOT NULL,
            action TEXT NOT NULL,
            expected_profit_percent REAL NOT NULL,
            price_at_issue REAL NOT NULL,
            confidence REAL NOT NULL,
            risk_level TEXT NOT NULL,
            time_horizon TEXT NOT NULL,
            details TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            quantity REAL NOT NULL,
            side TEXT NOT NULL,
            open_price REAL,
            close_price REAL,
            open_date TEXT,
            close_date TEXT,
            status TEXT NOT NULL,
            take_profit REAL,
            stop_loss REAL,
            expert_instance_id INTEGER NOT NULL REFERENCES expert_instances(id),
            close_reason TEXT
        );

        CREATE TABLE IF NOT EXISTS trading_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES account_definitions(id),
            transaction_id INTEGER REFERENCES transactions(id),
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity REAL NOT NULL,
            order_type TEXT NOT NULL,
            limit_price REAL,
            stop_price REAL,
            status TEXT NOT NULL,
            filled_quantity REAL NOT NULL DEFAULT 0.0,
            open_price REAL,
            broker_order_id TEXT,
            depends_on_order INTEGER REFERENCES trading_orders(id),
            depends_order_status_trigger TEXT,
            good_for TEXT NOT NULL DEFAULT 'GTC',
            comment TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rulesets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            subtype TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS event_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ruleset_id INTEGER NOT NULL REFERENCES rulesets(id),
            kind TEXT NOT NULL,
            order_index INTEGER NOT NULL,
            triggers TEXT NOT NULL DEFAULT '[]',
            actions TEXT NOT NULL DEFAULT '[]',
            continue_processing INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_event_actions_ruleset_order
            ON event_actions(ruleset_id, order_index);

        CREATE TABLE IF NOT EXISTS queue_tasks (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            priority INTEGER NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            dedup_key TEXT NOT NULL,
            batch_id TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            submitted_at TEXT NOT NULL,
            claimed_at TEXT,
            completed_at TEXT,
            seq INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_tasks_status_priority
            ON queue_tasks(status, priority, seq);
        CREATE INDEX IF NOT EXISTS idx_queue_tasks_dedup
            ON queue_tasks(dedup_key, status);

        CREATE TABLE IF NOT EXISTS activity_log (
            id TEXT PRIMARY KEY,
            severity TEXT NOT NULL,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            account_id INTEGER,
            expert_instance_id INTEGER,
            created_at TEXT NOT NULL,
            seq INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_log_created ON activity_log(created_at DESC);

        CREATE TABLE IF NOT EXISTS llm_usage_log (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
}

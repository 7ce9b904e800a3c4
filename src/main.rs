//! Application bootstrap (spec §7): load config, open the database, rebuild
//! broker/expert/executor/queue/scheduler state, reconcile anything left
//! dangling by a previous crash, then serve the diagnostics API.

use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use trade_core::api;
use trade_core::broker::base::BrokerAccountHandle;
use trade_core::broker::mock::MockBroker;
use trade_core::broker::price_cache::PriceCache;
use trade_core::broker::BrokerAccount;
use trade_core::config::{Cli, Config};
use trade_core::db::settings::{SettingOwner, SettingValue};
use trade_core::db::Db;
use trade_core::expert::{Expert, ExpertRegistry, MomentumExpert};
use trade_core::queue::executor::{DefaultExecutor, TaskExecutor};
use trade_core::queue::WorkerQueue;
use trade_core::scheduler::JobManager;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("trade_core=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_cli(Cli::parse());
    let db = Db::open(&config.db_file)?;
    seed_app_settings(&db).await?;
    db.refresh_perf_log_threshold().await?;

    let price_cache_secs = db
        .get_setting_or_default(SettingOwner::App, "price_cache_time_secs", SettingValue::Float(60.0))
        .await
        .as_f64()
        .unwrap_or(60.0) as u64;
    let price_cache = Arc::new(PriceCache::new(price_cache_secs));

    let accounts = bind_accounts(&db, &price_cache).await?;
    reconcile_on_startup(&db, &accounts).await?;

    let mut registry = ExpertRegistry::new();
    registry.register("momentum", || Arc::new(MomentumExpert) as Arc<dyn Expert>);
    let experts = Arc::new(registry);

    let executor = Arc::new(DefaultExecutor::new(db.clone(), accounts.clone(), experts.clone()));
    let queue = WorkerQueue::new(db.clone(), executor.clone() as Arc<dyn TaskExecutor>, 2);
    executor.bind_queue(&queue);
    queue.recover().await?;
    let _worker_handles = queue.spawn_workers();

    let job_manager = JobManager::new(db.clone(), queue.clone(), experts.clone(), accounts);
    job_manager.refresh_all().await?;
    let _scheduler_handles = job_manager.spawn();

    let app = api::build_router(db, queue, job_manager);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "trade-core listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Seeds every application setting with its documented default if absent
/// (spec §6 "Application setting keys").
async fn seed_app_settings(db: &Db) -> anyhow::Result<()> {
    let defaults: [(&str, SettingValue); 4] = [
        ("min_tp_sl_percent", SettingValue::Float(3.0)),
        ("account_refresh_interval", SettingValue::Float(5.0)),
        ("price_cache_time_secs", SettingValue::Float(60.0)),
        ("db_perf_log_threshold_ms", SettingValue::Float(100.0)),
    ];
    for (key, value) in defaults {
        if db.get_setting(SettingOwner::App, key).await?.is_none() {
            db.set_setting(SettingOwner::App, key, value).await?;
        }
    }
    Ok(())
}

/// Instantiates one `BrokerAccountHandle` per persisted account definition.
/// Only the `mock` provider tag ships in this core crate; accounts bound to
/// any other tag are skipped with a warning until a concrete provider for
/// that tag is registered here (spec §6 "provider contract").
async fn bind_accounts(db: &Db, price_cache: &Arc<PriceCache>) -> anyhow::Result<HashMap<i64, Arc<BrokerAccountHandle>>> {
    let mut accounts = HashMap::new();
    for account in db.list_accounts().await? {
        let provider: Arc<dyn BrokerAccount> = match account.provider_tag.as_str() {
            "mock" => Arc::new(MockBroker::new()),
            other => {
                tracing::warn!(provider = other, account_id = account.id, "no concrete broker provider registered, skipping account");
                continue;
            }
        };
        let handle = Arc::new(BrokerAccountHandle::new(account.id, db.clone(), provider, price_cache.clone()));
        accounts.insert(account.id, handle);
    }
    Ok(accounts)
}

/// Startup reconciliation (spec §7, SPEC_FULL §2): anything the previous
/// process left mid-flight gets resolved before the scheduler starts firing
/// new work.
async fn reconcile_on_startup(db: &Db, accounts: &HashMap<i64, Arc<BrokerAccountHandle>>) -> anyhow::Result<()> {
    let stuck = db.fail_stuck_running_analyses().await?;
    if !stuck.is_empty() {
        tracing::warn!(count = stuck.len(), "failed analyses left running across restart");
    }
    for broker in accounts.values() {
        broker.resync_all_transactions().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }
    Ok(())
}

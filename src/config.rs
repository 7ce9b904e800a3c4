//! Application configuration.
//!
//! Loaded from the CLI surface (spec §6) layered over environment variables,
//! the way the teacher's `models::Config::from_env` layers `std::env::var`
//! over `.env` defaults.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "trade-core", about = "Automated trading platform core")]
pub struct Cli {
    #[arg(long, env = "DB_FILE", default_value = "db.sqlite")]
    pub db_file: PathBuf,

    #[arg(long, env = "CACHE_FOLDER", default_value = "cache")]
    pub cache_folder: PathBuf,

    #[arg(long, env = "LOG_FOLDER", default_value = "logs")]
    pub log_folder: PathBuf,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
}

/// Application-wide settings with defaults, sourced from the `Setting` table
/// (spec §6 "Application setting keys") and seeded on first start if absent.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub min_tp_sl_percent: f64,
    pub account_refresh_interval_minutes: i64,
    pub price_cache_time_secs: u64,
    pub db_perf_log_threshold_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            min_tp_sl_percent: 3.0,
            account_refresh_interval_minutes: 5,
            price_cache_time_secs: 60,
            db_perf_log_threshold_ms: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_file: PathBuf,
    pub cache_folder: PathBuf,
    pub log_folder: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            db_file: cli.db_file,
            cache_folder: cli.cache_folder,
            log_folder: cli.log_folder,
            port: cli.port,
        }
    }
}

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

use crate::kernel::DEFAULT_CLEANUP_CRON;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Default hold for the full reservation flow.
    pub reservation_hold_hours: i64,
    /// Default hold for the lower-friction selection flow.
    pub selection_hold_hours: i64,
    /// Six-field cron expression for the expiration sweep.
    pub cleanup_cron: String,
    pub store_max_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            reservation_hold_hours: parse_or("RESERVATION_HOLD_HOURS", 48)?,
            selection_hold_hours: parse_or("SELECTION_HOLD_HOURS", 2)?,
            cleanup_cron: env::var("CLEANUP_CRON")
                .unwrap_or_else(|_| DEFAULT_CLEANUP_CRON.to_string()),
            store_max_retries: parse_or("STORE_MAX_RETRIES", 3)?,
        };

        anyhow::ensure!(
            config.reservation_hold_hours > 0 && config.selection_hold_hours > 0,
            "hold windows must be positive"
        );

        Ok(config)
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

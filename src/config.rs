//! Configuration management.
//!
//! Configuration can be set via environment variables:
//! - `DATABASE_URL` - Optional. Path to the SQLite database file (or
//!   `:memory:`). Defaults to `tasks.db` in the working directory.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `PROCESSING_DELAY_SECS` - Optional. Seconds the background worker waits
//!   between the `in_progress` and `completed` transitions. Defaults to `10`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub database_url: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// How long the background worker simulates work for
    pub processing_delay: Duration,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "tasks.db".to_string());
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string(), v))?,
            Err(_) => 3000,
        };

        let processing_delay = match std::env::var("PROCESSING_DELAY_SECS") {
            Ok(v) => {
                let secs: u64 = v.parse().map_err(|_| {
                    ConfigError::InvalidValue("PROCESSING_DELAY_SECS".to_string(), v)
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(10),
        };

        Ok(Self {
            database_url,
            host,
            port,
            processing_delay,
        })
    }
}

//! Typed configuration from environment variables.
//!
//! Loads once at startup. Every value has a default; malformed values fail
//! fast. The worker API key is wrapped in `secrecy::SecretString` so it never
//! ends up in logs and is only exposed when building the worker environment.

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_DIR: &str = "/tmp/workpool-locks";
pub const DEFAULT_LOG_DIR: &str = "/tmp/workpool-logs";
pub const DEFAULT_TRACKER: &str = "bd";
pub const DEFAULT_MAX_AGENTS: usize = 3;
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 30;

#[derive(Debug)]
pub struct Config {
    /// Shared lock registry directory.
    pub lock_dir: PathBuf,
    /// Root for session logs and run ledgers.
    pub log_dir: PathBuf,
    /// Tracker executable (resolved through `PATH`).
    pub tracker_command: String,
    pub max_agents: usize,
    pub timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Forwarded to the worker process as `ANTHROPIC_API_KEY` when set.
    pub worker_api_key: Option<SecretString>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_agents = parse_var(&lookup, "WORKPOOL_MAX_AGENTS", DEFAULT_MAX_AGENTS)?;
        if max_agents == 0 {
            return Err(Error::Config(
                "WORKPOOL_MAX_AGENTS must be at least 1".to_string(),
            ));
        }

        let timeout_minutes =
            parse_var(&lookup, "WORKPOOL_TIMEOUT_MINUTES", DEFAULT_TIMEOUT_MINUTES)?;
        if timeout_minutes == 0 {
            return Err(Error::Config(
                "WORKPOOL_TIMEOUT_MINUTES must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            lock_dir: lookup("WORKPOOL_LOCK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_DIR)),
            log_dir: lookup("WORKPOOL_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            tracker_command: lookup("WORKPOOL_TRACKER")
                .unwrap_or_else(|| DEFAULT_TRACKER.to_string()),
            max_agents,
            timeout: Duration::from_secs(timeout_minutes * 60),
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|s| !s.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            worker_api_key: lookup("ANTHROPIC_API_KEY")
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}

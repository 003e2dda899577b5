//! Error types for workpool.

use std::time::Duration;

use thiserror::Error;

use crate::model::ItemId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// The tracker command could not be run or returned unusable output.
    #[error("tracker unavailable: {0}")]
    TrackerUnavailable(String),

    #[error("Timeout after {}", describe_deadline(.0))]
    InvocationTimeout(Duration),

    /// The worker process failed (spawn error, non-zero exit, broken pipe).
    #[error("{0}")]
    InvocationError(String),

    #[error("worker finished but {0} is not closed")]
    NotClosed(ItemId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Whole minutes when the deadline is at least a minute, seconds otherwise.
fn describe_deadline(deadline: &Duration) -> String {
    let secs = deadline.as_secs();
    if secs >= 60 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{:.1} seconds", deadline.as_secs_f64())
    }
}

//! Core data model.
//!
//! Work items live in the external tracker; the orchestrator only knows their
//! ids. An agent identity binds one worker invocation to the locks it takes,
//! and a worker outcome is what an invocation leaves behind.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// Opaque id of an item in the external tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tracker-owned status of an item, as far as the orchestrator cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Ready,
    InProgress,
    Closed,
    Other(String),
}

impl ItemStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "open" | "ready" => ItemStatus::Ready,
            "in_progress" => ItemStatus::InProgress,
            "closed" => ItemStatus::Closed,
            other => ItemStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Ready => "ready",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Closed => "closed",
            ItemStatus::Other(s) => s.as_str(),
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Agent identity
// ---------------------------------------------------------------------------

/// Lock-holder token for one invocation: `<item>-<8 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentIdentity(pub String);

impl AgentIdentity {
    /// Mint an identity for `item` from the first 8 chars of `session`.
    pub fn mint(item: &ItemId, session: &Uuid) -> Self {
        let session = session.simple().to_string();
        Self(format!("{item}-{}", &session[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How an invocation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    TimedOut,
    Failed,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::TimedOut => "timed_out",
            OutcomeStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Result of one settled invocation. Appended once to the run ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub item_id: ItemId,
    pub agent_id: AgentIdentity,
    pub status: OutcomeStatus,
    pub summary: String,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl WorkerOutcome {
    pub fn success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

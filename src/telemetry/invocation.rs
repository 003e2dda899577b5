//! Invocation span helpers.
//!
//! Every worker invocation runs inside one span; its lifecycle transitions
//! are recorded as events on that span.

use tracing::Span;
use uuid::Uuid;

use crate::model::{AgentIdentity, ItemId};

/// Start a span for one worker invocation.
///
/// `invocation.status` is declared empty and filled in when the
/// invocation settles.
pub fn start_invocation_span(item: &ItemId, agent: &AgentIdentity, session: &Uuid) -> Span {
    tracing::info_span!(
        "invocation",
        "invocation.item" = %item,
        "invocation.agent" = %agent,
        "invocation.session" = %session,
        "invocation.status" = tracing::field::Empty,
    )
}

/// Record a lifecycle transition on `span`.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}

//! Work tracker façade.
//!
//! The tracker owns item state; the orchestrator only lists ready items and
//! requests transitions. Calls are synchronous and bounded by one command
//! invocation each.

pub mod bd;

pub use bd::BdTracker;

use crate::error::Result;
use crate::model::{ItemId, ItemStatus};

pub trait Tracker: Send + Sync + 'static {
    /// Items currently eligible for work, in tracker order.
    ///
    /// An `Err` means the tracker is unavailable this round; callers treat it
    /// as "no ready work" rather than a fatal error.
    fn list_ready(&self) -> Result<Vec<ItemId>>;

    /// Move `id` to in-progress. `false` means "could not claim now", never
    /// "already done".
    fn claim(&self, id: &ItemId) -> bool;

    /// Current status of `id`, `None` when the tracker gives no usable answer.
    fn status(&self, id: &ItemId) -> Option<ItemStatus>;

    /// Best-effort move of `id` back to ready.
    fn reset_to_ready(&self, id: &ItemId) -> Result<()>;

    /// True iff the tracker reports `id` as closed. Missing or malformed
    /// answers count as not closed.
    fn check_closed(&self, id: &ItemId) -> bool {
        matches!(self.status(id), Some(ItemStatus::Closed))
    }
}

//! Worker abstraction.
//!
//! A worker is the opaque agent that actually attempts an item. The runner
//! hands it an [`InvocationContext`] and a channel; the worker streams its
//! progress events into the channel as they happen and resolves once it is
//! done. Dropping the returned future must stop the worker.

pub mod process;
pub mod profile;

pub use process::ProcessWorker;
pub use profile::WorkerProfile;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::event::WorkerEvent;
use crate::model::{AgentIdentity, ItemId};

/// Everything a worker needs to know about one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub item_id: ItemId,
    pub agent_id: AgentIdentity,
    pub session_id: Uuid,
    /// Working directory for the worker.
    pub repo_path: PathBuf,
    /// Lock registry the worker should use.
    pub lock_dir: PathBuf,
    pub deadline: Duration,
}

pub trait Worker: Send + Sync + 'static {
    /// Drive one invocation to completion, sending events as they arrive.
    ///
    /// `Err` is an unrecoverable worker failure; its message becomes the
    /// outcome summary.
    fn run(
        &self,
        ctx: InvocationContext,
        events: mpsc::Sender<WorkerEvent>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Prompt the worker is started with, if any, for the session log.
    fn prompt(&self, _ctx: &InvocationContext) -> Option<String> {
        None
    }
}

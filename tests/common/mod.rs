//! Shared fakes for orchestrator and runner tests.
//!
//! `FakeTracker` keeps item state in memory and records every call in one
//! timeline. `ScriptedWorker` plays a per-item script: take some locks, wait,
//! then close the item, leave it open, fail, or hang.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use workpool::engine::{Orchestrator, OrchestratorConfig, WorkerRunner};
use workpool::error::{Error, Result};
use workpool::event::WorkerEvent;
use workpool::locks::LockRegistry;
use workpool::model::{AgentIdentity, ItemId, ItemStatus};
use workpool::tracker::Tracker;
use workpool::worker::{InvocationContext, Worker};

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListReady,
    Claim(ItemId),
    Status(ItemId),
    Reset(ItemId),
    /// Recorded when a scripted worker closes its item.
    Close(ItemId),
}

#[derive(Default)]
struct TrackerState {
    order: Vec<ItemId>,
    statuses: HashMap<ItemId, ItemStatus>,
    claim_failures: HashSet<ItemId>,
    unavailable: bool,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<TrackerState>,
}

impl FakeTracker {
    pub fn with_ready(ids: &[&str]) -> Arc<Self> {
        let tracker = Self::default();
        {
            let mut state = tracker.state.lock().unwrap();
            for id in ids {
                let id = ItemId::from(*id);
                state.order.push(id.clone());
                state.statuses.insert(id, ItemStatus::Ready);
            }
        }
        Arc::new(tracker)
    }

    pub fn fail_claim(&self, id: &str) {
        self.state.lock().unwrap().claim_failures.insert(ItemId::from(id));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn close(&self, id: &ItemId) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(id.clone(), ItemStatus::Closed);
        state.calls.push(Call::Close(id.clone()));
    }

    pub fn status_of(&self, id: &str) -> Option<ItemStatus> {
        self.state.lock().unwrap().statuses.get(&ItemId::from(id)).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }
}

impl Tracker for FakeTracker {
    fn list_ready(&self) -> Result<Vec<ItemId>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListReady);
        if state.unavailable {
            return Err(Error::TrackerUnavailable("tracker offline".to_string()));
        }
        Ok(state
            .order
            .iter()
            .filter(|id| state.statuses.get(*id) == Some(&ItemStatus::Ready))
            .cloned()
            .collect())
    }

    fn claim(&self, id: &ItemId) -> bool {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Claim(id.clone()));
        if state.claim_failures.contains(id) {
            return false;
        }
        state.statuses.insert(id.clone(), ItemStatus::InProgress);
        true
    }

    fn status(&self, id: &ItemId) -> Option<ItemStatus> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Status(id.clone()));
        state.statuses.get(id).cloned()
    }

    fn reset_to_ready(&self, id: &ItemId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Reset(id.clone()));
        state.statuses.insert(id.clone(), ItemStatus::Ready);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum End {
    /// Close the item in the tracker and report a result.
    Close,
    /// Report a result without closing the item.
    LeaveOpen,
    Fail(String),
    Hang,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub locks: Vec<String>,
    pub delay: Duration,
    pub end: End,
}

impl Script {
    pub fn new(end: End) -> Self {
        Self {
            locks: Vec::new(),
            delay: Duration::ZERO,
            end,
        }
    }

    pub fn close() -> Self {
        Self::new(End::Close)
    }

    pub fn hang() -> Self {
        Self::new(End::Hang)
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn holding(mut self, keys: &[&str]) -> Self {
        self.locks = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

pub struct ScriptedWorker {
    tracker: Arc<FakeTracker>,
    scripts: Mutex<HashMap<ItemId, Script>>,
    default: Script,
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<(ItemId, AgentIdentity)>>,
}

impl ScriptedWorker {
    pub fn new(tracker: Arc<FakeTracker>) -> Self {
        Self {
            tracker,
            scripts: Mutex::new(HashMap::new()),
            default: Script::close(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, script: Script) -> Self {
        self.default = script;
        self
    }

    pub fn script(self, id: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(ItemId::from(id), script);
        self
    }

    /// Highest number of invocations observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<(ItemId, AgentIdentity)> {
        self.started.lock().unwrap().clone()
    }

    pub fn starts_for(&self, id: &str) -> usize {
        let id = ItemId::from(id);
        self.started().iter().filter(|(i, _)| *i == id).count()
    }

    fn enter(&self) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(&self.active)
    }
}

/// Decrements the active count even when the invocation is dropped mid-run.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker for ScriptedWorker {
    async fn run(&self, ctx: InvocationContext, events: mpsc::Sender<WorkerEvent>) -> Result<()> {
        let _active = self.enter();
        self.started
            .lock()
            .unwrap()
            .push((ctx.item_id.clone(), ctx.agent_id.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&ctx.item_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        let registry = LockRegistry::new(&ctx.lock_dir);
        for key in &script.locks {
            assert!(registry.try_acquire(key, &ctx.agent_id)?, "{key} already held");
        }

        let _ = events
            .send(WorkerEvent::Text {
                text: format!("working on {}", ctx.item_id),
            })
            .await;
        tokio::time::sleep(script.delay).await;

        match script.end {
            End::Close => {
                self.tracker.close(&ctx.item_id);
                let _ = events
                    .send(WorkerEvent::Result {
                        result: format!("closed {}", ctx.item_id),
                        is_error: false,
                    })
                    .await;
                Ok(())
            }
            End::LeaveOpen => {
                let _ = events
                    .send(WorkerEvent::Result {
                        result: "done, I think".to_string(),
                        is_error: false,
                    })
                    .await;
                Ok(())
            }
            End::Fail(message) => Err(Error::InvocationError(message)),
            End::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Temporary lock and log directories for one test.
pub struct Dirs {
    pub root: TempDir,
}

impl Dirs {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn locks(&self) -> LockRegistry {
        LockRegistry::new(self.root.path().join("locks"))
    }

    pub fn log_dir(&self) -> std::path::PathBuf {
        self.root.path().join("logs")
    }

    pub fn repo(&self) -> std::path::PathBuf {
        self.root.path().to_path_buf()
    }
}

pub fn orchestrator(
    tracker: &Arc<FakeTracker>,
    worker: &Arc<ScriptedWorker>,
    dirs: &Dirs,
    max_agents: usize,
    deadline: Duration,
) -> Orchestrator<FakeTracker, ScriptedWorker> {
    Orchestrator::new(
        Arc::clone(tracker),
        Arc::clone(worker),
        dirs.locks(),
        OrchestratorConfig {
            max_agents,
            deadline,
            repo_path: dirs.repo(),
            log_dir: dirs.log_dir(),
        },
    )
}

pub fn runner(
    tracker: &Arc<FakeTracker>,
    worker: &Arc<ScriptedWorker>,
    dirs: &Dirs,
    deadline: Duration,
) -> WorkerRunner<FakeTracker, ScriptedWorker> {
    WorkerRunner::new(
        Arc::clone(tracker),
        Arc::clone(worker),
        dirs.locks(),
        dirs.repo(),
        dirs.log_dir(),
        deadline,
    )
}

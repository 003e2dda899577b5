//! Orchestrator: fills a bounded pool of worker invocations from the
//! tracker's ready list and reconciles them as they settle.
//!
//! One control loop owns all run state. Each round it lists ready items
//! (minus anything that failed earlier in this run), claims and spawns
//! until the pool is full, then sleeps until at least one invocation
//! settles. Failed items are reset to ready and skipped for the rest of the
//! run; the next run retries them. Every lock in the registry is released
//! when the run ends, however it ends.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::journal::RunLedger;
use crate::locks::LockRegistry;
use crate::model::{AgentIdentity, ItemId, OutcomeStatus, WorkerOutcome};
use crate::telemetry::metrics;
use crate::tracker::Tracker;
use crate::worker::Worker;

use super::runner::{WorkerRunner, truncate};

const SUMMARY_PREVIEW_CHARS: usize = 50;

/// Configuration for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrent invocations.
    pub max_agents: usize,
    /// Wall-clock deadline per invocation.
    pub deadline: Duration,
    /// Repository the workers operate on.
    pub repo_path: PathBuf,
    /// Root for session logs and run ledgers.
    pub log_dir: PathBuf,
}

/// Asks a running orchestrator to stop claiming and drain.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.notify_one();
    }
}

/// What a finished run reports back.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Every outcome, in settlement order.
    pub outcomes: Vec<WorkerOutcome>,
    pub ledger_path: Option<PathBuf>,
}

impl RunReport {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success()).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    fn log_summary(&self) {
        let (ok, total) = (self.success_count(), self.total());
        if ok == total && total > 0 {
            info!(succeeded = ok, total, "completed {ok}/{total} items");
        } else if ok > 0 {
            warn!(succeeded = ok, total, "completed {ok}/{total} items");
        } else {
            error!(succeeded = ok, total, "completed {ok}/{total} items");
        }
    }
}

struct ActiveInvocation {
    agent_id: AgentIdentity,
    started: Instant,
}

/// Run-scoped state. Mutated only by the control loop and discarded with
/// the run.
struct RunState {
    active: HashMap<ItemId, ActiveInvocation>,
    task_items: HashMap<task::Id, ItemId>,
    failed: HashSet<ItemId>,
    ledger: Vec<WorkerOutcome>,
}

impl RunState {
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            task_items: HashMap::new(),
            failed: HashSet::new(),
            ledger: Vec::new(),
        }
    }
}

enum Wake {
    Shutdown,
    Settled(Option<std::result::Result<(task::Id, WorkerOutcome), JoinError>>),
}

pub struct Orchestrator<T: Tracker, W: Worker> {
    tracker: Arc<T>,
    runner: Arc<WorkerRunner<T, W>>,
    locks: LockRegistry,
    config: OrchestratorConfig,
    shutdown: Arc<Notify>,
    state: RunState,
}

impl<T: Tracker, W: Worker> Orchestrator<T, W> {
    pub fn new(
        tracker: Arc<T>,
        worker: Arc<W>,
        locks: LockRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        let runner = Arc::new(WorkerRunner::new(
            Arc::clone(&tracker),
            worker,
            locks.clone(),
            config.repo_path.clone(),
            config.log_dir.clone(),
            config.deadline,
        ));
        Self {
            tracker,
            runner,
            locks,
            config,
            shutdown: Arc::new(Notify::new()),
            state: RunState::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Items that failed during the current (or last) run.
    pub fn failed_items(&self) -> &HashSet<ItemId> {
        &self.state.failed
    }

    /// Number of invocations in flight.
    pub fn active_count(&self) -> usize {
        self.state.active.len()
    }

    /// Run until no ready work remains and the pool is empty.
    ///
    /// Dropping the returned future aborts every invocation still in flight
    /// and clears the lock registry.
    pub async fn run(&mut self) -> Result<RunReport> {
        self.state = RunState::new();
        let run_id = Uuid::new_v4();

        let mut in_flight = InFlight {
            tasks: JoinSet::new(),
            locks: self.locks.clone(),
        };
        self.locks.ensure_dir()?;
        tokio::fs::create_dir_all(&self.config.log_dir).await?;

        let mut ledger = match RunLedger::open(&self.config.log_dir, run_id).await {
            Ok(ledger) => Some(ledger),
            Err(e) => {
                warn!(error = %e, "cannot open run ledger");
                None
            }
        };
        let ledger_path = ledger.as_ref().map(|l| l.path().to_path_buf());

        info!(
            %run_id,
            repo = %self.config.repo_path.display(),
            max_agents = self.config.max_agents,
            timeout_secs = self.config.deadline.as_secs(),
            "orchestrator started"
        );

        self.drive(&mut in_flight.tasks, &mut ledger).await;
        drop(in_flight);

        let report = RunReport {
            run_id,
            outcomes: std::mem::take(&mut self.state.ledger),
            ledger_path,
        };
        report.log_summary();
        Ok(report)
    }

    /// [`run`](Self::run), stopped from outside in two stages. The first time
    /// `interrupt` resolves the run drains; the second time it is abandoned,
    /// which aborts the agents still running and clears the lock registry.
    /// Returns `None` when abandoned.
    pub async fn run_interruptible<F, Fut>(&mut self, mut interrupt: F) -> Result<Option<RunReport>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let shutdown = self.shutdown_handle();
        let interrupted = async move {
            interrupt().await;
            info!("interrupted, draining in-flight agents; interrupt again to abort");
            shutdown.shutdown();
            interrupt().await;
        };

        tokio::select! {
            report = self.run() => report.map(Some),
            () = interrupted => {
                warn!("interrupted again, abandoning the run");
                Ok(None)
            }
        }
    }

    async fn drive(
        &mut self,
        tasks: &mut JoinSet<WorkerOutcome>,
        ledger: &mut Option<RunLedger>,
    ) {
        let mut draining = false;

        loop {
            let mut ready = if draining {
                VecDeque::new()
            } else {
                self.ready_items()
            };
            let had_ready = !ready.is_empty();
            if had_ready {
                debug!(ready = ?ready, "ready items");
            }

            while self.state.active.len() < self.config.max_agents {
                let Some(id) = ready.pop_front() else { break };
                if self.state.active.contains_key(&id) || self.state.failed.contains(&id) {
                    continue;
                }
                self.spawn(tasks, id);
            }

            if self.state.active.is_empty() {
                if !had_ready {
                    info!("no more items to process");
                    break;
                }
                // Every ready item failed to claim; list again without them.
                continue;
            }

            debug!(active = self.state.active.len(), "waiting for agents");
            let woke = tokio::select! {
                _ = self.shutdown.notified(), if !draining => Wake::Shutdown,
                joined = tasks.join_next_with_id() => Wake::Settled(joined),
            };

            match woke {
                Wake::Shutdown => {
                    info!(
                        active = self.state.active.len(),
                        "shutdown requested, draining in-flight agents"
                    );
                    draining = true;
                }
                Wake::Settled(Some(joined)) => {
                    self.reconcile(joined, ledger).await;
                    while let Some(joined) = tasks.try_join_next_with_id() {
                        self.reconcile(joined, ledger).await;
                    }
                }
                Wake::Settled(None) => {
                    // Pool and task set disagree; nothing is actually running.
                    warn!(
                        active = self.state.active.len(),
                        "no tasks left for active items"
                    );
                    self.state.active.clear();
                    self.state.task_items.clear();
                }
            }
        }
    }

    /// Ready ids from the tracker, minus failed and in-flight ones. An
    /// unavailable tracker yields nothing this round.
    fn ready_items(&self) -> VecDeque<ItemId> {
        match self.tracker.list_ready() {
            Ok(items) => items
                .into_iter()
                .filter(|id| {
                    !self.state.failed.contains(id) && !self.state.active.contains_key(id)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "listing ready items failed; treating as no ready work");
                metrics::tracker_unavailable().add(1, &[]);
                VecDeque::new()
            }
        }
    }

    fn spawn(&mut self, tasks: &mut JoinSet<WorkerOutcome>, id: ItemId) {
        if !self.tracker.claim(&id) {
            warn!(item = %id, "failed to claim");
            metrics::claim_failures().add(1, &[]);
            self.state.failed.insert(id);
            return;
        }

        let session_id = Uuid::new_v4();
        let agent_id = AgentIdentity::mint(&id, &session_id);
        let runner = Arc::clone(&self.runner);
        let (item, agent) = (id.clone(), agent_id.clone());
        let handle = tasks.spawn(async move { runner.run(item, agent, session_id).await });

        self.state.task_items.insert(handle.id(), id.clone());
        info!(item = %id, agent = %agent_id, "agent started");
        metrics::invocations_started().add(1, &[]);
        self.state.active.insert(
            id,
            ActiveInvocation {
                agent_id,
                started: Instant::now(),
            },
        );
    }

    async fn reconcile(
        &mut self,
        joined: std::result::Result<(task::Id, WorkerOutcome), JoinError>,
        ledger: &mut Option<RunLedger>,
    ) {
        let outcome = match joined {
            Ok((task_id, outcome)) => {
                self.state.task_items.remove(&task_id);
                outcome
            }
            Err(e) => {
                let Some(item_id) = self.state.task_items.remove(&e.id()) else {
                    warn!(error = %e, "unknown agent task ended");
                    return;
                };
                let (agent_id, duration) = match self.state.active.get(&item_id) {
                    Some(active) => (active.agent_id.clone(), active.started.elapsed()),
                    None => (AgentIdentity("unknown".to_string()), Duration::ZERO),
                };
                WorkerOutcome {
                    item_id,
                    agent_id,
                    status: OutcomeStatus::Failed,
                    summary: e.to_string(),
                    duration,
                }
            }
        };

        self.state.active.remove(&outcome.item_id);

        let secs = outcome.duration.as_secs();
        if outcome.success() {
            info!(
                item = %outcome.item_id,
                duration_secs = secs,
                summary = %truncate(&outcome.summary, SUMMARY_PREVIEW_CHARS),
                "item completed"
            );
        } else {
            warn!(
                item = %outcome.item_id,
                status = %outcome.status,
                duration_secs = secs,
                summary = %outcome.summary,
                "item failed"
            );
            self.state.failed.insert(outcome.item_id.clone());
            if let Err(e) = self.tracker.reset_to_ready(&outcome.item_id) {
                warn!(item = %outcome.item_id, error = %e, "failed to reset item to ready");
            }
        }

        if let Some(file) = ledger.as_mut() {
            if let Err(e) = file.append(&outcome).await {
                warn!(error = %e, "cannot append to run ledger");
            }
        }
        self.state.ledger.push(outcome);
    }
}

/// Invocation tasks of one run. However the run ends (completion, error,
/// panic, or the run future being dropped), anything still in flight is
/// aborted and then the whole lock registry is cleared.
struct InFlight {
    tasks: JoinSet<WorkerOutcome>,
    locks: LockRegistry,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            warn!(tasks = self.tasks.len(), "aborting unfinished agents");
            self.tasks.abort_all();
        }
        let released = self.locks.release_all();
        info!(released, "released all remaining locks");
    }
}

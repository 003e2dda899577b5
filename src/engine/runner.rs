//! Worker runner: drives one invocation from spawn to reconciliation.
//!
//! Spawned → Running → {Succeeded, TimedOut, Failed} → Reconciled.
//!
//! The worker runs under a hard wall-clock deadline while its events are
//! forwarded live to tracing and the session log. Success is decided by the
//! tracker, not by the worker: an invocation that ends cleanly still fails
//! unless the item reads back as closed. Whatever happens, locks held under
//! the invocation's agent identity are released exactly once before the
//! outcome is returned.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::event::WorkerEvent;
use crate::journal::SessionLog;
use crate::locks::LockRegistry;
use crate::model::{AgentIdentity, ItemId, OutcomeStatus, WorkerOutcome};
use crate::telemetry::invocation::{record_transition, start_invocation_span};
use crate::telemetry::metrics;
use crate::tracker::Tracker;
use crate::worker::{InvocationContext, Worker};

/// Events buffered between the worker and the sink.
const EVENT_BUFFER: usize = 64;
const TEXT_PREVIEW_CHARS: usize = 100;
const TOOL_INPUT_PREVIEW_CHARS: usize = 50;

pub struct WorkerRunner<T, W> {
    tracker: Arc<T>,
    worker: Arc<W>,
    locks: LockRegistry,
    repo_path: PathBuf,
    log_dir: PathBuf,
    deadline: Duration,
}

impl<T: Tracker, W: Worker> WorkerRunner<T, W> {
    pub fn new(
        tracker: Arc<T>,
        worker: Arc<W>,
        locks: LockRegistry,
        repo_path: PathBuf,
        log_dir: PathBuf,
        deadline: Duration,
    ) -> Self {
        Self {
            tracker,
            worker,
            locks,
            repo_path,
            log_dir,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one invocation for `item_id` under `agent_id`. Never fails: every
    /// error becomes part of the returned outcome.
    pub async fn run(
        &self,
        item_id: ItemId,
        agent_id: AgentIdentity,
        session_id: Uuid,
    ) -> WorkerOutcome {
        let start = Instant::now();
        let release = self.locks.release_guard(agent_id.clone());
        let span = start_invocation_span(&item_id, &agent_id, &session_id);

        let ctx = InvocationContext {
            item_id: item_id.clone(),
            agent_id: agent_id.clone(),
            session_id,
            repo_path: self.repo_path.clone(),
            lock_dir: self.locks.dir().to_path_buf(),
            deadline: self.deadline,
        };

        record_transition(&span, "spawned", "running");
        let (status, summary) = self.execute(ctx).instrument(span.clone()).await;
        span.record("invocation.status", tracing::field::display(status));
        record_transition(&span, "running", &status.to_string());

        let released = release.release();
        if released > 0 {
            span.in_scope(|| info!(released, "cleaned locks left by agent"));
        }
        record_transition(&span, &status.to_string(), "reconciled");

        let duration = start.elapsed();
        metrics::invocation_outcomes()
            .add(1, &[KeyValue::new("status", status.to_string())]);
        metrics::invocation_duration_secs().record(duration.as_secs_f64(), &[]);

        WorkerOutcome {
            item_id,
            agent_id,
            status,
            summary,
            duration,
        }
    }

    async fn execute(&self, ctx: InvocationContext) -> (OutcomeStatus, String) {
        let mut sink = EventSink::open(&self.log_dir, &ctx, self.worker.prompt(&ctx)).await;
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let item_id = ctx.item_id.clone();

        let worker_run = self.worker.run(ctx, tx);
        let driven = tokio::time::timeout(self.deadline, async {
            let (result, ()) = tokio::join!(worker_run, sink.consume(&mut rx));
            result
        })
        .await;

        let verdict = match driven {
            Err(_) => {
                warn!(deadline_secs = self.deadline.as_secs(), "worker hit its deadline");
                (
                    OutcomeStatus::TimedOut,
                    Error::InvocationTimeout(self.deadline).to_string(),
                )
            }
            Ok(Err(e)) => {
                warn!(error = %e, "worker failed");
                (OutcomeStatus::Failed, e.to_string())
            }
            Ok(Ok(())) => {
                if self.poll_closed(&item_id).await {
                    (
                        OutcomeStatus::Succeeded,
                        sink.final_result.take().unwrap_or_default(),
                    )
                } else {
                    (OutcomeStatus::Failed, Error::NotClosed(item_id).to_string())
                }
            }
        };

        sink.close().await;
        verdict
    }

    /// Single post-hoc status poll, off the async worker threads.
    async fn poll_closed(&self, item_id: &ItemId) -> bool {
        let tracker = Arc::clone(&self.tracker);
        let id = item_id.clone();
        match tokio::task::spawn_blocking(move || tracker.check_closed(&id)).await {
            Ok(closed) => closed,
            Err(e) => {
                warn!(error = %e, "status check panicked");
                false
            }
        }
    }
}

/// Receives worker events and forwards them to tracing and the session log.
struct EventSink {
    journal: Option<SessionLog>,
    final_result: Option<String>,
}

impl EventSink {
    /// A session log that cannot be created is reported and skipped; it never
    /// fails the invocation.
    async fn open(
        log_dir: &std::path::Path,
        ctx: &InvocationContext,
        prompt: Option<String>,
    ) -> Self {
        let journal = match SessionLog::create(
            log_dir,
            ctx.session_id,
            ctx.agent_id.clone(),
            ctx.item_id.clone(),
            &ctx.repo_path,
        )
        .await
        {
            Ok(mut journal) => {
                if let Some(prompt) = prompt {
                    if let Err(e) = journal.log_prompt(&prompt).await {
                        warn!(error = %e, "cannot write prompt to session log");
                    }
                }
                debug!(path = %journal.path().display(), "session log opened");
                Some(journal)
            }
            Err(e) => {
                warn!(error = %e, "cannot create session log");
                None
            }
        };

        Self {
            journal,
            final_result: None,
        }
    }

    async fn consume(&mut self, rx: &mut mpsc::Receiver<WorkerEvent>) {
        while let Some(event) = rx.recv().await {
            self.forward(event).await;
        }
    }

    async fn forward(&mut self, event: WorkerEvent) {
        metrics::worker_events().add(1, &[KeyValue::new("kind", event.kind())]);

        match &event {
            WorkerEvent::Text { text } => {
                info!(text = %truncate(text, TEXT_PREVIEW_CHARS), "agent");
            }
            WorkerEvent::ToolUse { name, input, .. } => {
                info!(
                    tool = %name,
                    input = %truncate(&input.to_string(), TOOL_INPUT_PREVIEW_CHARS),
                    "tool"
                );
            }
            WorkerEvent::ToolResult { is_error, .. } => {
                debug!(is_error, "tool result");
            }
            WorkerEvent::Result { result, is_error } => {
                debug!(is_error, "worker result");
                self.final_result = Some(result.clone());
            }
        }

        if let Some(ref mut journal) = self.journal {
            if let Err(e) = journal.log_event(&event).await {
                warn!(error = %e, "session log write failed; disabling it");
                self.journal = None;
            }
        }
    }

    async fn close(&mut self) {
        if let Some(journal) = self.journal.take() {
            if let Err(e) = journal.close().await {
                warn!(error = %e, "cannot close session log");
            }
        }
    }
}

/// First `max` chars of `s`, with "..." when cut.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

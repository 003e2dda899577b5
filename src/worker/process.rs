//! Worker backed by an external process.
//!
//! The process runs in the repository with the invocation context in its
//! environment, reads its prompt on stdin, and writes stream-json on stdout.
//! Stdout is decoded line by line and forwarded as it arrives. The child is
//! started in its own process group and killed (group included) if the
//! future is dropped before it exits, which is how deadlines terminate it.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{WorkerEvent, decode_line};

use super::{InvocationContext, Worker, WorkerProfile};

/// Stderr lines kept for the failure summary.
const STDERR_TAIL_LINES: usize = 20;
/// How long output may stay open once the worker itself has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

pub struct ProcessWorker {
    profile: WorkerProfile,
    api_key: Option<SecretString>,
}

impl ProcessWorker {
    pub fn new(profile: WorkerProfile, api_key: Option<SecretString>) -> Self {
        Self { profile, api_key }
    }

    pub fn profile(&self) -> &WorkerProfile {
        &self.profile
    }

    fn command(&self, ctx: &InvocationContext) -> Command {
        let mut cmd = Command::new(&self.profile.command);
        cmd.args(&self.profile.args)
            .current_dir(&ctx.repo_path)
            .envs(&self.profile.env)
            .env("WORKPOOL_ITEM_ID", ctx.item_id.as_str())
            .env("WORKPOOL_AGENT_ID", ctx.agent_id.as_str())
            .env("WORKPOOL_LOCK_DIR", &ctx.lock_dir)
            .env("WORKPOOL_SESSION_ID", ctx.session_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref key) = self.api_key {
            cmd.env("ANTHROPIC_API_KEY", key.expose_secret());
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl Worker for ProcessWorker {
    async fn run(&self, ctx: InvocationContext, events: mpsc::Sender<WorkerEvent>) -> Result<()> {
        let name = &self.profile.name;
        let mut child = self.command(&ctx).spawn().map_err(|e| {
            Error::InvocationError(format!(
                "failed to spawn {name} ({}): {e}",
                self.profile.command
            ))
        })?;
        let group = ProcessGroupGuard::new(child.id());

        debug!(pid = child.id(), worker = %name, "worker spawned");

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = self.profile.render_prompt(&ctx);
            // A worker that exits without reading stdin shows up in its exit status.
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(error = %e, "could not write prompt to worker stdin");
            }
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::InvocationError("failed to capture worker stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::InvocationError("failed to capture worker stderr".to_string()))?;

        let output = async { tokio::join!(forward_events(stdout, &events), stderr_tail(stderr)) };
        tokio::pin!(output);

        // Background jobs the worker left behind may keep its pipes open after
        // it exits; they get a short grace period and are then killed.
        let (status, (forwarded, stderr_tail)) = tokio::select! {
            drained = &mut output => (child.wait().await?, drained),
            status = child.wait() => {
                let status = status?;
                let drained = match tokio::time::timeout(OUTPUT_GRACE, &mut output).await {
                    Ok(drained) => drained,
                    Err(_) => {
                        debug!(worker = %name, "worker exited with its output still open");
                        group.kill();
                        output.await
                    }
                };
                (status, drained)
            }
        };
        group.disarm();
        forwarded?;

        if status.success() {
            Ok(())
        } else {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            let mut message = format!("{name} exited with status {code}");
            if !stderr_tail.is_empty() {
                message.push_str(": ");
                message.push_str(&stderr_tail);
            }
            Err(Error::InvocationError(message))
        }
    }

    fn prompt(&self, ctx: &InvocationContext) -> Option<String> {
        Some(self.profile.render_prompt(ctx))
    }
}

/// Decode stdout line by line and send every event on.
async fn forward_events(
    stdout: impl AsyncRead + Unpin,
    events: &mpsc::Sender<WorkerEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        for event in decode_line(&line) {
            // A closed receiver means nobody is listening; keep draining so
            // the child does not block on a full pipe.
            let _ = events.send(event).await;
        }
    }
    Ok(())
}

/// Last few stderr lines, joined.
async fn stderr_tail(stderr: impl AsyncRead + Unpin) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Kills the worker's whole process group on drop unless disarmed.
///
/// `kill_on_drop` only reaches the direct child; tools the worker started
/// live in the same group and go with it.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    /// SIGKILL everything still in the group.
    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

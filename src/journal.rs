//! Per-run persisted artifacts.
//!
//! A [`SessionLog`] is one append-only JSONL file per invocation, chaining
//! entries through `uuid`/`parentUuid` and flushing every line so a crash
//! loses at most the line being written. A [`RunLedger`] collects one line
//! per settled invocation for the whole run.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::Result;
use crate::event::WorkerEvent;
use crate::model::{AgentIdentity, ItemId, WorkerOutcome};

/// Directory under the log root holding session logs.
pub const SESSIONS_DIR: &str = "sessions";
/// Directory under the log root holding run ledgers.
pub const RUNS_DIR: &str = "runs";

/// JSONL transcript of one worker invocation.
pub struct SessionLog {
    file: File,
    path: PathBuf,
    session_id: Uuid,
    agent_id: AgentIdentity,
    item_id: ItemId,
    cwd: PathBuf,
    parent: Option<Uuid>,
}

impl SessionLog {
    /// Create `<log_dir>/sessions/<session_id>.jsonl`.
    pub async fn create(
        log_dir: &Path,
        session_id: Uuid,
        agent_id: AgentIdentity,
        item_id: ItemId,
        cwd: &Path,
    ) -> Result<Self> {
        let dir = log_dir.join(SESSIONS_DIR);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{session_id}.jsonl"));
        let file = File::create(&path).await?;

        Ok(Self {
            file,
            path,
            session_id,
            agent_id,
            item_id,
            cwd: cwd.to_path_buf(),
            parent: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the prompt the worker was started with.
    pub async fn log_prompt(&mut self, prompt: &str) -> Result<()> {
        self.append(
            "user",
            json!({ "content": [{ "type": "text", "text": prompt }] }),
        )
        .await
    }

    /// Record one worker event.
    pub async fn log_event(&mut self, event: &WorkerEvent) -> Result<()> {
        let entry_type = match event {
            WorkerEvent::Text { .. } | WorkerEvent::ToolUse { .. } => "assistant",
            WorkerEvent::ToolResult { .. } => "user",
            WorkerEvent::Result { .. } => "turn_end",
        };
        let message = match event {
            WorkerEvent::Result { result, is_error } => {
                json!({ "result": result, "is_error": is_error })
            }
            other => json!({ "content": [serde_json::to_value(other)?] }),
        };
        self.append(entry_type, message).await
    }

    async fn append(&mut self, entry_type: &str, message: Value) -> Result<()> {
        let uuid = Uuid::new_v4();
        let entry = json!({
            "uuid": uuid,
            "parentUuid": self.parent,
            "type": entry_type,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "sessionId": self.session_id,
            "agentId": self.agent_id,
            "itemId": self.item_id,
            "cwd": self.cwd.display().to_string(),
            "message": message,
        });

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        self.parent = Some(uuid);
        Ok(())
    }

    /// Sync the file to disk.
    pub async fn close(self) -> Result<()> {
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Append-only record of every outcome in one orchestrator run.
pub struct RunLedger {
    file: File,
    path: PathBuf,
}

impl RunLedger {
    /// Create (or append to) `<log_dir>/runs/<run_id>.jsonl`.
    pub async fn open(log_dir: &Path, run_id: Uuid) -> Result<Self> {
        let dir = log_dir.join(RUNS_DIR);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{run_id}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, outcome: &WorkerOutcome) -> Result<()> {
        let mut entry = serde_json::to_value(outcome)?;
        if let Value::Object(ref mut map) = entry {
            map.insert(
                "recorded_at".to_string(),
                json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Session logs under `log_dir`, newest first.
pub fn recent_sessions(log_dir: &Path) -> Result<Vec<(PathBuf, std::time::SystemTime)>> {
    let dir = log_dir.join(SESSIONS_DIR);
    let read = match std::fs::read_dir(&dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut sessions = Vec::new();
    for entry in read {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            let modified = entry.metadata()?.modified()?;
            sessions.push((path, modified));
        }
    }
    sessions.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(sessions)
}

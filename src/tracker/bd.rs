//! Tracker backed by the `bd` command-line tool.
//!
//! | operation | command |
//! |---|---|
//! | list ready | `bd ready --json` |
//! | claim | `bd update <id> --status in_progress` |
//! | status | `bd show <id> --json` |
//! | reset | `bd update <id> --status ready` |
//!
//! The exit code is the only success signal. Structured output that does not
//! parse is treated as empty, never as a crash.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{ItemId, ItemStatus};

use super::Tracker;

/// File the tracker keeps its state in, relative to the repository root.
pub const STATE_FILE: &str = ".beads/issues.jsonl";

#[derive(Debug, Deserialize)]
struct IssueRecord {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShowResponse {
    Many(Vec<IssueRecord>),
    One(IssueRecord),
}

/// Runs the tracker binary in the repository directory.
#[derive(Debug, Clone)]
pub struct BdTracker {
    program: String,
    repo: PathBuf,
}

impl BdTracker {
    pub fn new(program: impl Into<String>, repo: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            repo: repo.into(),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    fn exec(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!(program = %self.program, ?args, "running tracker command");
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo)
            .output()
    }

    fn set_status(&self, id: &ItemId, status: &str) -> Result<()> {
        let output = self
            .exec(&["update", id.as_str(), "--status", status])
            .map_err(|e| Error::TrackerUnavailable(format!("{}: {e}", self.program)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::TrackerUnavailable(format!(
                "{} update {id} --status {status} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Stage and commit the tracker state file. Returns whether a commit was
    /// made; nothing to commit is not an error.
    pub fn commit_state(&self, message: &str) -> Result<bool> {
        let add = Command::new("git")
            .args(["add", STATE_FILE])
            .current_dir(&self.repo)
            .output()?;
        if !add.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&add.stderr).trim(),
                "git add of tracker state failed"
            );
            return Ok(false);
        }

        let commit = Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(&self.repo)
            .output()?;
        Ok(commit.status.success())
    }
}

impl Tracker for BdTracker {
    fn list_ready(&self) -> Result<Vec<ItemId>> {
        let output = self
            .exec(&["ready", "--json"])
            .map_err(|e| Error::TrackerUnavailable(format!("{}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(Error::TrackerUnavailable(format!(
                "{} ready failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_ready(&output.stdout)
    }

    fn claim(&self, id: &ItemId) -> bool {
        match self.set_status(id, "in_progress") {
            Ok(()) => true,
            Err(e) => {
                debug!(item = %id, error = %e, "claim rejected");
                false
            }
        }
    }

    fn status(&self, id: &ItemId) -> Option<ItemStatus> {
        let output = match self.exec(&["show", id.as_str(), "--json"]) {
            Ok(output) => output,
            Err(e) => {
                warn!(item = %id, error = %e, "cannot query item status");
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        parse_status(&output.stdout)
    }

    fn reset_to_ready(&self, id: &ItemId) -> Result<()> {
        self.set_status(id, "ready")
    }
}

fn parse_ready(stdout: &[u8]) -> Result<Vec<ItemId>> {
    let records: Vec<IssueRecord> = serde_json::from_slice(stdout)
        .map_err(|e| Error::TrackerUnavailable(format!("malformed ready output: {e}")))?;
    Ok(records.into_iter().map(|r| ItemId(r.id)).collect())
}

/// `bd show` answers with either one record or a list; the first record wins.
fn parse_status(stdout: &[u8]) -> Option<ItemStatus> {
    let record = match serde_json::from_slice::<ShowResponse>(stdout).ok()? {
        ShowResponse::One(record) => record,
        ShowResponse::Many(records) => records.into_iter().next()?,
    };
    record.status.as_deref().map(ItemStatus::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_keeps_tracker_order() {
        let ids = parse_ready(br#"[{"id":"bd-3","title":"x"},{"id":"bd-1"}]"#).unwrap();
        assert_eq!(ids, vec![ItemId::from("bd-3"), ItemId::from("bd-1")]);
    }

    #[test]
    fn ready_rejects_garbage() {
        assert!(matches!(
            parse_ready(b"not json"),
            Err(Error::TrackerUnavailable(_))
        ));
        assert!(parse_ready(br#"[{"title":"no id"}]"#).is_err());
    }

    #[test]
    fn status_accepts_object_or_list() {
        assert_eq!(
            parse_status(br#"{"id":"a","status":"closed"}"#),
            Some(ItemStatus::Closed)
        );
        assert_eq!(
            parse_status(br#"[{"id":"a","status":"in_progress"}]"#),
            Some(ItemStatus::InProgress)
        );
    }

    #[test]
    fn status_is_none_when_unusable() {
        assert_eq!(parse_status(b"[]"), None);
        assert_eq!(parse_status(b"{oops"), None);
        assert_eq!(parse_status(br#"{"id":"a"}"#), None);
    }
}

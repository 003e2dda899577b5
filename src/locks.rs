//! Shared lock registry with crash recovery.
//!
//! The registry is a directory of `<key>.lock` entries. The canonical entry
//! is a regular file whose content is the holder's agent identity; a symlink
//! whose target is the holder identity is read the same way. Workers acquire
//! entries themselves. The orchestrator only force-releases them, either per
//! agent when an invocation settles or wholesale when a run ends.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::model::AgentIdentity;
use crate::telemetry::metrics;

const LOCK_EXTENSION: &str = "lock";
const STAGING_EXTENSION: &str = "staging";

/// One entry found in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Resource key (the file stem).
    pub key: String,
    /// Holder identity, `None` when unreadable.
    pub holder: Option<String>,
    pub path: PathBuf,
}

/// Handle on a lock directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LockRegistry {
    dir: PathBuf,
}

impl LockRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the registry directory if missing.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Path of the entry for `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{LOCK_EXTENSION}", sanitize_key(key)))
    }

    /// All entries currently in the registry, sorted by key. A missing
    /// directory is an empty registry.
    pub fn entries(&self) -> Result<Vec<LockEntry>> {
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != LOCK_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let holder = read_holder(&path);
            entries.push(LockEntry { key, holder, path });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Delete every entry held by `agent`. Entries held by anyone else are
    /// never touched. Returns the number removed; individual failures are
    /// logged and skipped.
    pub fn release_held_by(&self, agent: &AgentIdentity) -> usize {
        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(agent = %agent, error = %e, "cannot scan lock registry");
                return 0;
            }
        };

        let mut released = 0;
        for entry in entries {
            if entry.holder.as_deref() != Some(agent.as_str()) {
                continue;
            }
            match remove_entry(&entry.path) {
                Ok(()) => released += 1,
                Err(e) => warn!(lock = %entry.key, error = %e, "failed to release lock"),
            }
        }

        if released > 0 {
            debug!(agent = %agent, released, "released locks held by agent");
            metrics::locks_released().add(released as u64, &[]);
        }
        released
    }

    /// Delete every entry. A missing or empty registry is a no-op.
    pub fn release_all(&self) -> usize {
        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot scan lock registry");
                return 0;
            }
        };

        let mut released = 0;
        for entry in entries {
            match remove_entry(&entry.path) {
                Ok(()) => released += 1,
                Err(e) => warn!(lock = %entry.key, error = %e, "failed to release lock"),
            }
        }

        if released > 0 {
            metrics::locks_released().add(released as u64, &[]);
        }
        released
    }

    /// Take `key` for `holder`. Returns `false` when someone already holds it.
    ///
    /// The holder is written to a staging file first and hard-linked into
    /// place. Linking fails if the entry exists, so two workers racing for the
    /// same key cannot both win, and an entry is never visible without its
    /// holder.
    pub fn try_acquire(&self, key: &str, holder: &AgentIdentity) -> Result<bool> {
        self.ensure_dir()?;
        let path = self.entry_path(key);
        let staging = self.dir.join(format!(".{}.{STAGING_EXTENSION}", Uuid::new_v4()));

        let linked = write_staged(&staging, holder).and_then(|()| fs::hard_link(&staging, &path));
        if let Err(e) = remove_entry(&staging) {
            warn!(lock = key, error = %e, "cannot remove staged lock file");
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Current holder of `key`, if the entry exists and is readable.
    pub fn holder(&self, key: &str) -> Option<String> {
        read_holder(&self.entry_path(key))
    }

    /// Release `key` if `holder` owns it. Returns whether an entry was removed.
    pub fn release(&self, key: &str, holder: &AgentIdentity) -> Result<bool> {
        let path = self.entry_path(key);
        if read_holder(&path).as_deref() != Some(holder.as_str()) {
            return Ok(false);
        }
        remove_entry(&path)?;
        Ok(true)
    }

    /// Drop guard that runs [`release_held_by`](Self::release_held_by) for
    /// `agent` exactly once, on [`ReleaseGuard::release`] or on drop.
    pub fn release_guard(&self, agent: AgentIdentity) -> ReleaseGuard {
        ReleaseGuard {
            registry: self.clone(),
            agent: Some(agent),
        }
    }
}

/// Releases an agent's locks when dropped, including during unwinding.
pub struct ReleaseGuard {
    registry: LockRegistry,
    agent: Option<AgentIdentity>,
}

impl ReleaseGuard {
    /// Release now and disarm. Returns the number of entries removed.
    pub fn release(mut self) -> usize {
        match self.agent.take() {
            Some(agent) => self.registry.release_held_by(&agent),
            None => 0,
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(agent) = self.agent.take() {
            self.registry.release_held_by(&agent);
        }
    }
}

/// Holder recorded in an entry: symlink target if it is a link, trimmed file
/// content otherwise.
fn read_holder(path: &Path) -> Option<String> {
    let meta = fs::symlink_metadata(path).ok()?;
    let raw = if meta.file_type().is_symlink() {
        fs::read_link(path).ok()?.to_string_lossy().into_owned()
    } else if meta.is_file() {
        fs::read_to_string(path).ok()?
    } else {
        return None;
    };
    let holder = raw.trim();
    (!holder.is_empty()).then(|| holder.to_string())
}

fn write_staged(path: &Path, holder: &AgentIdentity) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(holder.as_str().as_bytes())?;
    file.sync_all()
}

fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Map a resource key (often a file path) to a flat file name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_flattens_paths() {
        assert_eq!(sanitize_key("src/engine/mod.rs"), "src_engine_mod.rs");
        assert_eq!(sanitize_key("plain-key_1"), "plain-key_1");
    }
}

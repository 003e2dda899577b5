//! Worker profile: how to launch the external worker.
//!
//! Profiles are TOML files:
//!
//! ```toml
//! [worker]
//! name = "claude"
//! command = "claude"
//! args = ["-p", "--output-format", "stream-json", "--verbose"]
//! prompt = "implementer.md"   # relative to this file
//!
//! [worker.env]
//! CLAUDE_CODE_MAX_OUTPUT_TOKENS = "32000"
//! ```
//!
//! The prompt is written to the worker's stdin after rendering the
//! `{issue_id}`, `{repo_path}`, `{lock_dir}` and `{agent_id}` placeholders.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::InvocationContext;

const DEFAULT_PROMPT: &str = include_str!("../../prompts/implementer.md");

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ProfileFile {
    worker: WorkerProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerProfile {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Prompt template path as written in the file.
    #[serde(default, rename = "prompt")]
    pub prompt_path: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Loaded template text.
    #[serde(skip)]
    pub prompt_template: String,
}

impl Default for WorkerProfile {
    fn default() -> Self {
        Self {
            name: "claude".to_string(),
            command: "claude".to_string(),
            args: [
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--permission-mode",
                "acceptEdits",
                "--model",
                "opus",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            prompt_path: None,
            env: BTreeMap::new(),
            prompt_template: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl WorkerProfile {
    /// Load a profile from a TOML file. A relative `prompt` path resolves
    /// against the profile's directory; without one the built-in prompt is
    /// used.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read worker profile {}: {e}", path.display()))
        })?;
        let file: ProfileFile = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("bad worker profile {}: {e}", path.display()))
        })?;
        let mut profile = file.worker;

        profile.prompt_template = match profile.prompt_path {
            Some(ref prompt) => {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                let prompt_path = base.join(prompt);
                std::fs::read_to_string(&prompt_path).map_err(|e| {
                    Error::Config(format!(
                        "cannot read prompt template {}: {e}",
                        prompt_path.display()
                    ))
                })?
            }
            None => DEFAULT_PROMPT.to_string(),
        };

        if profile.command.trim().is_empty() {
            return Err(Error::Config(format!(
                "worker profile {} has an empty command",
                path.display()
            )));
        }
        Ok(profile)
    }

    /// Fill the prompt template for one invocation.
    pub fn render_prompt(&self, ctx: &InvocationContext) -> String {
        self.prompt_template
            .replace("{issue_id}", ctx.item_id.as_str())
            .replace("{repo_path}", &ctx.repo_path.display().to_string())
            .replace("{lock_dir}", &ctx.lock_dir.display().to_string())
            .replace("{agent_id}", ctx.agent_id.as_str())
    }
}

//! Structured events streamed by a worker while it runs.
//!
//! Workers speak newline-delimited stream-json: `assistant` and `user`
//! messages carrying content blocks, then a final `result` line. Each line
//! flattens into zero or more [`WorkerEvent`]s. Text comes only from
//! `assistant` messages; `user` messages contribute their tool results.
//! Anything the orchestrator does not understand (`system` lines, unknown
//! blocks, garbage) is dropped.

use serde::{Deserialize, Serialize};

/// One event from a worker's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Text {
        text: String,
    },
    ToolUse {
        id: Option<String>,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: Option<String>,
        content: serde_json::Value,
        is_error: bool,
    },
    Result {
        result: String,
        is_error: bool,
    },
}

impl WorkerEvent {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Text { .. } => "text",
            WorkerEvent::ToolUse { .. } => "tool_use",
            WorkerEvent::ToolResult { .. } => "tool_result",
            WorkerEvent::Result { .. } => "result",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine {
    Assistant {
        message: StreamMessage,
    },
    User {
        message: StreamMessage,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Content,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Content {
    Blocks(Vec<Block>),
    Plain(String),
}

impl Default for Content {
    fn default() -> Self {
        Content::Blocks(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Decode one stream-json line. Blank, unknown, or malformed lines yield
/// no events.
pub fn decode_line(line: &str) -> Vec<WorkerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let parsed: StreamLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "skipping undecodable worker line");
            return Vec::new();
        }
    };

    match parsed {
        StreamLine::Assistant { message } => match message.content {
            Content::Blocks(blocks) => blocks.into_iter().filter_map(Block::into_event).collect(),
            Content::Plain(text) if !text.is_empty() => vec![WorkerEvent::Text { text }],
            Content::Plain(_) => Vec::new(),
        },
        // User turns echo input back; only tool results in them are worker
        // output.
        StreamLine::User { message } => match message.content {
            Content::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(Block::into_event)
                .filter(|e| matches!(e, WorkerEvent::ToolResult { .. }))
                .collect(),
            Content::Plain(_) => Vec::new(),
        },
        StreamLine::Result { result, is_error } => vec![WorkerEvent::Result {
            result: result.unwrap_or_default(),
            is_error,
        }],
        StreamLine::Other => Vec::new(),
    }
}

impl Block {
    fn into_event(self) -> Option<WorkerEvent> {
        match self {
            Block::Text { text } => Some(WorkerEvent::Text { text }),
            Block::ToolUse { id, name, input } => Some(WorkerEvent::ToolUse { id, name, input }),
            Block::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(WorkerEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            }),
            Block::Other => None,
        }
    }
}

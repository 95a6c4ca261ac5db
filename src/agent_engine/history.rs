use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;
use crate::llm::types::{ChatMessage, FunctionCall, ToolCall};
use crate::tools::types::{ToolCallRequest, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    System {
        text: String,
    },
    Task {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call: Option<ToolCallRequest>,
    },
    ToolResult {
        /// Absent for results the runtime injects without a matching call.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        tool: String,
        result: ToolResult,
        /// JPEG screenshot forwarded to the model; not persisted.
        #[serde(skip)]
        image_base64: Option<String>,
    },
    /// Runtime notice for the model, e.g. ignored tool calls.
    Notice {
        text: String,
    },
}

/// Ordered, append-only record of one task run.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render for an OpenAI-style chat API.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry {
                TranscriptEntry::System { text } => out.push(ChatMessage::system(text.clone())),
                TranscriptEntry::Task { text } => out.push(ChatMessage::user(format!("Task: {text}"))),
                TranscriptEntry::Assistant { text, tool_call } => {
                    let calls = tool_call.as_ref().map(|c| {
                        vec![ToolCall {
                            id: c.id.clone(),
                            call_type: "function".into(),
                            function: FunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.to_string(),
                            },
                        }]
                    });
                    out.push(ChatMessage::assistant(text.clone(), calls));
                }
                TranscriptEntry::ToolResult { call_id, tool, result, image_base64 } => {
                    let text = result.render();
                    match call_id {
                        Some(id) => out.push(ChatMessage::tool(id.clone(), text)),
                        None => out.push(ChatMessage::user(format!("[{tool}] {text}"))),
                    }
                    // Tool messages cannot carry images, so screenshots follow as a user turn.
                    if let Some(img) = image_base64 {
                        out.push(ChatMessage::user_with_image(
                            format!("Screenshot returned by {tool}:"),
                            img,
                        ));
                    }
                }
                TranscriptEntry::Notice { text } => {
                    out.push(ChatMessage::user(format!("[runtime] {text}")))
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub run_id: String,
    #[serde(flatten)]
    pub entry: TranscriptEntry,
}

/// JSONL log of one run, one line per transcript entry.
pub struct SessionHistory {
    pub run_id: String,
    file_path: PathBuf,
}

impl SessionHistory {
    pub fn in_dir(dir: &Path, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            file_path: dir.join(format!("session_{run_id}.jsonl")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one entry to the JSONL file.
    pub fn append(&self, entry: &TranscriptEntry) -> PilotResult<()> {
        let line = serde_json::to_string(&HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            run_id: self.run_id.clone(),
            entry: entry.clone(),
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::trace!(path = %self.file_path.display(), "history entry flushed");
        Ok(())
    }
}

/// Platform data dir (`~/.local/share/deskpilot/sessions` on Linux,
/// `%LOCALAPPDATA%\deskpilot\sessions` on Windows), falling back to the
/// current working directory.
pub fn default_history_dir() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("deskpilot").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

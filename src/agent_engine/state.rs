use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_engine::history::Transcript;
use crate::config::AgentConfig;
use crate::tools::types::{ToolResult, ToolStatus};

/// Terminal status of a task run. A run reports exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    IterationBudget,
    Cancelled,
}

/// Why a run ended, alongside its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Answer { text: String },
    Failure { reason: String },
    Aborted { reason: AbortReason, iterations: u32 },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Answer { .. } => TaskStatus::Succeeded,
            TaskOutcome::Failure { .. } => TaskStatus::Failed,
            TaskOutcome::Aborted { .. } => TaskStatus::Aborted,
        }
    }
}

/// Budgets for one run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_consecutive_backend_failures: u32,
    pub reasoning_timeout: Duration,
    pub tool_timeout: Duration,
    pub attach_screenshots: bool,
}

impl From<&AgentConfig> for LoopConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            max_consecutive_backend_failures: cfg.max_consecutive_backend_failures,
            reasoning_timeout: Duration::from_secs(cfg.reasoning_timeout_secs),
            tool_timeout: Duration::from_secs(cfg.tool_timeout_secs),
            attach_screenshots: cfg.attach_screenshots,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// Final record handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub run_id: String,
    pub task: String,
    pub status: TaskStatus,
    pub outcome: TaskOutcome,
    pub iterations: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip)]
    pub transcript: Transcript,
}

impl TaskReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        match &self.outcome {
            TaskOutcome::Answer { text } => text.clone(),
            TaskOutcome::Failure { reason } => format!("failed: {reason}"),
            TaskOutcome::Aborted { reason: AbortReason::IterationBudget, iterations } => {
                format!("aborted: iteration budget of {iterations} exhausted")
            }
            TaskOutcome::Aborted { reason: AbortReason::Cancelled, iterations } => {
                format!("aborted: cancelled after {iterations} iterations")
            }
        }
    }
}

/// Progress notifications published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted {
        run_id: String,
        task: String,
    },
    IterationStarted {
        run_id: String,
        iteration: u32,
    },
    ToolCalled {
        run_id: String,
        tool: String,
        arguments: serde_json::Value,
    },
    ToolFinished {
        run_id: String,
        tool: String,
        status: ToolStatus,
        message: String,
    },
    BackendFailed {
        run_id: String,
        consecutive: u32,
        error: String,
    },
    RunFinished {
        run_id: String,
        status: TaskStatus,
        summary: String,
    },
}

impl AgentEvent {
    pub fn tool_finished(run_id: &str, tool: &str, result: &ToolResult) -> Self {
        AgentEvent::ToolFinished {
            run_id: run_id.to_string(),
            tool: tool.to_string(),
            status: result.status,
            message: result.message.clone(),
        }
    }
}

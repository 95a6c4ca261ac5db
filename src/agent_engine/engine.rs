use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::EventBus;
use crate::agent_engine::history::{SessionHistory, Transcript, TranscriptEntry};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{AgentEvent, LoopConfig, TaskOutcome, TaskReport};
use crate::errors::PilotError;
use crate::llm::reasoning::{ReasoningBackend, ReasoningStep};
use crate::tools::gateway::ProtocolGateway;
use crate::tools::types::ToolResult;

/// Pseudo tool name under which backend failures enter the transcript.
pub const REASONING_BACKEND: &str = "reasoning_backend";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are DeskPilot, an agent that operates a desktop computer through tools.

Rules:
- Look before acting: call `detect_elements` to find targets and click the centre of their box.
- Call `focus_window` before `type_text`. Typing fails without a focused window.
- `inspect_ui_tree` lists the focused window's controls when detection misses them.
- Issue one tool call per reply and wait for its result.
- A result starting with ERROR means the action did not happen; adjust and try again.
- Screen contents change after actions; detect again instead of reusing old coordinates.
- When the task is complete, reply with a short summary and no tool call.
- If the task cannot be done, reply with the reason and no tool call.";

/// Drives one task at a time: reason, act through the gateway, observe.
pub struct AgentEngine {
    backend: Arc<dyn ReasoningBackend>,
    gateway: Arc<ProtocolGateway>,
    config: LoopConfig,
    system_prompt: String,
    events: EventBus,
    history_dir: Option<PathBuf>,
}

/// Mutable state of a run in progress.
struct TaskRun {
    run_id: String,
    transcript: Transcript,
    history: Option<SessionHistory>,
}

impl TaskRun {
    fn record(&mut self, entry: TranscriptEntry) {
        if let Some(history) = &self.history {
            if let Err(e) = history.append(&entry) {
                tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist history entry");
            }
        }
        self.transcript.push(entry);
    }
}

impl AgentEngine {
    pub fn new(backend: Arc<dyn ReasoningBackend>, gateway: Arc<ProtocolGateway>, config: LoopConfig) -> Self {
        Self {
            backend,
            gateway,
            config,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            events: EventBus::default(),
            history_dir: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Persist each run as `session_<run_id>.jsonl` under `dir`.
    pub fn with_history_dir(mut self, dir: PathBuf) -> Self {
        self.history_dir = Some(dir);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run `task` to a terminal status. Never panics on tool or backend
    /// failures; they end up in the report.
    pub async fn run_task(&self, task: &str, cancel: CancellationToken) -> TaskReport {
        let started_at = chrono::Utc::now();
        let mut run = TaskRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            transcript: Transcript::default(),
            history: None,
        };

        // Held for the whole run, across every engine sharing the gateway.
        let Some(_lease) = self.gateway.try_lease() else {
            tracing::warn!(run_id = %run.run_id, "desktop busy; rejecting task");
            let outcome = TaskOutcome::Failure {
                reason: "another task is already driving the desktop".into(),
            };
            return self.finish(run, task, outcome, 0, started_at);
        };

        run.history = self
            .history_dir
            .as_ref()
            .map(|dir| SessionHistory::in_dir(dir, &run.run_id));

        tracing::info!(run_id = %run.run_id, task = %task, "task run started");
        self.events.publish(AgentEvent::RunStarted {
            run_id: run.run_id.clone(),
            task: task.to_string(),
        });
        run.record(TranscriptEntry::System { text: self.system_prompt.clone() });
        run.record(TranscriptEntry::Task { text: task.to_string() });

        if let Err(e) = self.gateway.begin_session().await {
            tracing::warn!(run_id = %run.run_id, error = %e, "service session reset failed");
            run.record(TranscriptEntry::Notice { text: e.to_string() });
        }

        let tools = self.gateway.tool_defs();
        let mut ctl = LoopController::new(&self.config, cancel);
        let outcome = loop {
            let iteration = match ctl.next_iteration() {
                Ok(i) => i,
                Err(reason) => {
                    break TaskOutcome::Aborted { reason, iterations: ctl.iterations() };
                }
            };
            tracing::debug!(run_id = %run.run_id, iteration, "iteration started");
            self.events.publish(AgentEvent::IterationStarted {
                run_id: run.run_id.clone(),
                iteration,
            });

            let attempt = tokio::time::timeout(
                self.config.reasoning_timeout,
                self.backend.complete(&run.transcript, &tools),
            )
            .await
            .unwrap_or_else(|_| Err(PilotError::timeout("reasoning step", self.config.reasoning_timeout)));

            let step = match attempt {
                Ok(step) => {
                    ctl.record_backend_success();
                    step
                }
                Err(e) => {
                    let exhausted = ctl.record_backend_failure();
                    let consecutive = ctl.consecutive_failures();
                    tracing::warn!(run_id = %run.run_id, consecutive, error = %e, "reasoning step failed");
                    self.events.publish(AgentEvent::BackendFailed {
                        run_id: run.run_id.clone(),
                        consecutive,
                        error: e.to_string(),
                    });
                    run.record(TranscriptEntry::ToolResult {
                        call_id: None,
                        tool: REASONING_BACKEND.to_string(),
                        result: ToolResult::error(format!("Reasoning step failed: {e}")),
                        image_base64: None,
                    });
                    if exhausted {
                        break TaskOutcome::Failure {
                            reason: format!("reasoning backend failed {consecutive} times in a row: {e}"),
                        };
                    }
                    continue;
                }
            };

            match step {
                ReasoningStep::FinalAnswer { text } => {
                    run.record(TranscriptEntry::Assistant { text: text.clone(), tool_call: None });
                    break TaskOutcome::Answer { text };
                }
                ReasoningStep::ToolCall { thought, call, ignored_calls } => {
                    run.record(TranscriptEntry::Assistant {
                        text: thought,
                        tool_call: Some(call.clone()),
                    });
                    self.events.publish(AgentEvent::ToolCalled {
                        run_id: run.run_id.clone(),
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });

                    let result = self.gateway.dispatch_with_timeout(&call, self.config.tool_timeout).await;
                    let image = if self.config.attach_screenshots {
                        result.image_base64().map(str::to_string)
                    } else {
                        None
                    };
                    let result = result.without_image();
                    self.events.publish(AgentEvent::tool_finished(&run.run_id, &call.name, &result));
                    run.record(TranscriptEntry::ToolResult {
                        call_id: Some(call.id),
                        tool: call.name,
                        result,
                        image_base64: image,
                    });

                    if ignored_calls > 0 {
                        run.record(TranscriptEntry::Notice {
                            text: format!(
                                "Only the first tool call of a reply is executed; {ignored_calls} more were ignored."
                            ),
                        });
                    }
                }
            }
        };

        let iterations = ctl.iterations();
        self.finish(run, task, outcome, iterations, started_at)
    }

    fn finish(
        &self,
        run: TaskRun,
        task: &str,
        outcome: TaskOutcome,
        iterations: u32,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> TaskReport {
        let report = TaskReport {
            run_id: run.run_id,
            task: task.to_string(),
            status: outcome.status(),
            outcome,
            iterations,
            started_at,
            finished_at: chrono::Utc::now(),
            transcript: run.transcript,
        };
        tracing::info!(
            run_id = %report.run_id,
            status = ?report.status,
            iterations,
            "task run finished"
        );
        self.events.publish(AgentEvent::RunFinished {
            run_id: report.run_id.clone(),
            status: report.status,
            summary: report.summary(),
        });
        report
    }
}

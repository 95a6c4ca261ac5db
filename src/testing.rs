//! In-memory fakes for the screen, detectors, input backend and reasoning
//! backend.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::history::Transcript;
use crate::errors::{PilotError, PilotResult};
use crate::executor::input::{InputBackend, KeyName, WindowInfo};
use crate::llm::reasoning::{ReasoningBackend, ReasoningStep};
use crate::llm::types::ToolDef;
use crate::perception::traits::{Detector, ScreenSource, UiTreeSource};
use crate::perception::types::{RawDetection, ScreenFrame, SourceModel, UiNode};
use crate::tools::gateway::ToolExecutor;
use crate::tools::types::{ToolCallRequest, ToolInvocation, ToolResult};

pub struct FixedScreen {
    width: u32,
    height: u32,
}

impl FixedScreen {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ScreenSource for FixedScreen {
    fn capture(&self) -> PilotResult<ScreenFrame> {
        Ok(ScreenFrame::new(image::RgbaImage::from_pixel(
            self.width,
            self.height,
            image::Rgba([40, 40, 40, 255]),
        )))
    }

    fn resolution(&self) -> PilotResult<(u32, u32)> {
        Ok((self.width, self.height))
    }
}

/// A Notepad window: title bar and editor, with a scroll bar inside the editor.
pub struct FixedUiTree;

impl UiTreeSource for FixedUiTree {
    fn focused_window_tree(&self, max_depth: u32) -> PilotResult<UiNode> {
        let node = |kind: &str, name: &str, rect, children| UiNode {
            control_type: kind.into(),
            name: name.into(),
            rect,
            children,
        };
        let scroll = node("ScrollBar", "Vertical", [780, 60, 800, 580], vec![]);
        let editor_children = if max_depth >= 2 { vec![scroll] } else { vec![] };
        let children = if max_depth >= 1 {
            vec![
                node("TitleBar", "", [0, 0, 800, 30], vec![]),
                node("Edit", "Text Editor", [0, 60, 800, 580], editor_children),
            ]
        } else {
            vec![]
        };
        Ok(node("Window", "Untitled - Notepad", [0, 0, 800, 600], children))
    }
}

/// Omniparser stand-in that fails its first `failures` calls.
pub struct ScriptedDetector {
    detections: Vec<RawDetection>,
    failures: usize,
    message: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn always(detections: Vec<RawDetection>) -> Self {
        Self::flaky(0, detections)
    }

    pub fn failing(message: &str) -> Self {
        Self {
            message: message.into(),
            ..Self::flaky(usize::MAX, vec![])
        }
    }

    pub fn flaky(failures: usize, detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            failures,
            message: "detector unavailable".into(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn model(&self) -> SourceModel {
        SourceModel::Omniparser
    }

    async fn detect(&self, _frame: &ScreenFrame) -> PilotResult<Vec<RawDetection>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(PilotError::Detection(self.message.clone()));
        }
        Ok(self.detections.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Move(i32, i32),
    Click(crate::tools::types::MouseButton, bool),
    Button(crate::tools::types::MouseButton, bool),
    Type(String),
    Keys(Vec<KeyName>),
    Scroll(i32),
    Activate(u64),
}

pub fn window(id: u64, title: &str, minimized: bool) -> WindowInfo {
    WindowInfo {
        id,
        title: title.into(),
        app_name: String::new(),
        minimized,
        x: 0,
        y: 0,
        width: 640,
        height: 480,
    }
}

/// Input backend that records instead of injecting.
pub struct RecordingInput {
    size: (u32, u32),
    windows: Mutex<Vec<WindowInfo>>,
    events: Mutex<Vec<InputEvent>>,
    foreground: Mutex<Option<u64>>,
    /// Activation requests are recorded but leave the foreground unchanged.
    pinned: AtomicBool,
    clipboard: Mutex<String>,
}

impl RecordingInput {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            windows: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            foreground: Mutex::new(None),
            pinned: AtomicBool::new(false),
            clipboard: Mutex::new(String::new()),
        }
    }

    pub fn with_windows(self, windows: Vec<WindowInfo>) -> Self {
        self.set_windows(windows);
        self
    }

    pub fn set_windows(&self, windows: Vec<WindowInfo>) {
        *self.windows.lock().unwrap() = windows;
    }

    /// Another program took the foreground.
    pub fn set_foreground(&self, id: Option<u64>) {
        *self.foreground.lock().unwrap() = id;
    }

    pub fn pin_foreground(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: InputEvent) -> PilotResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl InputBackend for RecordingInput {
    fn screen_size(&self) -> PilotResult<(u32, u32)> {
        Ok(self.size)
    }

    fn move_pointer(&self, x: i32, y: i32) -> PilotResult<()> {
        self.push(InputEvent::Move(x, y))
    }

    fn click(&self, button: crate::tools::types::MouseButton, double: bool) -> PilotResult<()> {
        self.push(InputEvent::Click(button, double))
    }

    fn mouse_button(&self, button: crate::tools::types::MouseButton, pressed: bool) -> PilotResult<()> {
        self.push(InputEvent::Button(button, pressed))
    }

    fn type_text(&self, text: &str) -> PilotResult<()> {
        self.push(InputEvent::Type(text.into()))
    }

    fn press_keys(&self, keys: &[KeyName]) -> PilotResult<()> {
        self.push(InputEvent::Keys(keys.to_vec()))
    }

    fn scroll(&self, amount: i32) -> PilotResult<()> {
        self.push(InputEvent::Scroll(amount))
    }

    fn list_windows(&self) -> PilotResult<Vec<WindowInfo>> {
        Ok(self.windows.lock().unwrap().clone())
    }

    fn foreground_window(&self) -> PilotResult<Option<u64>> {
        Ok(*self.foreground.lock().unwrap())
    }

    fn activate_window(&self, window: &WindowInfo) -> PilotResult<()> {
        if !self.pinned.load(Ordering::SeqCst) {
            self.set_foreground(Some(window.id));
        }
        self.push(InputEvent::Activate(window.id))
    }

    fn clipboard_text(&self) -> PilotResult<String> {
        Ok(self.clipboard.lock().unwrap().clone())
    }

    fn set_clipboard_text(&self, text: &str) -> PilotResult<()> {
        *self.clipboard.lock().unwrap() = text.into();
        Ok(())
    }
}

/// Executor that accepts everything and remembers what it saw.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ToolInvocation>>,
    resets: AtomicUsize,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let name = invocation.name();
        self.calls.lock().unwrap().push(invocation);
        ToolResult::success(format!("{name} ok"))
    }

    async fn reset_session(&self) -> PilotResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn tool_step(name: &str, arguments: serde_json::Value) -> PilotResult<ReasoningStep> {
    Ok(ReasoningStep::ToolCall {
        thought: String::new(),
        call: ToolCallRequest {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        },
        ignored_calls: 0,
    })
}

pub fn final_step(text: &str) -> PilotResult<ReasoningStep> {
    Ok(ReasoningStep::FinalAnswer { text: text.into() })
}

pub fn failed_step(message: &str) -> PilotResult<ReasoningStep> {
    Err(PilotError::ReasoningBackend(message.into()))
}

/// Reasoning backend that replays a script, then repeats a fallback step.
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<PilotResult<ReasoningStep>>>,
    fallback: Mutex<Box<dyn FnMut() -> PilotResult<ReasoningStep> + Send>>,
    delay: Duration,
    on_call: Option<Box<dyn Fn(usize) + Send + Sync>>,
    calls: AtomicUsize,
    transcript_lens: Mutex<Vec<usize>>,
}

impl ScriptedReasoner {
    pub fn new(script: Vec<PilotResult<ReasoningStep>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(Box::new(|| final_step("script exhausted"))),
            delay: Duration::ZERO,
            on_call: None,
            calls: AtomicUsize::new(0),
            transcript_lens: Mutex::new(Vec::new()),
        }
    }

    pub fn then_repeat(self, step: impl FnMut() -> PilotResult<ReasoningStep> + Send + 'static) -> Self {
        *self.fallback.lock().unwrap() = Box::new(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hook run with the 1-based call number before each reply.
    pub fn on_call(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Transcript length seen on each call.
    pub fn transcript_lens(&self) -> Vec<usize> {
        self.transcript_lens.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedReasoner {
    async fn complete(&self, transcript: &Transcript, _tools: &[ToolDef]) -> PilotResult<ReasoningStep> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.transcript_lens.lock().unwrap().push(transcript.len());
        if let Some(hook) = &self.on_call {
            hook(n);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(step) => step,
            None => {
                let mut fallback = self.fallback.lock().unwrap();
                (*fallback)()
            }
        }
    }
}

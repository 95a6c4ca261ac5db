use serde::{Deserialize, Serialize};

use crate::errors::PilotError;
use crate::perception::types::SourceModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Outcome of exactly one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            message: message.into(),
            payload: None,
        }
    }

    pub fn success_with(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::success(message)
        }
    }

    /// An ERROR result. An empty message is replaced so errors are never bare.
    pub fn error(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "tool failed without a description".to_string();
        }
        Self {
            status: ToolStatus::Error,
            message,
            payload: None,
        }
    }

    pub fn error_with(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::error(message)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Text shown to the reasoning backend. Payload fields holding image data
    /// are left out.
    pub fn render(&self) -> String {
        let status = match self.status {
            ToolStatus::Success => "SUCCESS",
            ToolStatus::Error => "ERROR",
        };
        match self.payload.as_ref().map(strip_images) {
            Some(p) if !is_empty_payload(&p) => format!("{status}: {}\n{p}", self.message),
            _ => format!("{status}: {}", self.message),
        }
    }

    /// The same result with any attached image removed from the payload.
    pub fn without_image(mut self) -> Self {
        if let Some(obj) = self.payload.as_mut().and_then(|p| p.as_object_mut()) {
            obj.remove(IMAGE_FIELD);
        }
        self
    }

    /// Base64 image attached to the payload, if any.
    pub fn image_base64(&self) -> Option<&str> {
        self.payload.as_ref()?.get(IMAGE_FIELD)?.as_str()
    }
}

pub const IMAGE_FIELD: &str = "image_base64";

fn strip_images(payload: &serde_json::Value) -> serde_json::Value {
    let mut p = payload.clone();
    if let Some(obj) = p.as_object_mut() {
        obj.remove(IMAGE_FIELD);
    }
    p
}

fn is_empty_payload(p: &serde_json::Value) -> bool {
    p.is_null() || p.as_object().is_some_and(|o| o.is_empty())
}

impl From<PilotError> for ToolResult {
    fn from(err: PilotError) -> Self {
        ToolResult::error(err.to_string())
    }
}

/// A tool call as issued by the reasoning backend, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The service that owns a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Vision,
    Control,
    /// Handled by the gateway itself.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CaptureScreen,
    DetectElements,
    GetScreenResolution,
    InspectUiTree,
    ListWindows,
    FocusWindow,
    MoveMouse,
    Click,
    DragMouse,
    TypeText,
    PressHotkey,
    Scroll,
    GetClipboard,
    SetClipboard,
    Wait,
}

impl ToolName {
    pub const ALL: [ToolName; 15] = [
        ToolName::CaptureScreen,
        ToolName::DetectElements,
        ToolName::GetScreenResolution,
        ToolName::InspectUiTree,
        ToolName::ListWindows,
        ToolName::FocusWindow,
        ToolName::MoveMouse,
        ToolName::Click,
        ToolName::DragMouse,
        ToolName::TypeText,
        ToolName::PressHotkey,
        ToolName::Scroll,
        ToolName::GetClipboard,
        ToolName::SetClipboard,
        ToolName::Wait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::CaptureScreen => "capture_screen",
            ToolName::DetectElements => "detect_elements",
            ToolName::GetScreenResolution => "get_screen_resolution",
            ToolName::InspectUiTree => "inspect_ui_tree",
            ToolName::ListWindows => "list_windows",
            ToolName::FocusWindow => "focus_window",
            ToolName::MoveMouse => "move_mouse",
            ToolName::Click => "click",
            ToolName::DragMouse => "drag_mouse",
            ToolName::TypeText => "type_text",
            ToolName::PressHotkey => "press_hotkey",
            ToolName::Scroll => "scroll",
            ToolName::GetClipboard => "get_clipboard",
            ToolName::SetClipboard => "set_clipboard",
            ToolName::Wait => "wait",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn service(&self) -> ServiceKind {
        match self {
            ToolName::CaptureScreen
            | ToolName::DetectElements
            | ToolName::GetScreenResolution
            | ToolName::InspectUiTree => ServiceKind::Vision,
            ToolName::Wait => ServiceKind::Local,
            _ => ServiceKind::Control,
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

fn default_model() -> SourceModel {
    SourceModel::Omniparser
}

pub const DEFAULT_TREE_DEPTH: u32 = 5;

fn default_tree_depth() -> u32 {
    DEFAULT_TREE_DEPTH
}

/// A validated, statically typed tool call.
///
/// Serializes as `{"tool": "<name>", "arguments": {...}}`, which is also the
/// shape forwarded to remote services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolInvocation {
    CaptureScreen {},
    DetectElements {
        #[serde(default = "default_model")]
        model: SourceModel,
    },
    GetScreenResolution {},
    InspectUiTree {
        #[serde(default = "default_tree_depth")]
        max_depth: u32,
    },
    ListWindows {},
    FocusWindow {
        name_fragment: String,
    },
    MoveMouse {
        x: f64,
        y: f64,
        #[serde(default)]
        relative: bool,
    },
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        double: bool,
        #[serde(default)]
        relative: bool,
    },
    DragMouse {
        start_x: f64,
        start_y: f64,
        end_x: f64,
        end_y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        relative: bool,
    },
    TypeText {
        text: String,
    },
    PressHotkey {
        keys: String,
    },
    Scroll {
        amount: i32,
    },
    GetClipboard {},
    SetClipboard {
        text: String,
    },
    Wait {
        milliseconds: u64,
    },
}

impl ToolInvocation {
    pub fn name(&self) -> ToolName {
        match self {
            ToolInvocation::CaptureScreen {} => ToolName::CaptureScreen,
            ToolInvocation::DetectElements { .. } => ToolName::DetectElements,
            ToolInvocation::GetScreenResolution {} => ToolName::GetScreenResolution,
            ToolInvocation::InspectUiTree { .. } => ToolName::InspectUiTree,
            ToolInvocation::ListWindows {} => ToolName::ListWindows,
            ToolInvocation::FocusWindow { .. } => ToolName::FocusWindow,
            ToolInvocation::MoveMouse { .. } => ToolName::MoveMouse,
            ToolInvocation::Click { .. } => ToolName::Click,
            ToolInvocation::DragMouse { .. } => ToolName::DragMouse,
            ToolInvocation::TypeText { .. } => ToolName::TypeText,
            ToolInvocation::PressHotkey { .. } => ToolName::PressHotkey,
            ToolInvocation::Scroll { .. } => ToolName::Scroll,
            ToolInvocation::GetClipboard {} => ToolName::GetClipboard,
            ToolInvocation::SetClipboard { .. } => ToolName::SetClipboard,
            ToolInvocation::Wait { .. } => ToolName::Wait,
        }
    }

    /// The argument object, as sent over the wire.
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("arguments").map(serde_json::Value::take))
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// A service received a call it does not own.
    pub fn misrouted(&self, service: &str) -> ToolResult {
        ToolResult::error(format!("tool `{}` is not served by the {service} service", self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_name_parses_back() {
        for name in ToolName::ALL {
            assert_eq!(ToolName::parse(name.as_str()), Some(name));
        }
        assert_eq!(ToolName::parse("launch_app"), None);
    }

    #[test]
    fn invocation_wire_shape() {
        let inv = ToolInvocation::Click {
            x: 10.0,
            y: 20.0,
            button: MouseButton::Right,
            double: false,
            relative: false,
        };
        let v = serde_json::to_value(&inv).unwrap();
        assert_eq!(v["tool"], "click");
        assert_eq!(v["arguments"]["button"], "right");
        assert_eq!(inv.arguments()["x"], 10.0);

        let empty: ToolInvocation =
            serde_json::from_value(serde_json::json!({"tool": "capture_screen", "arguments": {}}))
                .unwrap();
        assert_eq!(empty.name(), ToolName::CaptureScreen);
    }

    #[test]
    fn errors_always_carry_a_message() {
        let r = ToolResult::error("  ");
        assert_eq!(r.status, ToolStatus::Error);
        assert!(!r.message.trim().is_empty());
    }

    #[test]
    fn render_hides_image_payload() {
        let r = ToolResult::success_with(
            "Captured 2x2 frame",
            serde_json::json!({"width": 2, IMAGE_FIELD: "AAAA"}),
        );
        let text = r.render();
        assert!(text.starts_with("SUCCESS: Captured"));
        assert!(!text.contains("AAAA"));
        assert_eq!(r.image_base64(), Some("AAAA"));
    }
}

use std::collections::BTreeMap;

use serde_json::Value;

use crate::llm::types::{FunctionDef, ToolDef};
use crate::tools::schema::{self, ParamKind, ParamSpec};
use crate::tools::types::{ServiceKind, ToolInvocation, ToolName};

/// Widest coordinate accepted by the schema. Screen bounds are checked later,
/// against the live resolution.
const COORD_MAX: f64 = 100_000.0;
pub const MAX_WAIT_MS: i64 = 10_000;
/// Schema-level cap; the control service may enforce a lower configured limit.
pub const MAX_TEXT_LEN: usize = 10_000;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    pub fn service(&self) -> ServiceKind {
        self.name.service()
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            def_type: "function".into(),
            function: FunctionDef {
                name: self.name.as_str().into(),
                description: self.description.into(),
                parameters: schema::object_schema(self.params),
            },
        }
    }

    /// Validate raw arguments and build the typed invocation.
    pub fn parse(&self, args: &Value) -> Result<ToolInvocation, String> {
        let normalized = schema::validate(self.name.as_str(), self.params, args)?;
        let tagged = serde_json::json!({ "tool": self.name.as_str(), "arguments": normalized });
        serde_json::from_value(tagged)
            .map_err(|e| format!("arguments of `{}` could not be decoded: {e}", self.name))
    }
}

const X: ParamSpec = ParamSpec::required(
    "x",
    ParamKind::Number { min: 0.0, max: COORD_MAX },
    "Horizontal position. Integer pixels, or a 0.0-1.0 fraction of the screen width when relative is true.",
);
const Y: ParamSpec = ParamSpec::required(
    "y",
    ParamKind::Number { min: 0.0, max: COORD_MAX },
    "Vertical position. Integer pixels, or a 0.0-1.0 fraction of the screen height when relative is true.",
);
const RELATIVE: ParamSpec = ParamSpec::optional(
    "relative",
    ParamKind::Boolean,
    "Interpret x and y as fractions of the screen size. Defaults to false.",
);

const DETECT_PARAMS: &[ParamSpec] = &[ParamSpec::optional(
    "model",
    ParamKind::Enum(&["omniparser", "yolo"]),
    "Detector to use. Defaults to omniparser.",
)];
const FOCUS_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "name_fragment",
    ParamKind::String { max_len: 256 },
    "Part of the target window title.",
)];
const MOVE_PARAMS: &[ParamSpec] = &[X, Y, RELATIVE];
const CLICK_PARAMS: &[ParamSpec] = &[
    X,
    Y,
    ParamSpec::optional(
        "button",
        ParamKind::Enum(&["left", "right", "middle"]),
        "Mouse button. Defaults to left.",
    ),
    ParamSpec::optional("double", ParamKind::Boolean, "Double-click. Defaults to false."),
    RELATIVE,
];
const fn coord(name: &'static str, doc: &'static str) -> ParamSpec {
    ParamSpec::required(name, ParamKind::Number { min: 0.0, max: COORD_MAX }, doc)
}

const DRAG_PARAMS: &[ParamSpec] = &[
    coord("start_x", "Horizontal start position, in the same units as x for move_mouse."),
    coord("start_y", "Vertical start position."),
    coord("end_x", "Horizontal drop position."),
    coord("end_y", "Vertical drop position."),
    ParamSpec::optional(
        "button",
        ParamKind::Enum(&["left", "right", "middle"]),
        "Button held during the drag. Defaults to left.",
    ),
    RELATIVE,
];
const TREE_PARAMS: &[ParamSpec] = &[ParamSpec::optional(
    "max_depth",
    ParamKind::Integer { min: 1, max: 10 },
    "How many levels below the window to include. Defaults to 5.",
)];
const CLIPBOARD_SET_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "text",
    ParamKind::String { max_len: MAX_TEXT_LEN },
    "Text to place on the clipboard.",
)];
const TYPE_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "text",
    ParamKind::String { max_len: MAX_TEXT_LEN },
    "Literal text to type. Use press_hotkey for Enter, Tab or shortcuts.",
)];
const HOTKEY_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "keys",
    ParamKind::String { max_len: 64 },
    "Key combination joined with '+'.",
)];
const SCROLL_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "amount",
    ParamKind::Integer { min: -50, max: 50 },
    "Scroll steps, non-zero.",
)];
const WAIT_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "milliseconds",
    ParamKind::Integer { min: 0, max: MAX_WAIT_MS },
    "How long to wait.",
)];

fn builtin_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: ToolName::CaptureScreen,
            description: "Capture the primary screen. Returns the frame resolution and capture time. \
                Call this before reasoning about what is on screen; it does not locate elements.",
            params: &[],
        },
        ToolSpec {
            name: ToolName::DetectElements,
            description: "Capture a fresh frame and detect UI elements on it. Returns elements with id, \
                label, pixel bounding box (x, y, width, height), confidence and source model. \
                Use the box centre as click coordinates. Results describe the screen at call time only; \
                detect again after the screen changes.",
            params: DETECT_PARAMS,
        },
        ToolSpec {
            name: ToolName::GetScreenResolution,
            description: "Return the primary screen resolution in pixels. Valid coordinates satisfy \
                0 <= x < width and 0 <= y < height.",
            params: &[],
        },
        ToolSpec {
            name: ToolName::InspectUiTree,
            description: "Dump the accessibility tree of the foreground window: one line per \
                element with its control type, name and (left, top, right, bottom) pixel \
                rectangle. Cheaper and more exact than detect_elements for native controls. \
                Windows only.",
            params: TREE_PARAMS,
        },
        ToolSpec {
            name: ToolName::ListWindows,
            description: "List visible top-level windows, front-most first, with their titles and \
                whether they are minimized.",
            params: &[],
        },
        ToolSpec {
            name: ToolName::FocusWindow,
            description: "Bring the window whose title contains name_fragment (case-insensitive) to \
                the foreground and make it the keyboard target. Must succeed before type_text. \
                Fails when no window matches.",
            params: FOCUS_PARAMS,
        },
        ToolSpec {
            name: ToolName::MoveMouse,
            description: "Move the pointer to (x, y). Coordinates outside the screen are rejected \
                without moving the pointer.",
            params: MOVE_PARAMS,
        },
        ToolSpec {
            name: ToolName::Click,
            description: "Move the pointer to (x, y) and click. Coordinates outside the screen are \
                rejected without moving or clicking. Obtain coordinates from detect_elements first.",
            params: CLICK_PARAMS,
        },
        ToolSpec {
            name: ToolName::DragMouse,
            description: "Press a mouse button at (start_x, start_y), move to (end_x, end_y) and \
                release. Both points must be on screen; nothing is injected otherwise.",
            params: DRAG_PARAMS,
        },
        ToolSpec {
            name: ToolName::TypeText,
            description: "Type text into the currently focused window. Precondition: call \
                focus_window first; fails if no window is focused or the focused window has \
                closed or been minimized since.",
            params: TYPE_PARAMS,
        },
        ToolSpec {
            name: ToolName::PressHotkey,
            description: "Press a key or key combination, e.g. \"enter\", \"ctrl+s\", \"alt+f4\". \
                Keys are joined with '+', modifiers first. Goes to the window that has focus.",
            params: HOTKEY_PARAMS,
        },
        ToolSpec {
            name: ToolName::Scroll,
            description: "Scroll the window under the pointer vertically. Positive amounts scroll \
                up, negative scroll down. Move the pointer over the target first.",
            params: SCROLL_PARAMS,
        },
        ToolSpec {
            name: ToolName::GetClipboard,
            description: "Read the text currently on the clipboard.",
            params: &[],
        },
        ToolSpec {
            name: ToolName::SetClipboard,
            description: "Replace the clipboard contents with text. Paste it with press_hotkey \
                (e.g. \"ctrl+v\"); faster than type_text for long or non-ASCII text.",
            params: CLIPBOARD_SET_PARAMS,
        },
        ToolSpec {
            name: ToolName::Wait,
            description: "Pause before the next action, e.g. while an application starts. \
                At most 10000 ms.",
            params: WAIT_PARAMS,
        },
    ]
}

/// Immutable catalogue of the tools exposed to the reasoning backend.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: BTreeMap<ToolName, ToolSpec>,
}

impl ToolRegistry {
    /// Every built-in tool.
    pub fn builtin() -> Self {
        Self::for_services(&[ServiceKind::Vision, ServiceKind::Control, ServiceKind::Local])
    }

    /// Only the tools owned by `services`.
    pub fn for_services(services: &[ServiceKind]) -> Self {
        let specs = builtin_specs()
            .into_iter()
            .filter(|s| services.contains(&s.service()))
            .map(|s| (s.name, s))
            .collect();
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        ToolName::parse(name).and_then(|n| self.specs.get(&n))
    }

    pub fn names(&self) -> impl Iterator<Item = ToolName> + '_ {
        self.specs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.specs.values().map(ToolSpec::to_tool_def).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_covers_every_tool() {
        let reg = ToolRegistry::builtin();
        assert_eq!(reg.len(), ToolName::ALL.len());
        for def in reg.tool_defs() {
            assert_eq!(def.def_type, "function");
            assert_eq!(def.function.parameters["type"], "object");
            assert!(!def.function.description.is_empty());
        }
    }

    #[test]
    fn service_filter_limits_tools() {
        let vision = ToolRegistry::for_services(&[ServiceKind::Vision]);
        assert!(vision.get("capture_screen").is_some());
        assert!(vision.get("click").is_none());
    }

    #[test]
    fn type_text_description_states_focus_precondition() {
        let reg = ToolRegistry::builtin();
        let spec = reg.get("type_text").unwrap();
        assert!(spec.description.contains("focus_window"));
    }

    #[test]
    fn parse_builds_typed_invocations_with_defaults() {
        let reg = ToolRegistry::builtin();
        let inv = reg.get("click").unwrap().parse(&json!({"x": 5, "y": 6})).unwrap();
        assert_eq!(
            inv,
            ToolInvocation::Click {
                x: 5.0,
                y: 6.0,
                button: crate::tools::types::MouseButton::Left,
                double: false,
                relative: false,
            }
        );
        let inv = reg.get("detect_elements").unwrap().parse(&Value::Null).unwrap();
        assert_eq!(
            inv,
            ToolInvocation::DetectElements {
                model: crate::perception::types::SourceModel::Omniparser
            }
        );
    }

    #[test]
    fn drag_and_tree_arguments_are_typed() {
        let reg = ToolRegistry::builtin();
        let inv = reg
            .get("drag_mouse")
            .unwrap()
            .parse(&json!({"start_x": 1, "start_y": 2, "end_x": 30, "end_y": 40}))
            .unwrap();
        assert_eq!(
            inv,
            ToolInvocation::DragMouse {
                start_x: 1.0,
                start_y: 2.0,
                end_x: 30.0,
                end_y: 40.0,
                button: crate::tools::types::MouseButton::Left,
                relative: false,
            }
        );
        let err = reg.get("drag_mouse").unwrap().parse(&json!({"start_x": 1, "start_y": 2})).unwrap_err();
        assert!(err.contains("end_x"), "{err}");

        let inv = reg.get("inspect_ui_tree").unwrap().parse(&json!({})).unwrap();
        assert_eq!(inv, ToolInvocation::InspectUiTree { max_depth: 5 });
        assert!(reg.get("inspect_ui_tree").unwrap().parse(&json!({"max_depth": 50})).is_err());
        assert_eq!(reg.get("get_clipboard").unwrap().service(), ServiceKind::Control);
    }

    #[test]
    fn wait_is_capped() {
        let reg = ToolRegistry::builtin();
        let err = reg.get("wait").unwrap().parse(&json!({"milliseconds": 60_000})).unwrap_err();
        assert!(err.contains("milliseconds"));
    }
}

//! Windows UI Automation (UIA) tree of the foreground window.
use windows::Win32::Foundation::RECT;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};
use windows::Win32::UI::Accessibility::{
    CUIAutomation, IUIAutomation, IUIAutomationElement, IUIAutomationTreeWalker,
};
use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::UiTreeSource;
use crate::perception::types::UiNode;

/// Upper bound on collected nodes, whatever the depth.
const MAX_NODES: usize = 500;

/// COM initialization for the current thread, undone on drop.
struct ComGuard;

impl ComGuard {
    fn new() -> PilotResult<Self> {
        // SAFETY: paired with CoUninitialize in Drop on the same thread.
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| PilotError::Capture(format!("CoInitializeEx: {e}")))?;
        }
        Ok(Self)
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

fn uia<T>(what: &str, r: windows::core::Result<T>) -> PilotResult<T> {
    r.map_err(|e| PilotError::Capture(format!("{what}: {e}")))
}

/// Walks the control view of the foreground window.
#[derive(Debug, Default, Clone, Copy)]
pub struct UiAutomationTree;

impl UiTreeSource for UiAutomationTree {
    fn focused_window_tree(&self, max_depth: u32) -> PilotResult<UiNode> {
        let _com = ComGuard::new()?;

        // SAFETY: COM is initialized for this thread by the guard above, and
        // every interface pointer is dropped before it.
        unsafe {
            let automation: IUIAutomation =
                uia("CoCreateInstance UIA", CoCreateInstance(&CUIAutomation, None, CLSCTX_ALL))?;
            let hwnd = GetForegroundWindow();
            if hwnd.0.is_null() {
                return Err(PilotError::Capture("no window is in the foreground".into()));
            }
            let root = uia("ElementFromHandle", automation.ElementFromHandle(hwnd))?;
            let walker = uia("ControlViewWalker", automation.ControlViewWalker())?;

            let mut budget = MAX_NODES;
            let mut node = read_node(&root)?;
            node.children = walk_children(&walker, &root, 1, max_depth, &mut budget);
            tracing::debug!(nodes = node.count(), window = %node.name, "UIA tree collected");
            Ok(node)
        }
    }
}

/// Children of `element` down to `max_depth`. Offscreen and unreadable
/// elements are skipped along with their subtrees.
unsafe fn walk_children(
    walker: &IUIAutomationTreeWalker,
    element: &IUIAutomationElement,
    depth: u32,
    max_depth: u32,
    budget: &mut usize,
) -> Vec<UiNode> {
    let mut out = Vec::new();
    if depth > max_depth {
        return out;
    }
    let Ok(mut child) = walker.GetFirstChildElement(element) else {
        return out;
    };
    loop {
        if *budget == 0 {
            break;
        }
        if let Ok(mut node) = read_node(&child) {
            *budget -= 1;
            node.children = walk_children(walker, &child, depth + 1, max_depth, budget);
            out.push(node);
        }
        match walker.GetNextSiblingElement(&child) {
            Ok(next) => child = next,
            Err(_) => break,
        }
    }
    out
}

unsafe fn read_node(element: &IUIAutomationElement) -> PilotResult<UiNode> {
    if element.CurrentIsOffscreen().unwrap_or_default().as_bool() {
        return Err(PilotError::Capture("offscreen".into()));
    }
    let rect: RECT = uia("bbox", element.CurrentBoundingRectangle())?;
    let name = element.CurrentName().map(|n| n.to_string()).unwrap_or_default();
    let control_type = element.CurrentControlType().map(|t| t.0).unwrap_or(0);
    Ok(UiNode {
        control_type: control_type_name(control_type).to_string(),
        name,
        rect: [rect.left, rect.top, rect.right, rect.bottom],
        children: Vec::new(),
    })
}

/// UIA_*ControlTypeId values.
fn control_type_name(id: i32) -> &'static str {
    match id {
        50000 => "Button",
        50001 => "Calendar",
        50002 => "CheckBox",
        50003 => "ComboBox",
        50004 => "Edit",
        50005 => "Hyperlink",
        50006 => "Image",
        50007 => "ListItem",
        50008 => "List",
        50009 => "Menu",
        50010 => "MenuBar",
        50011 => "MenuItem",
        50012 => "ProgressBar",
        50013 => "RadioButton",
        50014 => "ScrollBar",
        50015 => "Slider",
        50016 => "Spinner",
        50017 => "StatusBar",
        50018 => "Tab",
        50019 => "TabItem",
        50020 => "Text",
        50021 => "ToolBar",
        50022 => "ToolTip",
        50023 => "Tree",
        50024 => "TreeItem",
        50025 => "Custom",
        50026 => "Group",
        50027 => "Thumb",
        50028 => "DataGrid",
        50029 => "DataItem",
        50030 => "Document",
        50031 => "SplitButton",
        50032 => "Window",
        50033 => "Pane",
        50034 => "Header",
        50035 => "HeaderItem",
        50036 => "Table",
        50037 => "TitleBar",
        50038 => "Separator",
        _ => "Unknown",
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::errors::{PilotError, PilotResult};
use crate::executor::input::{parse_combo, InputBackend, WindowInfo};
use crate::tools::gateway::ToolExecutor;
use crate::tools::types::{MouseButton, ToolInvocation, ToolResult};

/// Mouse, keyboard and window control.
///
/// Holds the focused-window record for the current task run. It is cleared by
/// [`ControlService::reset_session`] and never shared across runs.
pub struct ControlService {
    backend: Arc<dyn InputBackend>,
    pointer_settle: Duration,
    drag_duration: Duration,
    max_text_len: usize,
    focus: Mutex<Option<WindowInfo>>,
}

impl ControlService {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            pointer_settle: Duration::from_millis(50),
            drag_duration: Duration::from_millis(500),
            max_text_len: 2_000,
            focus: Mutex::new(None),
        }
    }

    pub fn with_pointer_settle(mut self, settle: Duration) -> Self {
        self.pointer_settle = settle;
        self
    }

    /// Time spent moving between the press and the release of a drag.
    pub fn with_drag_duration(mut self, duration: Duration) -> Self {
        self.drag_duration = duration;
        self
    }

    pub fn with_max_text_len(mut self, max: usize) -> Self {
        self.max_text_len = max;
        self
    }

    pub fn focused_window(&self) -> Option<WindowInfo> {
        self.focus.lock().ok().and_then(|f| f.clone())
    }

    fn set_focus(&self, window: Option<WindowInfo>) {
        if let Ok(mut f) = self.focus.lock() {
            *f = window;
        }
    }

    pub fn reset_focus(&self) {
        self.set_focus(None);
    }

    /// Run a backend call on a blocking thread.
    async fn blocking<T, F>(&self, f: F) -> PilotResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn InputBackend) -> PilotResult<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| PilotError::InputInjection(format!("input task failed: {e}")))?
    }

    /// Map tool coordinates to an on-screen pixel, or explain why not.
    async fn resolve_point(&self, x: f64, y: f64, relative: bool) -> PilotResult<(i32, i32)> {
        let (width, height) = self.blocking(|b| b.screen_size()).await?;
        let axis = |name: &str, v: f64, bound: u32| -> PilotResult<i32> {
            if !v.is_finite() {
                return Err(PilotError::InputInjection(format!("{name} is not a finite number")));
            }
            let px = if relative {
                if !(0.0..=1.0).contains(&v) {
                    return Err(PilotError::InputInjection(format!(
                        "relative {name}={v} must be within [0.0, 1.0]"
                    )));
                }
                (v * f64::from(bound)).floor().min(f64::from(bound.saturating_sub(1)))
            } else {
                v.floor()
            };
            if px < 0.0 || px >= f64::from(bound) {
                let dim = if name == "x" { "width" } else { "height" };
                return Err(PilotError::InputInjection(format!(
                    "{name}={v} is outside the screen {dim} bound [0, {bound})"
                )));
            }
            Ok(px as i32)
        };
        Ok((axis("x", x, width)?, axis("y", y, height)?))
    }

    pub async fn move_mouse(&self, x: f64, y: f64, relative: bool) -> PilotResult<(i32, i32)> {
        let (px, py) = self.resolve_point(x, y, relative).await?;
        self.blocking(move |b| b.move_pointer(px, py)).await?;
        Ok((px, py))
    }

    pub async fn click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        double: bool,
        relative: bool,
    ) -> PilotResult<(i32, i32)> {
        let (px, py) = self.move_mouse(x, y, relative).await?;
        tokio::time::sleep(self.pointer_settle).await;
        self.blocking(move |b| b.click(button, double)).await?;
        Ok((px, py))
    }

    /// Press at `from`, move to `to` in small steps, release. Both points are
    /// checked before anything is injected, and the button is always released.
    pub async fn drag_mouse(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        button: MouseButton,
        relative: bool,
    ) -> PilotResult<((i32, i32), (i32, i32))> {
        let start = self.resolve_point(from.0, from.1, relative).await?;
        let end = self.resolve_point(to.0, to.1, relative).await?;
        let settle = self.pointer_settle;
        let pause = self.drag_duration / DRAG_STEPS;

        self.blocking(move |b| {
            b.move_pointer(start.0, start.1)?;
            std::thread::sleep(settle);
            b.mouse_button(button, true)?;
            let mut outcome = Ok(());
            for step in 1..=DRAG_STEPS {
                let t = f64::from(step) / f64::from(DRAG_STEPS);
                let x = start.0 + (f64::from(end.0 - start.0) * t).round() as i32;
                let y = start.1 + (f64::from(end.1 - start.1) * t).round() as i32;
                if let Err(e) = b.move_pointer(x, y) {
                    outcome = Err(e);
                    break;
                }
                std::thread::sleep(pause);
            }
            let released = b.mouse_button(button, false);
            outcome.and(released)
        })
        .await?;
        Ok((start, end))
    }

    /// Type into the focused window. The focus record is re-validated first,
    /// and the window is brought back to the front if something else took it.
    pub async fn type_text(&self, text: &str) -> PilotResult<WindowInfo> {
        let len = text.chars().count();
        if len == 0 {
            return Err(PilotError::InputInjection("text to type is empty".into()));
        }
        if len > self.max_text_len {
            return Err(PilotError::InputInjection(format!(
                "text is {len} characters long; the limit is {}",
                self.max_text_len
            )));
        }
        let focused = self.focused_window().ok_or_else(|| {
            PilotError::InputInjection(
                "no focused input target; call focus_window before type_text".into(),
            )
        })?;

        let windows = self.blocking(|b| b.list_windows()).await?;
        match windows.into_iter().find(|w| w.id == focused.id) {
            Some(w) if !w.minimized => {}
            Some(_) => {
                self.reset_focus();
                return Err(PilotError::InputInjection(format!(
                    "focused window {:?} has been minimized; call focus_window again",
                    focused.title
                )));
            }
            None => {
                self.reset_focus();
                return Err(PilotError::InputInjection(format!(
                    "focused window {:?} no longer exists; call focus_window again",
                    focused.title
                )));
            }
        }

        self.ensure_foreground(&focused).await?;

        let owned = text.to_string();
        self.blocking(move |b| b.type_text(&owned)).await?;
        Ok(focused)
    }

    async fn ensure_foreground(&self, target: &WindowInfo) -> PilotResult<()> {
        let id = target.id;
        match self.blocking(|b| b.foreground_window()).await? {
            Some(front) if front != id => {
                tracing::info!(title = %target.title, front, "keyboard focus moved away; re-activating");
            }
            _ => return Ok(()),
        }
        let chosen = target.clone();
        self.blocking(move |b| b.activate_window(&chosen)).await?;
        match self.blocking(|b| b.foreground_window()).await? {
            Some(front) if front != id => Err(PilotError::InputInjection(format!(
                "window {:?} lost keyboard focus and could not be brought back; call focus_window again",
                target.title
            ))),
            _ => Ok(()),
        }
    }

    pub async fn press_hotkey(&self, combo: &str) -> PilotResult<()> {
        let keys = parse_combo(combo)?;
        self.blocking(move |b| b.press_keys(&keys)).await
    }

    pub async fn scroll(&self, amount: i32) -> PilotResult<()> {
        if amount == 0 {
            return Err(PilotError::InputInjection("scroll amount must be non-zero".into()));
        }
        self.blocking(move |b| b.scroll(amount)).await
    }

    pub async fn clipboard_text(&self) -> PilotResult<String> {
        self.blocking(|b| b.clipboard_text()).await
    }

    pub async fn set_clipboard_text(&self, text: &str) -> PilotResult<usize> {
        let owned = text.to_string();
        let len = owned.chars().count();
        self.blocking(move |b| b.set_clipboard_text(&owned)).await?;
        Ok(len)
    }

    pub async fn list_windows(&self) -> PilotResult<Vec<WindowInfo>> {
        self.blocking(|b| b.list_windows()).await
    }

    /// Focus the best window whose title contains `fragment`.
    pub async fn focus_window(&self, fragment: &str) -> PilotResult<(WindowInfo, usize)> {
        let needle = fragment.trim();
        if needle.is_empty() {
            return Err(PilotError::InputInjection("window name fragment is empty".into()));
        }
        let windows = self.list_windows().await?;
        let (target, matches) = pick_window(&windows, needle).ok_or_else(|| {
            PilotError::InputInjection(format!("no window title contains {needle:?}"))
        })?;

        let chosen = target.clone();
        self.blocking(move |b| b.activate_window(&chosen)).await?;
        tracing::info!(title = %target.title, matches, "window focused");
        self.set_focus(Some(target.clone()));
        Ok((target.clone(), matches))
    }
}

const DRAG_STEPS: u32 = 10;

/// Pick among windows whose title contains `needle`, case-insensitively.
///
/// Exact title matches win, then restored windows over minimized ones; ties
/// keep enumeration order, which is front-most first.
pub fn pick_window<'a>(windows: &'a [WindowInfo], needle: &str) -> Option<(&'a WindowInfo, usize)> {
    let needle = needle.to_lowercase();
    let candidates: Vec<&WindowInfo> = windows
        .iter()
        .filter(|w| w.title.to_lowercase().contains(&needle))
        .collect();
    let best = candidates
        .iter()
        .enumerate()
        .min_by_key(|(i, w)| (w.title.to_lowercase() != needle, w.minimized, *i))
        .map(|(_, w)| *w)?;
    Some((best, candidates.len()))
}

fn to_result<T>(r: PilotResult<T>, ok: impl FnOnce(T) -> ToolResult) -> ToolResult {
    match r {
        Ok(v) => ok(v),
        Err(e) => {
            tracing::warn!(error = %e, "control action failed");
            e.into()
        }
    }
}

#[async_trait]
impl ToolExecutor for ControlService {
    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        match invocation {
            ToolInvocation::MoveMouse { x, y, relative } => {
                to_result(self.move_mouse(x, y, relative).await, |(px, py)| {
                    ToolResult::success_with(
                        format!("Pointer moved to ({px}, {py})"),
                        json!({ "x": px, "y": py }),
                    )
                })
            }
            ToolInvocation::Click { x, y, button, double, relative } => {
                to_result(self.click(x, y, button, double, relative).await, |(px, py)| {
                    let kind = if double { "Double-clicked" } else { "Clicked" };
                    ToolResult::success_with(
                        format!("{kind} {} button at ({px}, {py})", button.as_str()),
                        json!({ "x": px, "y": py }),
                    )
                })
            }
            ToolInvocation::DragMouse { start_x, start_y, end_x, end_y, button, relative } => {
                let dragged = self
                    .drag_mouse((start_x, start_y), (end_x, end_y), button, relative)
                    .await;
                to_result(dragged, |((sx, sy), (ex, ey))| {
                    ToolResult::success_with(
                        format!("Dragged with {} button from ({sx}, {sy}) to ({ex}, {ey})", button.as_str()),
                        json!({ "start": { "x": sx, "y": sy }, "end": { "x": ex, "y": ey } }),
                    )
                })
            }
            ToolInvocation::TypeText { text } => {
                let chars = text.chars().count();
                to_result(self.type_text(&text).await, |w| {
                    ToolResult::success(format!("Typed {chars} characters into {:?}", w.title))
                })
            }
            ToolInvocation::PressHotkey { keys } => to_result(self.press_hotkey(&keys).await, |_| {
                ToolResult::success(format!("Pressed {keys}"))
            }),
            ToolInvocation::Scroll { amount } => to_result(self.scroll(amount).await, |_| {
                let dir = if amount > 0 { "up" } else { "down" };
                ToolResult::success(format!("Scrolled {dir} {} steps", amount.abs()))
            }),
            ToolInvocation::GetClipboard {} => to_result(self.clipboard_text().await, |text| {
                ToolResult::success_with(
                    format!("Clipboard holds {} characters", text.chars().count()),
                    json!({ "text": text }),
                )
            }),
            ToolInvocation::SetClipboard { text } => {
                to_result(self.set_clipboard_text(&text).await, |len| {
                    ToolResult::success_with(
                        format!("Copied {len} characters to the clipboard"),
                        json!({ "len": len }),
                    )
                })
            }
            ToolInvocation::ListWindows {} => to_result(self.list_windows().await, |windows| {
                let titles: Vec<String> = windows
                    .iter()
                    .map(|w| {
                        if w.minimized {
                            format!("{} (minimized)", w.title)
                        } else {
                            w.title.clone()
                        }
                    })
                    .collect();
                ToolResult::success_with(
                    format!("{} windows: {}", windows.len(), titles.join(" | ")),
                    json!({ "windows": windows }),
                )
            }),
            ToolInvocation::FocusWindow { name_fragment } => {
                to_result(self.focus_window(&name_fragment).await, |(w, matches)| {
                    let note = if matches > 1 {
                        format!(" ({matches} windows matched; picked the best)")
                    } else {
                        String::new()
                    };
                    ToolResult::success_with(
                        format!("Focused {:?}{note}", w.title),
                        json!({ "window": w }),
                    )
                })
            }
            other => other.misrouted("control"),
        }
    }

    async fn reset_session(&self) -> PilotResult<()> {
        self.reset_focus();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{window, InputEvent, RecordingInput};
    use crate::tools::types::ToolStatus;

    fn service(input: &Arc<RecordingInput>) -> ControlService {
        ControlService::new(input.clone())
            .with_pointer_settle(Duration::ZERO)
            .with_drag_duration(Duration::ZERO)
    }

    #[tokio::test]
    async fn out_of_bounds_points_inject_nothing() {
        let input = Arc::new(RecordingInput::new(1920, 1080));
        let svc = service(&input);

        let err = svc.click(1920.0, 10.0, MouseButton::Left, false, false).await.unwrap_err();
        assert!(err.to_string().contains("width bound [0, 1920)"), "{err}");
        let err = svc.move_mouse(5.0, 5000.0, false).await.unwrap_err();
        assert!(err.to_string().contains("height"), "{err}");
        let err = svc.move_mouse(1.5, 0.5, true).await.unwrap_err();
        assert!(err.to_string().contains("relative x"), "{err}");

        assert!(input.events().is_empty());
    }

    #[tokio::test]
    async fn click_moves_then_clicks() {
        let input = Arc::new(RecordingInput::new(1920, 1080));
        let svc = service(&input);
        svc.click(1919.0, 0.0, MouseButton::Right, true, false).await.unwrap();
        assert_eq!(
            input.events(),
            vec![
                InputEvent::Move(1919, 0),
                InputEvent::Click(MouseButton::Right, true)
            ]
        );
    }

    #[tokio::test]
    async fn relative_coordinates_map_onto_the_screen() {
        let input = Arc::new(RecordingInput::new(1000, 500));
        let svc = service(&input);
        assert_eq!(svc.move_mouse(0.5, 0.5, true).await.unwrap(), (500, 250));
        assert_eq!(svc.move_mouse(1.0, 1.0, true).await.unwrap(), (999, 499));
    }

    #[tokio::test]
    async fn type_text_requires_a_focused_window() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![window(1, "Notepad", false)]));
        let svc = service(&input);

        let result = svc.execute(ToolInvocation::TypeText { text: "hello".into() }).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.message.contains("focus_window"), "{}", result.message);
        assert!(input.events().is_empty());

        svc.focus_window("note").await.unwrap();
        let result = svc.execute(ToolInvocation::TypeText { text: "hello".into() }).await;
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(
            input.events(),
            vec![InputEvent::Activate(1), InputEvent::Type("hello".into())]
        );
    }

    #[tokio::test]
    async fn focus_is_revalidated_before_typing() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![window(7, "Editor", false)]));
        let svc = service(&input);
        svc.focus_window("editor").await.unwrap();

        input.set_windows(vec![window(7, "Editor", true)]);
        let err = svc.type_text("x").await.unwrap_err();
        assert!(err.to_string().contains("minimized"), "{err}");

        input.set_windows(vec![]);
        let err = svc.type_text("x").await.unwrap_err();
        assert!(err.to_string().contains("focus_window"), "{err}");
        assert!(!input.events().iter().any(|e| matches!(e, InputEvent::Type(_))));
    }

    #[tokio::test]
    async fn typing_refocuses_a_window_that_lost_the_foreground() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![
            window(1, "Notepad", false),
            window(2, "Terminal", false),
        ]));
        let svc = service(&input);
        svc.focus_window("notepad").await.unwrap();

        // Something else raises the terminal between focus and typing.
        input.set_foreground(Some(2));
        let result = svc.execute(ToolInvocation::TypeText { text: "hello".into() }).await;
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(
            input.events(),
            vec![
                InputEvent::Activate(1),
                InputEvent::Activate(1),
                InputEvent::Type("hello".into())
            ]
        );
    }

    #[tokio::test]
    async fn typing_is_refused_when_the_window_cannot_be_raised() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![
            window(1, "Notepad", false),
            window(2, "Terminal", false),
        ]));
        let svc = service(&input);
        svc.focus_window("notepad").await.unwrap();

        input.set_foreground(Some(2));
        input.pin_foreground(true);
        let result = svc.execute(ToolInvocation::TypeText { text: "rm -rf ~".into() }).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.message.contains("focus_window"), "{}", result.message);
        assert!(!input.events().iter().any(|e| matches!(e, InputEvent::Type(_))));
    }

    #[tokio::test]
    async fn whitespace_is_typed_but_empty_text_is_not() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![window(1, "Notepad", false)]));
        let svc = service(&input);
        svc.focus_window("notepad").await.unwrap();
        assert!(svc.type_text("").await.is_err());
        svc.type_text("  ").await.unwrap();
        assert_eq!(input.events().last(), Some(&InputEvent::Type("  ".into())));
    }

    #[tokio::test]
    async fn drag_presses_moves_and_releases() {
        let input = Arc::new(RecordingInput::new(800, 600));
        let svc = service(&input);
        let result = svc
            .execute(ToolInvocation::DragMouse {
                start_x: 10.0,
                start_y: 20.0,
                end_x: 110.0,
                end_y: 20.0,
                button: MouseButton::Left,
                relative: false,
            })
            .await;
        assert!(result.is_success(), "{}", result.message);

        let events = input.events();
        assert_eq!(events[0], InputEvent::Move(10, 20));
        assert_eq!(events[1], InputEvent::Button(MouseButton::Left, true));
        assert_eq!(events[events.len() - 2], InputEvent::Move(110, 20));
        assert_eq!(events[events.len() - 1], InputEvent::Button(MouseButton::Left, false));
        let moves = events.iter().filter(|e| matches!(e, InputEvent::Move(..))).count();
        assert_eq!(moves, 1 + DRAG_STEPS as usize);
    }

    #[tokio::test]
    async fn drag_with_an_off_screen_end_injects_nothing() {
        let input = Arc::new(RecordingInput::new(800, 600));
        let svc = service(&input);
        let err = svc
            .drag_mouse((10.0, 10.0), (900.0, 10.0), MouseButton::Left, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("width"), "{err}");
        assert!(input.events().is_empty());
    }

    #[tokio::test]
    async fn clipboard_round_trips_through_the_backend() {
        let input = Arc::new(RecordingInput::new(800, 600));
        let svc = service(&input);
        let set = svc.execute(ToolInvocation::SetClipboard { text: "héllo".into() }).await;
        assert_eq!(set.payload.unwrap()["len"], 5);
        let got = svc.execute(ToolInvocation::GetClipboard {}).await;
        assert!(got.is_success());
        assert_eq!(got.payload.unwrap()["text"], "héllo");
    }

    #[tokio::test]
    async fn reset_session_clears_focus() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![window(1, "Notepad", false)]));
        let svc = service(&input);
        svc.focus_window("Notepad").await.unwrap();
        svc.reset_session().await.unwrap();
        assert!(svc.focused_window().is_none());
        assert!(svc.type_text("x").await.is_err());
    }

    #[tokio::test]
    async fn focus_window_without_a_match_fails() {
        let input = Arc::new(RecordingInput::new(800, 600).with_windows(vec![window(1, "Notepad", false)]));
        let svc = service(&input);
        let err = svc.focus_window("calculator").await.unwrap_err();
        assert!(err.to_string().contains("calculator"));
        assert!(svc.focused_window().is_none());
    }

    #[test]
    fn pick_window_prefers_exact_then_restored_then_front_most() {
        let windows = vec![
            window(1, "notes.txt - Notepad", true),
            window(2, "Notepad++", false),
            window(3, "notepad", false),
            window(4, "Untitled - Notepad", false),
        ];
        assert_eq!(pick_window(&windows, "NOTEPAD").map(|(w, n)| (w.id, n)), Some((3, 4)));

        let windows = vec![window(1, "a - Notepad", true), window(2, "b - Notepad", false)];
        assert_eq!(pick_window(&windows, "notepad").map(|(w, _)| w.id), Some(2));

        let windows = vec![window(5, "x - Notepad", false), window(6, "y - Notepad", false)];
        assert_eq!(pick_window(&windows, "notepad").map(|(w, _)| w.id), Some(5));
        assert!(pick_window(&windows, "paint").is_none());
    }

    #[tokio::test]
    async fn hotkeys_and_scroll() {
        let input = Arc::new(RecordingInput::new(800, 600));
        let svc = service(&input);
        assert!(svc.execute(ToolInvocation::PressHotkey { keys: "ctrl+s".into() }).await.is_success());
        let bad = svc.execute(ToolInvocation::PressHotkey { keys: "ctrl+hyper".into() }).await;
        assert_eq!(bad.status, ToolStatus::Error);
        assert!(svc.scroll(0).await.is_err());
        svc.scroll(-3).await.unwrap();
        assert_eq!(input.events().len(), 2);
    }
}

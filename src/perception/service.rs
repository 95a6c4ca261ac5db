use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;

use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::{Detector, ScreenSource, UiTreeSource};
use crate::perception::types::{ElementDescriptor, FrameInfo, ScreenFrame, SourceModel, UiNode};
use crate::tools::gateway::ToolExecutor;
use crate::tools::types::{ToolInvocation, ToolResult, IMAGE_FIELD};

/// Screen capture plus UI element detection.
///
/// Stateless between calls: every detection runs on the frame it is given, and
/// the tool-facing operations always capture a fresh frame.
pub struct VisionService {
    screen: Arc<dyn ScreenSource>,
    detectors: HashMap<SourceModel, Arc<dyn Detector>>,
    ui_tree: Option<Arc<dyn UiTreeSource>>,
    capture_timeout: Duration,
    detect_timeout: Duration,
    jpeg_quality: u8,
    attach_images: bool,
}

impl VisionService {
    pub fn new(screen: Arc<dyn ScreenSource>) -> Self {
        Self {
            screen,
            detectors: HashMap::new(),
            ui_tree: None,
            capture_timeout: Duration::from_secs(10),
            detect_timeout: Duration::from_secs(30),
            jpeg_quality: 80,
            attach_images: false,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.insert(detector.model(), detector);
        self
    }

    pub fn with_ui_tree(mut self, source: Arc<dyn UiTreeSource>) -> Self {
        self.ui_tree = Some(source);
        self
    }

    pub fn with_timeouts(mut self, capture: Duration, detect: Duration) -> Self {
        self.capture_timeout = capture;
        self.detect_timeout = detect;
        self
    }

    /// Attach a JPEG of each captured frame to `capture_screen` results.
    pub fn with_image_attachments(mut self, attach: bool, jpeg_quality: u8) -> Self {
        self.attach_images = attach;
        self.jpeg_quality = jpeg_quality;
        self
    }

    pub fn models(&self) -> Vec<SourceModel> {
        let mut models: Vec<SourceModel> = self.detectors.keys().copied().collect();
        models.sort_by_key(|m| m.as_str());
        models
    }

    pub async fn capture_screen(&self) -> PilotResult<ScreenFrame> {
        let screen = self.screen.clone();
        let task = tokio::task::spawn_blocking(move || screen.capture());
        let frame = match tokio::time::timeout(self.capture_timeout, task).await {
            Ok(joined) => joined.map_err(|e| PilotError::Capture(format!("capture task failed: {e}")))??,
            Err(_) => return Err(PilotError::timeout("screen capture", self.capture_timeout)),
        };
        if frame.is_empty() {
            return Err(PilotError::Capture("captured frame has zero size".into()));
        }
        Ok(frame)
    }

    pub async fn screen_resolution(&self) -> PilotResult<(u32, u32)> {
        let screen = self.screen.clone();
        tokio::task::spawn_blocking(move || screen.resolution())
            .await
            .map_err(|e| PilotError::Capture(format!("resolution task failed: {e}")))?
    }

    /// Detect elements on `frame`. Output keeps the detector's order; every box
    /// lies inside the frame.
    pub async fn detect_elements(
        &self,
        frame: &ScreenFrame,
        model: SourceModel,
    ) -> PilotResult<Vec<ElementDescriptor>> {
        if frame.is_empty() {
            return Err(PilotError::Detection("cannot detect on an empty frame".into()));
        }
        let detector = self.detectors.get(&model).ok_or_else(|| {
            PilotError::Detection(format!("detector `{model}` is not configured"))
        })?;

        let raws = tokio::time::timeout(self.detect_timeout, detector.detect(frame))
            .await
            .map_err(|_| PilotError::timeout(format!("{model} detection"), self.detect_timeout))??;

        let (width, height) = frame.resolution();
        let elements: Vec<ElementDescriptor> = raws
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| ElementDescriptor::from_raw(i, raw, model, width, height))
            .collect();
        if elements.len() < raws.len() {
            tracing::debug!(
                dropped = raws.len() - elements.len(),
                "dropped detections outside the frame"
            );
        }
        tracing::info!(model = %model, count = elements.len(), "elements detected");
        Ok(elements)
    }

    /// Accessibility tree of the foreground window.
    pub async fn inspect_ui_tree(&self, max_depth: u32) -> PilotResult<UiNode> {
        let source = self.ui_tree.clone().ok_or_else(|| {
            PilotError::Capture("accessibility inspection is only available on Windows".into())
        })?;
        let task = tokio::task::spawn_blocking(move || source.focused_window_tree(max_depth));
        match tokio::time::timeout(self.detect_timeout, task).await {
            Ok(joined) => joined.map_err(|e| PilotError::Capture(format!("ui tree task failed: {e}")))?,
            Err(_) => Err(PilotError::timeout("accessibility inspection", self.detect_timeout)),
        }
    }

    async fn capture_tool(&self) -> ToolResult {
        let frame = match self.capture_screen().await {
            Ok(f) => f,
            Err(e) => return e.into(),
        };
        let info = FrameInfo::from(&frame);
        let mut payload = json!({ "frame": info });
        if self.attach_images {
            match frame.encode_jpeg(self.jpeg_quality) {
                Ok(jpeg) => {
                    payload[IMAGE_FIELD] =
                        json!(base64::engine::general_purpose::STANDARD.encode(jpeg));
                }
                Err(e) => tracing::warn!(error = %e, "screenshot not attached"),
            }
        }
        ToolResult::success_with(
            format!("Captured {}x{} frame at {}", info.width, info.height, info.captured_at.to_rfc3339()),
            payload,
        )
    }

    async fn detect_tool(&self, model: SourceModel) -> ToolResult {
        let outcome = async {
            let frame = self.capture_screen().await?;
            let elements = self.detect_elements(&frame, model).await?;
            Ok::<_, PilotError>((FrameInfo::from(&frame), elements))
        }
        .await;

        match outcome {
            Ok((info, elements)) => ToolResult::success_with(
                describe_elements(&info, model, &elements),
                json!({ "frame": info, "elements": elements }),
            ),
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "detection failed");
                ToolResult::error_with(e.to_string(), json!({ "elements": [] }))
            }
        }
    }

    async fn ui_tree_tool(&self, max_depth: u32) -> ToolResult {
        match self.inspect_ui_tree(max_depth).await {
            Ok(tree) => ToolResult::success_with(
                format!("{} elements\n{}", tree.count(), tree.render()),
                json!({ "window": tree.name.clone(), "tree": tree }),
            ),
            Err(e) => e.into(),
        }
    }

    async fn resolution_tool(&self) -> ToolResult {
        match self.screen_resolution().await {
            Ok((width, height)) => ToolResult::success_with(
                format!("Screen resolution is {width}x{height}"),
                json!({ "width": width, "height": height }),
            ),
            Err(e) => e.into(),
        }
    }
}

fn describe_elements(info: &FrameInfo, model: SourceModel, elements: &[ElementDescriptor]) -> String {
    let mut out = format!(
        "Detected {} elements with {model} on {}x{} frame",
        elements.len(),
        info.width,
        info.height
    );
    for el in elements {
        let b = el.bounding_box;
        let (cx, cy) = b.center();
        let _ = write!(
            out,
            "\n[{}] {:?} box=({}, {}, {}, {}) center=({cx}, {cy}) conf={:.2}",
            el.id, el.label, b.x, b.y, b.width, b.height, el.confidence
        );
    }
    out
}

#[async_trait]
impl ToolExecutor for VisionService {
    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        match invocation {
            ToolInvocation::CaptureScreen {} => self.capture_tool().await,
            ToolInvocation::DetectElements { model } => self.detect_tool(model).await,
            ToolInvocation::GetScreenResolution {} => self.resolution_tool().await,
            ToolInvocation::InspectUiTree { max_depth } => self.ui_tree_tool(max_depth).await,
            other => other.misrouted("vision"),
        }
    }
}

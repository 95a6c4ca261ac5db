use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::types::{RawDetection, ScreenFrame, SourceModel, UiNode};

/// Source of screen frames. Implementations block; callers run them on a
/// blocking thread.
pub trait ScreenSource: Send + Sync {
    fn capture(&self) -> PilotResult<ScreenFrame>;

    /// Size of the capture surface without grabbing pixels.
    fn resolution(&self) -> PilotResult<(u32, u32)> {
        Ok(self.capture()?.resolution())
    }
}

/// Black-box UI element detector.
///
/// Output order is whatever the detector produces; callers must not rely on it.
#[async_trait]
pub trait Detector: Send + Sync {
    fn model(&self) -> SourceModel;

    async fn detect(&self, frame: &ScreenFrame) -> PilotResult<Vec<RawDetection>>;
}

/// Accessibility tree of the window in front. Blocking, like [`ScreenSource`].
pub trait UiTreeSource: Send + Sync {
    /// Elements below `max_depth` levels under the window are left out.
    fn focused_window_tree(&self, max_depth: u32) -> PilotResult<UiNode>;
}

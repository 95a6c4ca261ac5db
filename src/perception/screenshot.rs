//! Primary-monitor capture through `xcap`.
use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::ScreenSource;
use crate::perception::types::ScreenFrame;

#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryMonitor;

impl PrimaryMonitor {
    fn monitor() -> PilotResult<xcap::Monitor> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| PilotError::Capture(format!("failed to list monitors: {e}")))?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary() {
                return Ok(monitor);
            }
            fallback.get_or_insert(monitor);
        }
        fallback.ok_or_else(|| {
            PilotError::Capture("no monitors found; is a desktop session active?".into())
        })
    }
}

impl ScreenSource for PrimaryMonitor {
    fn capture(&self) -> PilotResult<ScreenFrame> {
        let monitor = Self::monitor()?;
        let image = monitor
            .capture_image()
            .map_err(|e| PilotError::Capture(format!("screen capture failed: {e}")))?;
        tracing::debug!(width = image.width(), height = image.height(), "frame captured");
        Ok(ScreenFrame::new(image))
    }

    fn resolution(&self) -> PilotResult<(u32, u32)> {
        let monitor = Self::monitor()?;
        Ok((monitor.width(), monitor.height()))
    }
}

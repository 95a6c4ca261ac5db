use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

/// Which detector produced an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceModel {
    Omniparser,
    Yolo,
}

impl SourceModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceModel::Omniparser => "omniparser",
            SourceModel::Yolo => "yolo",
        }
    }
}

impl std::fmt::Display for SourceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel-space rectangle, always inside the frame it was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub id: String,
    pub label: String,
    pub bounding_box: BoundingBox,
    /// In [0, 1]; 1.0 when the detector did not report a score.
    pub confidence: f32,
    pub source_model: SourceModel,
}

impl ElementDescriptor {
    /// Normalize one raw detection against the frame it came from.
    ///
    /// The box is clamped into the frame; detections that collapse to zero area
    /// after clamping are dropped.
    pub fn from_raw(
        index: usize,
        raw: &RawDetection,
        model: SourceModel,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let [x1, y1, x2, y2] = raw.bbox.to_pixels(frame_width, frame_height);
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        let (x1, x2) = (x1.min(x2), x1.max(x2));
        let (y1, y2) = (y1.min(y2), y1.max(y2));

        let left = x1.clamp(0.0, frame_width as f32).round() as u32;
        let top = y1.clamp(0.0, frame_height as f32).round() as u32;
        let right = x2.clamp(0.0, frame_width as f32).round() as u32;
        let bottom = y2.clamp(0.0, frame_height as f32).round() as u32;
        if right <= left || bottom <= top {
            return None;
        }

        let confidence = match raw.confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => 1.0,
        };
        let label = raw
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("unlabeled")
            .to_string();

        Some(Self {
            id: format!("{}-{}", model.as_str(), index + 1),
            label,
            bounding_box: BoundingBox {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
            },
            confidence,
            source_model: model,
        })
    }
}

/// Box coordinates as reported by a detector, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawBox {
    /// [x1, y1, x2, y2] in frame pixels.
    Pixels([f32; 4]),
    /// [x1, y1, x2, y2] as fractions of frame width/height.
    Ratios([f32; 4]),
}

impl RawBox {
    fn to_pixels(self, width: u32, height: u32) -> [f32; 4] {
        match self {
            RawBox::Pixels(b) => b,
            RawBox::Ratios([x1, y1, x2, y2]) => {
                let (w, h) = (width as f32, height as f32);
                [x1 * w, y1 * h, x2 * w, y2 * h]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: Option<String>,
    pub bbox: RawBox,
    pub confidence: Option<f32>,
}

/// One captured screen image. Never mutated after capture.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub image: image::RgbaImage,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl ScreenFrame {
    pub fn new(image: image::RgbaImage) -> Self {
        Self {
            image,
            captured_at: chrono::Utc::now(),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        let (w, h) = self.resolution();
        w == 0 || h == 0
    }

    pub fn encode_jpeg(&self, quality: u8) -> PilotResult<Vec<u8>> {
        let rgb = image::DynamicImage::ImageRgba8(self.image.clone()).to_rgb8();
        let mut bytes = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| PilotError::Capture(format!("jpeg encode: {e}")))?;
        Ok(bytes)
    }
}

/// Summary of a frame that is safe to put in a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl From<&ScreenFrame> for FrameInfo {
    fn from(frame: &ScreenFrame) -> Self {
        let (width, height) = frame.resolution();
        Self {
            width,
            height,
            captured_at: frame.captured_at,
        }
    }
}

/// One element of an accessibility tree. `rect` is (left, top, right, bottom)
/// in screen pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiNode {
    pub control_type: String,
    pub name: String,
    pub rect: [i32; 4],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(UiNode::count).sum::<usize>()
    }

    /// Indented outline, one element per line, children below their parent.
    pub fn render(&self) -> String {
        let mut out = format!("Active Window: {:?}", self.name);
        for child in &self.children {
            child.render_into(0, &mut out);
        }
        out
    }

    fn render_into(&self, depth: usize, out: &mut String) {
        let [l, t, r, b] = self.rect;
        let _ = write!(
            out,
            "\n{}- [{}] {:?} ({l}, {t}, {r}, {b})",
            "  ".repeat(depth),
            self.control_type,
            self.name
        );
        for child in &self.children {
            child.render_into(depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bbox: RawBox, confidence: Option<f32>, label: Option<&str>) -> RawDetection {
        RawDetection {
            label: label.map(String::from),
            bbox,
            confidence,
        }
    }

    #[test]
    fn ratio_boxes_become_pixels() {
        let det = raw(RawBox::Ratios([0.1, 0.2, 0.3, 0.4]), Some(0.9), Some("OK"));
        let el = ElementDescriptor::from_raw(0, &det, SourceModel::Omniparser, 1000, 500).unwrap();
        assert_eq!(
            el.bounding_box,
            BoundingBox { x: 100, y: 100, width: 200, height: 100 }
        );
        assert_eq!(el.id, "omniparser-1");
        assert_eq!(el.label, "OK");
    }

    #[test]
    fn boxes_are_clamped_into_the_frame() {
        let det = raw(RawBox::Pixels([-20.0, -5.0, 900.0, 40.0]), None, None);
        let el = ElementDescriptor::from_raw(2, &det, SourceModel::Yolo, 800, 600).unwrap();
        assert_eq!(el.bounding_box.x, 0);
        assert_eq!(el.bounding_box.y, 0);
        assert_eq!(el.bounding_box.x + el.bounding_box.width, 800);
        assert_eq!(el.confidence, 1.0);
        assert_eq!(el.label, "unlabeled");
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        let outside = raw(RawBox::Pixels([900.0, 10.0, 950.0, 20.0]), Some(0.5), None);
        assert!(ElementDescriptor::from_raw(0, &outside, SourceModel::Yolo, 800, 600).is_none());

        let nan = raw(RawBox::Pixels([f32::NAN, 0.0, 10.0, 10.0]), Some(0.5), None);
        assert!(ElementDescriptor::from_raw(0, &nan, SourceModel::Yolo, 800, 600).is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let det = raw(RawBox::Pixels([0.0, 0.0, 10.0, 10.0]), Some(1.7), Some("x"));
        let el = ElementDescriptor::from_raw(0, &det, SourceModel::Yolo, 100, 100).unwrap();
        assert_eq!(el.confidence, 1.0);
    }

    #[test]
    fn ui_tree_renders_as_an_indented_outline() {
        let leaf = |kind: &str, name: &str, rect| UiNode {
            control_type: kind.into(),
            name: name.into(),
            rect,
            children: vec![],
        };
        let tree = UiNode {
            control_type: "Window".into(),
            name: "Untitled - Notepad".into(),
            rect: [0, 0, 800, 600],
            children: vec![UiNode {
                children: vec![leaf("MenuItem", "File", [5, 30, 40, 50])],
                ..leaf("MenuBar", "Application", [0, 30, 800, 50])
            }],
        };
        assert_eq!(tree.count(), 3);
        let lines: Vec<String> = tree.render().lines().map(String::from).collect();
        assert_eq!(
            lines,
            vec![
                r#"Active Window: "Untitled - Notepad""#,
                r#"- [MenuBar] "Application" (0, 30, 800, 50)"#,
                r#"  - [MenuItem] "File" (5, 30, 40, 50)"#,
            ]
        );
    }
}

/// ONNX YOLOv8 inference for UI element detection.
///
/// The session is shared behind a mutex and driven from a blocking thread,
/// since inference is CPU bound and `Session::run` needs exclusive access.
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::Detector;
use crate::perception::types::{RawBox, RawDetection, ScreenFrame, SourceModel};

const INPUT_SIZE: u32 = 640;

#[derive(Debug, Clone)]
struct Candidate {
    /// [x1, y1, x2, y2] in original frame pixels.
    bbox: [f32; 4],
    confidence: f32,
    class_id: usize,
}

/// Letterbox geometry used to map model space back to frame pixels.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

pub struct YoloDetector {
    session: Arc<Mutex<Session>>,
    conf_threshold: f32,
    iou_threshold: f32,
    class_names: Arc<Vec<String>>,
}

impl YoloDetector {
    pub fn load(
        model_path: &str,
        conf_threshold: f32,
        iou_threshold: f32,
        class_names: Vec<String>,
    ) -> PilotResult<Self> {
        if !Path::new(model_path).exists() {
            return Err(PilotError::Config(format!("YOLO model not found at {model_path}")));
        }
        let session = Session::builder()
            .map_err(|e| PilotError::Detection(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PilotError::Detection(format!("ort opt-level: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| PilotError::Detection(format!("ort load model: {e}")))?;
        tracing::info!(path = %model_path, "YOLO detector loaded");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            conf_threshold,
            iou_threshold,
            class_names: Arc::new(class_names),
        })
    }

    fn infer(
        session: &Mutex<Session>,
        image: &image::RgbaImage,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> PilotResult<Vec<Candidate>> {
        let (orig_w, orig_h) = image.dimensions();
        let (input, letterbox) = preprocess(image);

        let input_value = Tensor::from_array(input)
            .map_err(|e| PilotError::Detection(format!("ort tensor: {e}")))?;

        let output = {
            let mut session = session
                .lock()
                .map_err(|_| PilotError::Detection("YOLO session lock poisoned".into()))?;
            let outputs = session
                .run(ort::inputs![input_value])
                .map_err(|e| PilotError::Detection(format!("ort run: {e}")))?;
            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| PilotError::Detection(format!("extract tensor: {e}")))?
                .to_owned()
        };

        let candidates = decode(&output.view(), letterbox, orig_w, orig_h, conf_threshold)?;
        let kept = nms(&candidates, iou_threshold);
        Ok(kept.into_iter().map(|i| candidates[i].clone()).collect())
    }
}

#[async_trait]
impl Detector for YoloDetector {
    fn model(&self) -> SourceModel {
        SourceModel::Yolo
    }

    async fn detect(&self, frame: &ScreenFrame) -> PilotResult<Vec<RawDetection>> {
        let session = self.session.clone();
        let image = frame.image.clone();
        let (conf, iou) = (self.conf_threshold, self.iou_threshold);

        let candidates = tokio::task::spawn_blocking(move || Self::infer(&session, &image, conf, iou))
            .await
            .map_err(|e| PilotError::Detection(format!("join: {e}")))??;

        Ok(candidates
            .into_iter()
            .map(|c| RawDetection {
                label: self.class_names.get(c.class_id).cloned(),
                bbox: RawBox::Pixels(c.bbox),
                confidence: Some(c.confidence),
            })
            .collect())
    }
}

// ── Pre-processing ──────────────────────────────────────────────────────────

/// Resize + letterbox + normalise → NCHW f32 tensor.
fn preprocess(img: &image::RgbaImage) -> (Array4<f32>, Letterbox) {
    let sz = INPUT_SIZE;
    let (ow, oh) = (img.width() as f32, img.height() as f32);
    let scale = (sz as f32 / ow).min(sz as f32 / oh);
    let nw = ((ow * scale).round() as u32).max(1);
    let nh = ((oh * scale).round() as u32).max(1);
    let pad_x = (sz - nw) as f32 / 2.0;
    let pad_y = (sz - nh) as f32 / 2.0;

    let rgb = image::DynamicImage::ImageRgba8(img.clone())
        .resize_exact(nw, nh, image::imageops::FilterType::CatmullRom)
        .to_rgb8();

    let mut canvas = image::RgbImage::from_pixel(sz, sz, image::Rgb([114, 114, 114]));
    image::imageops::overlay(&mut canvas, &rgb, pad_x.round() as i64, pad_y.round() as i64);

    let mut tensor = Array4::<f32>::zeros((1, 3, sz as usize, sz as usize));
    for (x, y, p) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = p[c] as f32 / 255.0;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

// ── Post-processing ─────────────────────────────────────────────────────────

/// YOLOv8 output layout: [1, 4 + num_classes, num_proposals].
fn decode(
    output: &ndarray::ArrayViewD<f32>,
    lb: Letterbox,
    orig_w: u32,
    orig_h: u32,
    conf_threshold: f32,
) -> PilotResult<Vec<Candidate>> {
    let shape = output.shape();
    if shape.len() < 3 || shape[1] <= 4 {
        return Err(PilotError::Detection(format!("unexpected output shape: {shape:?}")));
    }
    let num_classes = shape[1] - 4;
    let mut out = Vec::new();

    for i in 0..shape[2] {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, output[[0, 4 + c, i]]))
            .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < conf_threshold {
            continue;
        }

        let (cx, cy) = (output[[0, 0, i]], output[[0, 1, i]]);
        let (w, h) = (output[[0, 2, i]], output[[0, 3, i]]);
        let unpad = |v: f32, pad: f32, max: u32| ((v - pad) / lb.scale).clamp(0.0, max as f32);

        out.push(Candidate {
            bbox: [
                unpad(cx - w / 2.0, lb.pad_x, orig_w),
                unpad(cy - h / 2.0, lb.pad_y, orig_h),
                unpad(cx + w / 2.0, lb.pad_x, orig_w),
                unpad(cy + h / 2.0, lb.pad_y, orig_h),
            ],
            confidence: score,
            class_id,
        });
    }
    Ok(out)
}

/// Greedy per-class NMS. Returned indices are in descending confidence.
fn nms(dets: &[Candidate], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dets.len()).collect();
    order.sort_by(|&a, &b| dets[b].confidence.total_cmp(&dets[a].confidence));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];
    for &i in &order {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order {
            if !suppressed[j]
                && i != j
                && dets[i].class_id == dets[j].class_id
                && iou(&dets[i].bbox, &dets[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0) * (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Class list of the single-class GUI icon detector.
pub fn default_ui_class_names() -> Vec<String> {
    vec!["icon".to_string()]
}

//! Remote OmniParser detector.
//!
//! The frame is uploaded as a JPEG multipart field named `image` to
//! `<base_url>/analyze`; the service answers with a list of parsed elements.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::Detector;
use crate::perception::types::{RawBox, RawDetection, ScreenFrame, SourceModel};

/// Unit of the boxes an OmniParser deployment returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxUnits {
    /// Ratios when every coordinate is at most 1.0, pixels otherwise. A pixel
    /// box hugging the top-left corner (e.g. `[0, 0, 1, 1]`) is misread as a
    /// ratio box; pin the unit when the deployment is known.
    #[default]
    Auto,
    Ratios,
    Pixels,
}

pub struct OmniParserDetector {
    endpoint: String,
    jpeg_quality: u8,
    box_units: BoxUnits,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    elements: Vec<ParsedElement>,
}

#[derive(Debug, Deserialize)]
struct ParsedElement {
    #[serde(default, alias = "content")]
    label: Option<String>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    bbox: [f32; 4],
    #[serde(default, alias = "score")]
    confidence: Option<f32>,
}

impl OmniParserDetector {
    pub fn new(base_url: &str, jpeg_quality: u8, request_timeout: Duration) -> PilotResult<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            endpoint: format!("{}/analyze", base_url.trim_end_matches('/')),
            jpeg_quality,
            box_units: BoxUnits::Auto,
            client,
        })
    }

    pub fn with_box_units(mut self, units: BoxUnits) -> Self {
        self.box_units = units;
        self
    }
}

#[async_trait]
impl Detector for OmniParserDetector {
    fn model(&self) -> SourceModel {
        SourceModel::Omniparser
    }

    async fn detect(&self, frame: &ScreenFrame) -> PilotResult<Vec<RawDetection>> {
        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;
        tracing::debug!(endpoint = %self.endpoint, bytes = jpeg.len(), "uploading frame to OmniParser");

        let part = reqwest::multipart::Part::bytes(jpeg)
            .file_name("screen.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    PilotError::Detection(format!(
                        "could not connect to OmniParser at {}: {e}",
                        self.endpoint
                    ))
                } else {
                    PilotError::Detection(format!("OmniParser request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PilotError::Detection(format!("OmniParser returned {status}: {body}")));
        }

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| PilotError::Detection(format!("unusable OmniParser response: {e}")))?;

        Ok(body.elements.into_iter().map(|el| to_raw(el, self.box_units)).collect())
    }
}

/// OmniParser reports ratio boxes; some deployments return pixels instead.
fn to_raw(el: ParsedElement, units: BoxUnits) -> RawDetection {
    let ratios = match units {
        BoxUnits::Ratios => true,
        BoxUnits::Pixels => false,
        BoxUnits::Auto => el.bbox.iter().all(|v| *v <= 1.0),
    };
    let bbox = if ratios { RawBox::Ratios(el.bbox) } else { RawBox::Pixels(el.bbox) };
    let label = match (el.label, el.kind) {
        (Some(l), _) if !l.trim().is_empty() => Some(l),
        (_, kind) => kind,
    };
    RawDetection {
        label,
        bbox,
        confidence: el.confidence,
    }
}

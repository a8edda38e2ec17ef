pub mod precondition;

use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat};
use reqwest::Client as HttpClient;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Detector returned status {0}")]
    Status(u16),
    #[error("Frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Frame encoding task failed: {0}")]
    Worker(String),
    #[error("Unexpected detector response: {0}")]
    InvalidResponse(String),
}

/// Axis-aligned face box in pixel coordinates with its detection score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl FaceRegion {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &FaceRegion) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }
}

/// Drops regions below `confidence_threshold`, then applies greedy non-maximum
/// suppression at `nms_iou_threshold`. Output is ordered by descending score.
pub fn filter_regions(
    mut regions: Vec<FaceRegion>,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
) -> Vec<FaceRegion> {
    regions.retain(|r| r.score >= confidence_threshold && r.area() > 0.0);
    regions.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<FaceRegion> = Vec::with_capacity(regions.len());
    for candidate in regions {
        if kept.iter().all(|k| k.iou(&candidate) <= nms_iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// External face detector. An empty result means no face.
pub trait FaceDetector: Send + Sync {
    fn detect(
        &self,
        frame: Arc<DynamicImage>,
    ) -> BoxFuture<'_, Result<Vec<FaceRegion>, DetectorError>>;
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub endpoint: Url,
    /// Local weights path forwarded to the detector service, overriding its
    /// default checkpoint location.
    pub checkpoint: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
}

/// Client for a detector service exposing `POST /detect`.
#[derive(Clone)]
pub struct RemoteFaceDetector {
    http_client: HttpClient,
    settings: DetectorSettings,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectorReply {
    Wrapped { boxes: Vec<RawBox> },
    Bare(Vec<RawBox>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBox {
    Region(FaceRegion),
    Coords(Vec<f32>),
}

impl RemoteFaceDetector {
    pub fn new(http_client: HttpClient, settings: DetectorSettings) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    fn detect_url(&self) -> String {
        format!("{}/detect", self.settings.endpoint.as_str().trim_end_matches('/'))
    }

    async fn detect_remote(
        &self,
        frame: Arc<DynamicImage>,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        let png = tokio::task::spawn_blocking(move || encode_png(&frame))
            .await
            .map_err(|e| DetectorError::Worker(e.to_string()))??;

        let file = Part::bytes(png).file_name("frame.png").mime_str("image/png")?;
        let mut form = Form::new()
            .part("file", file)
            .text(
                "confidence_threshold",
                self.settings.confidence_threshold.to_string(),
            )
            .text("nms_iou_threshold", self.settings.nms_iou_threshold.to_string());
        if let Some(checkpoint) = &self.settings.checkpoint {
            form = form.text("checkpoint", checkpoint.display().to_string());
        }

        let response = self
            .http_client
            .post(self.detect_url())
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DetectorError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        parse_detector_reply(&body)
    }
}

impl FaceDetector for RemoteFaceDetector {
    fn detect(
        &self,
        frame: Arc<DynamicImage>,
    ) -> BoxFuture<'_, Result<Vec<FaceRegion>, DetectorError>> {
        Box::pin(self.detect_remote(frame))
    }
}

fn encode_png(frame: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut png = Vec::new();
    frame.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

fn parse_detector_reply(body: &[u8]) -> Result<Vec<FaceRegion>, DetectorError> {
    let reply: DetectorReply = serde_json::from_slice(body)
        .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
    let raw = match reply {
        DetectorReply::Wrapped { boxes } => boxes,
        DetectorReply::Bare(boxes) => boxes,
    };

    raw.into_iter()
        .map(|b| match b {
            RawBox::Region(region) => Ok(region),
            RawBox::Coords(c) if c.len() >= 4 => Ok(FaceRegion {
                x1: c[0],
                y1: c[1],
                x2: c[2],
                y2: c[3],
                // Detectors that return bare boxes have already thresholded them.
                score: c.get(4).copied().unwrap_or(1.0),
            }),
            RawBox::Coords(c) => Err(DetectorError::InvalidResponse(format!(
                "box with {} coordinates",
                c.len()
            ))),
        })
        .collect()
}

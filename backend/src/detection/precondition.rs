use image::DynamicImage;
use shared::MediaKind;
use std::sync::Arc;
use std::time::Duration;

use super::{DetectorError, FaceDetector, filter_regions};
use crate::media::asset::UploadedAsset;
use crate::media::frames::{FrameError, FrameGrabber};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Unreadable media: {0}")]
    Unreadable(String),
    #[error("No face detected")]
    NoFace,
    #[error("Face detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Frame extraction error: {0}")]
    Frames(#[from] FrameError),
}

/// How the gate samples and filters. Video is checked on `sample_frames` stills
/// taken every `sample_interval` from the start, so with the default of one
/// frame a face that only appears later in the clip is rejected.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub sample_frames: u32,
    pub sample_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePass {
    pub faces: usize,
    pub frames_checked: u32,
}

/// Confirms an image or video shows at least one face before inference is spent on it.
#[derive(Clone)]
pub struct PreconditionValidator {
    detector: Arc<dyn FaceDetector>,
    frames: Arc<dyn FrameGrabber>,
    policy: GatePolicy,
}

impl PreconditionValidator {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        frames: Arc<dyn FrameGrabber>,
        policy: GatePolicy,
    ) -> Self {
        Self {
            detector,
            frames,
            policy,
        }
    }

    pub async fn check(
        &self,
        asset: &UploadedAsset,
        kind: MediaKind,
    ) -> Result<GatePass, GateError> {
        match kind {
            MediaKind::Image => self.check_image(asset.shared_bytes()).await,
            MediaKind::Video => self.check_video(asset).await,
            MediaKind::Audio => Ok(GatePass {
                faces: 0,
                frames_checked: 0,
            }),
        }
    }

    async fn check_image(&self, bytes: Arc<Vec<u8>>) -> Result<GatePass, GateError> {
        let frame = decode(bytes)
            .await
            .map_err(|e| GateError::Unreadable(format!("cannot decode image: {}", e)))?;
        let faces = self.faces_in(frame).await?;
        if faces == 0 {
            return Err(GateError::NoFace);
        }
        Ok(GatePass {
            faces,
            frames_checked: 1,
        })
    }

    async fn check_video(&self, asset: &UploadedAsset) -> Result<GatePass, GateError> {
        let mut decoded = 0u32;

        for index in 0..self.policy.sample_frames {
            let at = self.policy.sample_interval * index;
            let encoded = match self.frames.grab(asset.path(), at).await {
                Ok(encoded) => encoded,
                Err(FrameError::Missing { reason, .. }) => {
                    log::debug!("Gate frame {} at {:?} unavailable: {}", index, at, reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let frame = match decode(Arc::new(encoded)).await {
                Ok(frame) => frame,
                Err(e) => {
                    log::debug!("Gate frame {} at {:?} undecodable: {}", index, at, e);
                    continue;
                }
            };
            decoded += 1;

            let faces = self.faces_in(frame).await?;
            if faces > 0 {
                return Ok(GatePass {
                    faces,
                    frames_checked: decoded,
                });
            }
        }

        if decoded == 0 {
            return Err(GateError::Unreadable("cannot extract a video frame".into()));
        }
        Err(GateError::NoFace)
    }

    async fn faces_in(&self, frame: DynamicImage) -> Result<usize, GateError> {
        let regions = self.detector.detect(Arc::new(frame)).await?;
        let kept = filter_regions(
            regions,
            self.policy.confidence_threshold,
            self.policy.nms_iou_threshold,
        );
        Ok(kept.len())
    }
}

/// Decodes on the blocking pool.
async fn decode(bytes: Arc<Vec<u8>>) -> Result<DynamicImage, String> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| format!("decoder task failed: {}", e))?
        .map_err(|e| e.to_string())
}

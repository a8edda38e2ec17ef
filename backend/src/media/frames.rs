use futures::future::BoxFuture;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The grabber itself could not run; not a property of the media.
    #[error("Failed to launch frame grabber: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("No frame at {at:?}: {reason}")]
    Missing { at: Duration, reason: String },
}

/// Pulls single encoded still frames out of a video container.
pub trait FrameGrabber: Send + Sync {
    fn grab<'a>(
        &'a self,
        video: &'a Path,
        at: Duration,
    ) -> BoxFuture<'a, Result<Vec<u8>, FrameError>>;
}

#[derive(Debug, Clone)]
pub struct FfmpegFrameGrabber {
    ffmpeg: String,
    time_limit: Duration,
}

impl FfmpegFrameGrabber {
    pub fn new(ffmpeg: impl Into<String>, time_limit: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            time_limit,
        }
    }

    async fn grab_png(&self, video: &Path, at: Duration) -> Result<Vec<u8>, FrameError> {
        let grab = Command::new(&self.ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", at.as_secs_f64()))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(self.time_limit, grab)
            .await
            .map_err(|_| FrameError::Missing {
                at,
                reason: format!("ffmpeg timed out after {:?}", self.time_limit),
            })?
            .map_err(FrameError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FrameError::Missing {
                at,
                reason: format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            });
        }
        if output.stdout.is_empty() {
            return Err(FrameError::Missing {
                at,
                reason: "no frame decoded".into(),
            });
        }
        Ok(output.stdout)
    }
}

impl FrameGrabber for FfmpegFrameGrabber {
    fn grab<'a>(
        &'a self,
        video: &'a Path,
        at: Duration,
    ) -> BoxFuture<'a, Result<Vec<u8>, FrameError>> {
        Box::pin(self.grab_png(video, at))
    }
}

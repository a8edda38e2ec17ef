use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Outcome of pulling the audio track out of a video. Only `Extracted` yields
/// a usable file; both other outcomes mean "audio absent", never a request failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioTrack {
    Extracted,
    NoAudioStream,
    Failed(String),
}

/// Writes a mono 16 kHz PCM WAV of `source`'s audio track to `target`.
pub trait AudioExtractor: Send + Sync {
    fn extract<'a>(&'a self, source: &'a Path, target: &'a Path) -> BoxFuture<'a, AudioTrack>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

/// Each tool invocation is bounded by `time_limit`; an expired run is killed.
#[derive(Debug, Clone)]
pub struct FfmpegAudioExtractor {
    ffmpeg: String,
    ffprobe: String,
    time_limit: Duration,
}

impl FfmpegAudioExtractor {
    pub fn new(
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        time_limit: Duration,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            time_limit,
        }
    }

    async fn has_audio_stream(&self, source: &Path) -> Result<bool, String> {
        let probe = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_streams", "-of", "json"])
            .arg(source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(self.time_limit, probe)
            .await
            .map_err(|_| format!("ffprobe timed out after {:?}", self.time_limit))?
            .map_err(|e| format!("ffprobe could not run: {}", e))?;

        if !output.status.success() {
            return Err(format!("ffprobe exited with {}", output.status));
        }
        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("unreadable ffprobe output: {}", e))?;
        Ok(has_audio(&probe))
    }

    async fn run(&self, source: &Path, target: &Path) -> AudioTrack {
        match self.has_audio_stream(source).await {
            Ok(true) => {}
            Ok(false) => return AudioTrack::NoAudioStream,
            Err(reason) => return AudioTrack::Failed(reason),
        }

        let extraction = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-i"])
            .arg(source)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match timeout(self.time_limit, extraction).await {
            Ok(Ok(status)) if status.success() && target.exists() => AudioTrack::Extracted,
            Ok(Ok(status)) => AudioTrack::Failed(format!("ffmpeg exited with {}", status)),
            Ok(Err(e)) => AudioTrack::Failed(format!("ffmpeg could not run: {}", e)),
            Err(_) => AudioTrack::Failed(format!("ffmpeg timed out after {:?}", self.time_limit)),
        }
    }
}

impl AudioExtractor for FfmpegAudioExtractor {
    fn extract<'a>(&'a self, source: &'a Path, target: &'a Path) -> BoxFuture<'a, AudioTrack> {
        Box::pin(self.run(source, target))
    }
}

fn has_audio(probe: &ProbeOutput) -> bool {
    probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_detects_audio_stream() {
        let probe: ProbeOutput = serde_json::from_str(
            r#"{"streams":[{"index":0,"codec_type":"video"},{"index":1,"codec_type":"audio"}]}"#,
        )
        .unwrap();
        assert!(has_audio(&probe));

        let muted: ProbeOutput =
            serde_json::from_str(r#"{"streams":[{"index":0,"codec_type":"video"}]}"#).unwrap();
        assert!(!has_audio(&muted));

        let empty: ProbeOutput = serde_json::from_str("{}").unwrap();
        assert!(!has_audio(&empty));
    }

    #[actix_web::test]
    async fn missing_tools_degrade_to_absent_audio() {
        let extractor = FfmpegAudioExtractor::new(
            "/nonexistent/ffmpeg",
            "/nonexistent/ffprobe",
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        let track = extractor
            .extract(&dir.path().join("in.mp4"), &dir.path().join("out.wav"))
            .await;
        assert!(matches!(track, AudioTrack::Failed(_)));
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn stalled_probe_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let stalled = crate::testing::stalled_tool(dir.path());
        let extractor = FfmpegAudioExtractor::new(
            "/nonexistent/ffmpeg",
            stalled.to_string_lossy(),
            Duration::from_millis(200),
        );

        let started = std::time::Instant::now();
        let track = extractor
            .extract(&dir.path().join("in.mp4"), &dir.path().join("out.wav"))
            .await;

        match track {
            AudioTrack::Failed(reason) => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected a failed extraction, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

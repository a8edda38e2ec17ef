use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::inference::dispatcher::BackendEndpoints;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Invalid URL for {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub backends: BackendUrls,
    pub backend_timeout_secs: u64,
    pub audio_extensions: Vec<String>,
    pub detector: DetectorConfig,
    pub gate: GateConfig,
    pub video_sample_fps: u32,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendUrls {
    pub image: String,
    pub audio: String,
    pub video: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub url: String,
    /// Local weights the detector loads instead of fetching its default checkpoint.
    pub checkpoint: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
}

/// Frame sampling for the face gate. Independent from `video_sample_fps`,
/// which only governs the video backend's own inference sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub sample_frames: u32,
    pub sample_interval_secs: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 200 * 1024 * 1024,
            backends: BackendUrls::default(),
            backend_timeout_secs: 30,
            audio_extensions: vec![".wav".into(), ".mp3".into(), ".flac".into()],
            detector: DetectorConfig::default(),
            gate: GateConfig::default(),
            video_sample_fps: 1,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl Default for BackendUrls {
    fn default() -> Self {
        Self {
            image: "http://image_service:8001".to_string(),
            audio: "http://audio_service:8003".to_string(),
            video: "http://video_service:8002".to_string(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8010".to_string(),
            checkpoint: None,
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.3,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sample_frames: 1,
            sample_interval_secs: 1.0,
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file named by `ROUTER_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROUTER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_value("PORT", &v)?;
        }
        if let Some(v) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = lookup("IMAGE_BACKEND_URL") {
            self.backends.image = v;
        }
        if let Some(v) = lookup("AUDIO_BACKEND_URL") {
            self.backends.audio = v;
        }
        if let Some(v) = lookup("VIDEO_BACKEND_URL") {
            self.backends.video = v;
        }
        if let Some(v) = lookup("BACKEND_TIMEOUT_SECS") {
            self.backend_timeout_secs = parse_value("BACKEND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("AUDIO_EXTENSIONS") {
            self.audio_extensions = v
                .split(',')
                .map(str::trim)
                .filter(|ext| !ext.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("FACE_DETECTOR_URL") {
            self.detector.url = v;
        }
        if let Some(v) = lookup("FACE_DETECTOR_CHECKPOINT") {
            self.detector.checkpoint = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACE_CONFIDENCE_THRESHOLD") {
            self.detector.confidence_threshold = parse_value("FACE_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FACE_NMS_IOU_THRESHOLD") {
            self.detector.nms_iou_threshold = parse_value("FACE_NMS_IOU_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("GATE_SAMPLE_FRAMES") {
            self.gate.sample_frames = parse_value("GATE_SAMPLE_FRAMES", &v)?;
        }
        if let Some(v) = lookup("GATE_SAMPLE_INTERVAL_SECS") {
            self.gate.sample_interval_secs = parse_value("GATE_SAMPLE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("VIDEO_SAMPLE_FPS") {
            self.video_sample_fps = parse_value("VIDEO_SAMPLE_FPS", &v)?;
        }
        if let Some(v) = lookup("FFMPEG_BIN") {
            self.ffmpeg_bin = v;
        }
        if let Some(v) = lookup("FFPROBE_BIN") {
            self.ffprobe_bin = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_endpoints()?;
        self.detector_url()?;

        if self.backend_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "BACKEND_TIMEOUT_SECS",
                reason: "must be at least 1 second".into(),
            });
        }
        if self.audio_extensions.is_empty() {
            return Err(ConfigError::OutOfRange {
                key: "AUDIO_EXTENSIONS",
                reason: "at least one extension is required".into(),
            });
        }
        for (key, value) in [
            ("FACE_CONFIDENCE_THRESHOLD", self.detector.confidence_threshold),
            ("FACE_NMS_IOU_THRESHOLD", self.detector.nms_iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    key,
                    reason: format!("{} is not within [0, 1]", value),
                });
            }
        }
        if self.gate.sample_frames == 0 {
            return Err(ConfigError::OutOfRange {
                key: "GATE_SAMPLE_FRAMES",
                reason: "must sample at least one frame".into(),
            });
        }
        if !self.gate.sample_interval_secs.is_finite() || self.gate.sample_interval_secs < 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "GATE_SAMPLE_INTERVAL_SECS",
                reason: format!("{} is not a valid interval", self.gate.sample_interval_secs),
            });
        }
        if self.video_sample_fps == 0 {
            return Err(ConfigError::OutOfRange {
                key: "VIDEO_SAMPLE_FPS",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn gate_sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.gate.sample_interval_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_endpoints(&self) -> Result<BackendEndpoints, ConfigError> {
        Ok(BackendEndpoints {
            image: parse_url("IMAGE_BACKEND_URL", &self.backends.image)?,
            audio: parse_url("AUDIO_BACKEND_URL", &self.backends.audio)?,
            video: parse_url("VIDEO_BACKEND_URL", &self.backends.video)?,
        })
    }

    pub fn detector_url(&self) -> Result<Url, ConfigError> {
        parse_url("FACE_DETECTOR_URL", &self.detector.url)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { key, source })
}

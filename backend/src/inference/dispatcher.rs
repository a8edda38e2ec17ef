use reqwest::Client as HttpClient;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use shared::MediaKind;
use std::fmt;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct BackendEndpoints {
    pub image: Url,
    pub audio: Url,
    pub video: Url,
}

impl BackendEndpoints {
    pub fn base(&self, modality: MediaKind) -> &Url {
        match modality {
            MediaKind::Image => &self.image,
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn predict_url(&self, modality: MediaKind) -> String {
        join(self.base(modality), &format!("predict_{}", modality))
    }

    pub fn health_url(&self, modality: MediaKind) -> String {
        join(self.base(modality), "healthz")
    }
}

fn join(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// Why a backend call produced no usable response.
#[derive(Debug, Clone, PartialEq)]
pub enum Unavailability {
    Status(u16),
    Timeout,
    /// Connection-level failure. The message is for logs only.
    Transport(String),
}

impl fmt::Display for Unavailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailability::Status(code) => write!(f, "status {}", code),
            Unavailability::Timeout => write!(f, "timed out"),
            Unavailability::Transport(_) => write!(f, "connection failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{modality} backend unavailable: {cause}")]
    Unavailable {
        modality: MediaKind,
        cause: Unavailability,
    },
    #[error("{modality} backend returned a malformed body: {detail}")]
    ContractViolation { modality: MediaKind, detail: String },
}

impl DispatchError {
    fn from_transport(modality: MediaKind, err: reqwest::Error) -> Self {
        let cause = if err.is_timeout() {
            Unavailability::Timeout
        } else {
            Unavailability::Transport(err.to_string())
        };
        DispatchError::Unavailable { modality, cause }
    }
}

/// The upload handed to a backend.
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    status: String,
}

/// Transport adapter for the three inference backends. One attempt per call,
/// bounded by the client timeout; no retries.
#[derive(Clone)]
pub struct BackendDispatcher {
    http_client: HttpClient,
    endpoints: BackendEndpoints,
    video_sample_fps: u32,
}

impl BackendDispatcher {
    pub fn new(
        endpoints: BackendEndpoints,
        timeout: Duration,
        video_sample_fps: u32,
    ) -> Result<Self, reqwest::Error> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            endpoints,
            video_sample_fps,
        })
    }

    pub async fn dispatch(
        &self,
        modality: MediaKind,
        payload: Payload,
    ) -> Result<Value, DispatchError> {
        let file = Part::bytes(payload.bytes)
            .file_name(payload.filename)
            .mime_str(&payload.content_type)
            .map_err(|e| DispatchError::from_transport(modality, e))?;
        let mut form = Form::new().part("file", file);
        if modality == MediaKind::Video {
            form = form.text("sample_fps", self.video_sample_fps.to_string());
        }

        let url = self.endpoints.predict_url(modality);
        log::debug!("Dispatching {} payload to {}", modality, url);

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DispatchError::from_transport(modality, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Unavailable {
                modality,
                cause: Unavailability::Status(status.as_u16()),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::from_transport(modality, e))?;
        let value: Value =
            serde_json::from_slice(&body).map_err(|e| DispatchError::ContractViolation {
                modality,
                detail: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(DispatchError::ContractViolation {
                modality,
                detail: "expected a JSON object".into(),
            });
        }
        Ok(value)
    }

    /// Liveness probe against the backend's `/healthz`.
    pub async fn probe(&self, modality: MediaKind) -> bool {
        let url = self.endpoints.health_url(modality);
        let response = match self.http_client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                log::warn!("{} backend health check returned {}", modality, response.status());
                return false;
            }
            Err(e) => {
                log::warn!("{} backend health check failed: {}", modality, e);
                return false;
            }
        };
        match response.json::<HealthReply>().await {
            Ok(reply) => reply.status == "ok",
            Err(e) => {
                log::warn!("{} backend health reply unreadable: {}", modality, e);
                false
            }
        }
    }
}

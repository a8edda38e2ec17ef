use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};

/// Canonical media kind, derived once per request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Label {
    Real,
    Fake,
}

impl Label {
    pub fn inverted(self) -> Self {
        match self {
            Label::Real => Label::Fake,
            Label::Fake => Label::Real,
        }
    }
}

/// Normalized per-modality verdict. `confidence` is the probability of `label`,
/// whatever orientation the producing backend used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    label: Label,
    confidence: f64,
    modality: MediaKind,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Verdict {
    /// Returns `None` when `confidence` is not a probability.
    pub fn new(label: Label, confidence: f64, modality: MediaKind) -> Option<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return None;
        }
        Some(Self {
            label,
            confidence,
            modality,
            extra: Map::new(),
        })
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn modality(&self) -> MediaKind {
        self.modality
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Fused video decision. `audio` is `None` when no usable audio signal existed,
/// which is a normal outcome and not a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    #[serde(rename = "final")]
    pub final_label: Label,
    pub video: Verdict,
    pub audio: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "file_type", content = "prediction", rename_all = "lowercase")]
pub enum RouteResponse {
    Image(Verdict),
    Audio(Verdict),
    Video(EnsembleResult),
}

impl RouteResponse {
    pub fn file_type(&self) -> MediaKind {
        match self {
            RouteResponse::Image(_) => MediaKind::Image,
            RouteResponse::Audio(_) => MediaKind::Audio,
            RouteResponse::Video(_) => MediaKind::Video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendsHealth {
    pub status: String,
    pub backends: std::collections::BTreeMap<MediaKind, String>,
}

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use shared::{ErrorResponse, MediaKind};

use crate::detection::precondition::GateError;
use crate::inference::dispatcher::{DispatchError, Unavailability};
use crate::inference::normalizer::UnrecognizedSchema;
use crate::media::asset::AssetError;
use crate::media::classifier::UnsupportedMediaType;
use crate::media::frames::FrameError;

/// Terminal failure of a routing request.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    UnsupportedMediaType(#[from] UnsupportedMediaType),
    #[error("Unreadable media: {0}")]
    UnreadableMedia(String),
    #[error("No face detected")]
    NoFaceDetected,
    #[error("Request carries no file upload")]
    MissingUpload,
    #[error("Malformed multipart body: {0}")]
    MalformedUpload(String),
    #[error("Upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("Face detector unavailable: {0}")]
    FaceDetectorUnavailable(String),
    #[error("{modality} backend unavailable: {cause}")]
    BackendUnavailable {
        modality: MediaKind,
        cause: Unavailability,
    },
    #[error("{modality} backend violated its response contract: {detail}")]
    BackendContractViolation { modality: MediaKind, detail: String },
    #[error("{modality} backend response has an unrecognized schema: {detail}")]
    UnrecognizedBackendSchema { modality: MediaKind, detail: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouteError {
    /// Stable machine-parseable reason sent to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            RouteError::UnsupportedMediaType(_) => "unsupported_media_type",
            RouteError::UnreadableMedia(_) => "unreadable_media",
            RouteError::NoFaceDetected => "no_face_detected",
            RouteError::MissingUpload => "missing_upload",
            RouteError::MalformedUpload(_) => "malformed_upload",
            RouteError::PayloadTooLarge { .. } => "payload_too_large",
            RouteError::FaceDetectorUnavailable(_) => "face_detector_unavailable",
            RouteError::BackendUnavailable { .. } => "backend_unavailable",
            RouteError::BackendContractViolation { .. } => "backend_contract_violation",
            RouteError::UnrecognizedBackendSchema { .. } => "unrecognized_backend_schema",
            RouteError::Internal(_) => "internal_error",
        }
    }

    /// Short client-facing description. Never includes paths, URLs or
    /// internal error chains.
    pub fn client_detail(&self) -> String {
        match self {
            RouteError::UnsupportedMediaType(e) => format!(
                "content-type {:?} with extension {:?} is not image, video or audio",
                e.content_type, e.extension
            ),
            RouteError::UnreadableMedia(_) => "media could not be decoded".to_string(),
            RouteError::FaceDetectorUnavailable(_) => "face detector unavailable".to_string(),
            RouteError::BackendContractViolation { modality, .. } => {
                format!("{} backend returned a malformed body", modality)
            }
            RouteError::UnrecognizedBackendSchema { modality, .. } => {
                format!("{} backend returned an unrecognized verdict", modality)
            }
            RouteError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn log_message(&self, request_id: &uuid::Uuid) -> String {
        format!("[{}] request failed ({}): {}", request_id, self.reason(), self)
    }
}

impl ResponseError for RouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            RouteError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RouteError::UnreadableMedia(_)
            | RouteError::NoFaceDetected
            | RouteError::MissingUpload
            | RouteError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            RouteError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RouteError::FaceDetectorUnavailable(_)
            | RouteError::BackendUnavailable { .. }
            | RouteError::BackendContractViolation { .. }
            | RouteError::UnrecognizedBackendSchema { .. } => StatusCode::BAD_GATEWAY,
            RouteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.reason().to_string(),
            detail: self.client_detail(),
        })
    }
}

impl From<DispatchError> for RouteError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Unavailable { modality, cause } => {
                RouteError::BackendUnavailable { modality, cause }
            }
            DispatchError::ContractViolation { modality, detail } => {
                RouteError::BackendContractViolation { modality, detail }
            }
        }
    }
}

impl From<UnrecognizedSchema> for RouteError {
    fn from(err: UnrecognizedSchema) -> Self {
        RouteError::UnrecognizedBackendSchema {
            modality: err.modality,
            detail: format!("{} ({})", err.detail, err.contract),
        }
    }
}

impl From<GateError> for RouteError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Unreadable(detail) => RouteError::UnreadableMedia(detail),
            GateError::NoFace => RouteError::NoFaceDetected,
            GateError::Detector(e) => RouteError::FaceDetectorUnavailable(e.to_string()),
            GateError::Frames(FrameError::Missing { reason, .. }) => {
                RouteError::UnreadableMedia(reason)
            }
            GateError::Frames(e) => RouteError::Internal(e.to_string()),
        }
    }
}

impl From<AssetError> for RouteError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::TooLarge { limit } => RouteError::PayloadTooLarge { limit },
            AssetError::Io(e) => RouteError::Internal(format!("storage: {}", e)),
        }
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the OCR engine and its HTTP surface.
///
/// `Clone` so that one in-flight initialization outcome can be handed to every
/// concurrent waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcrError {
    #[error("Failed to initialize OCR engine: {0}")]
    InitializationError(String),

    #[error("No inference backend passed its capability probe")]
    NoBackendAvailable,

    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    #[error("Inference failed: {0}")]
    InferenceError(String),

    #[error("Operation timed out after {0}ms")]
    TimeoutError(u64),

    #[error("Engine has been disposed")]
    EngineDisposed,

    #[error("Preprocessing failed: {0}")]
    PreprocessingError(String),

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Missing file in request")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// Whether the fallback coordinator may recover from this error by
    /// switching to the secondary engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OcrError::InitializationError(_)
                | OcrError::NoBackendAvailable
                | OcrError::ModelLoadError(_)
                | OcrError::InferenceError(_)
        )
    }

    /// Stable machine-readable code, shared by the HTTP and worker surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            OcrError::InitializationError(_) => "INIT_ERROR",
            OcrError::NoBackendAvailable => "NO_BACKEND",
            OcrError::ModelLoadError(_) => "MODEL_LOAD_ERROR",
            OcrError::InferenceError(_) => "INFERENCE_ERROR",
            OcrError::TimeoutError(_) => "TIMEOUT",
            OcrError::EngineDisposed => "ENGINE_DISPOSED",
            OcrError::PreprocessingError(_) => "PREPROCESSING_ERROR",
            OcrError::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            OcrError::MissingFile => "MISSING_FILE",
            OcrError::InvalidRequest(_) => "INVALID_REQUEST",
            OcrError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&OcrError> for ErrorResponse {
    fn from(error: &OcrError) -> Self {
        Self {
            error: error.to_string(),
            code: error.code().to_string(),
        }
    }
}

impl IntoResponse for OcrError {
    fn into_response(self) -> Response {
        let status = match &self {
            OcrError::InitializationError(_)
            | OcrError::NoBackendAvailable
            | OcrError::ModelLoadError(_)
            | OcrError::InferenceError(_)
            | OcrError::PreprocessingError(_)
            | OcrError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OcrError::TimeoutError(_) => StatusCode::GATEWAY_TIMEOUT,
            OcrError::EngineDisposed => StatusCode::SERVICE_UNAVAILABLE,
            OcrError::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            OcrError::MissingFile | OcrError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(ErrorResponse::from(&self));

        (status, body).into_response()
    }
}

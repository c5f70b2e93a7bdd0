//! Caller-facing error taxonomy and its HTTP mapping.
//!
//! Every failure of the analyze pipeline ends up as one [`AnalyzeError`]
//! variant with a stable machine-readable code. Internal details (LLM output,
//! credential problems) are logged, never echoed to the caller.

use crate::ocr::OcrError;
use crate::scoring::ScoringError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("image exceeds the {limit} byte limit")]
    PayloadTooLarge { size: Option<usize>, limit: usize },
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("OCR found {} characters, need at least {min_chars}", .ocr_text.chars().count())]
    InsufficientText { ocr_text: String, min_chars: usize },
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error("server misconfigured: {0}")]
    Misconfigured(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalyzeError {
    /// Stable error code surfaced in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzeError::InvalidInput(_) => "invalid_input",
            AnalyzeError::PayloadTooLarge { .. } => "image_too_large",
            AnalyzeError::Ocr(OcrError::AuthFailure) => "ocr_auth_failed",
            AnalyzeError::Ocr(OcrError::PermissionDenied) => "ocr_permission_denied",
            AnalyzeError::Ocr(OcrError::ApiDisabled) => "ocr_api_disabled",
            AnalyzeError::Ocr(OcrError::Generic(_)) => "ocr_failed",
            AnalyzeError::InsufficientText { .. } => "insufficient_text",
            AnalyzeError::Scoring(_) => "scoring_failed",
            AnalyzeError::Misconfigured(_) => "server_misconfigured",
            AnalyzeError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AnalyzeError::Ocr(OcrError::AuthFailure) => StatusCode::UNAUTHORIZED,
            AnalyzeError::Ocr(OcrError::PermissionDenied) => StatusCode::FORBIDDEN,
            AnalyzeError::Ocr(OcrError::ApiDisabled) => StatusCode::SERVICE_UNAVAILABLE,
            AnalyzeError::Ocr(OcrError::Generic(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AnalyzeError::InsufficientText { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AnalyzeError::Scoring(_) => StatusCode::BAD_GATEWAY,
            AnalyzeError::Misconfigured(_) | AnalyzeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show an end user.
    pub fn public_message(&self) -> String {
        match self {
            AnalyzeError::InvalidInput(msg) => msg.clone(),
            AnalyzeError::PayloadTooLarge { limit, .. } => format!(
                "Image is too large. Maximum size is {:.1} MB.",
                *limit as f64 / 1_000_000.0
            ),
            AnalyzeError::Ocr(OcrError::AuthFailure) => {
                "Text recognition is unavailable: the service credentials have expired.".to_string()
            }
            AnalyzeError::Ocr(OcrError::PermissionDenied) => {
                "Text recognition is unavailable: the service is not permitted to use the OCR API.".to_string()
            }
            AnalyzeError::Ocr(OcrError::ApiDisabled) => {
                "Text recognition is temporarily unavailable.".to_string()
            }
            AnalyzeError::Ocr(OcrError::Generic(_)) => {
                "Failed to read text from the image.".to_string()
            }
            AnalyzeError::InsufficientText { .. } => {
                "Could not read enough text from the label. Try a closer, sharper photo of the nutrition facts panel.".to_string()
            }
            AnalyzeError::Scoring(_) => {
                "Could not analyze the label right now. Please try again.".to_string()
            }
            AnalyzeError::Misconfigured(_) => "The service is not configured correctly.".to_string(),
            AnalyzeError::Internal(_) => "Unexpected server error.".to_string(),
        }
    }

    /// Extra operator-facing hint, only for errors whose details are safe.
    pub fn details(&self) -> Option<String> {
        match self {
            AnalyzeError::PayloadTooLarge { size, limit } => Some(match size {
                Some(size) => format!("received {} bytes, limit {} bytes", size, limit),
                None => format!("limit {} bytes", limit),
            }),
            AnalyzeError::Ocr(OcrError::AuthFailure) => {
                Some("Refresh the service account key or application default credentials.".to_string())
            }
            AnalyzeError::Ocr(OcrError::PermissionDenied) => {
                Some("Grant the service account access to the Cloud Vision API.".to_string())
            }
            AnalyzeError::Ocr(OcrError::ApiDisabled) => {
                Some("Enable the Cloud Vision API for the configured project.".to_string())
            }
            AnalyzeError::InsufficientText {
                ocr_text,
                min_chars,
            } => Some(format!(
                "found {} characters, need at least {}",
                ocr_text.chars().count(),
                min_chars
            )),
            _ => None,
        }
    }

    /// Attach the request id so the failure can be rendered.
    pub fn with_request_id(self, request_id: impl Into<String>) -> RequestFailure {
        RequestFailure {
            request_id: request_id.into(),
            error: self,
        }
    }
}

/// An [`AnalyzeError`] bound to the request it failed.
#[derive(Debug)]
pub struct RequestFailure {
    pub request_id: String,
    pub error: AnalyzeError,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: &'static str,
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ocr_text: Option<String>,
}

impl IntoResponse for RequestFailure {
    fn into_response(self) -> Response {
        let RequestFailure { request_id, error } = self;
        let status = error.status();

        if status.is_server_error() {
            error!("Request {} failed ({}): {}", request_id, error.code(), error);
        }

        let body = ErrorBody {
            success: false,
            error: error.code(),
            status: status.as_u16(),
            message: error.public_message(),
            details: error.details(),
            request_id,
            ocr_text: match error {
                AnalyzeError::InsufficientText { ocr_text, .. } => Some(ocr_text),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}

//! Modular OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait and the failure classification shared by
//! every backend (Google Cloud Vision, Mistral OCR), selected at startup.

pub mod mistral;
pub mod vision;

use thiserror::Error;

/// Classified OCR failure. Each kind maps to a distinct caller-facing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcrError {
    #[error("OCR authentication failed: credentials have expired or are invalid")]
    AuthFailure,
    #[error("OCR permission denied: check the service account's Vision API permissions")]
    PermissionDenied,
    #[error("OCR API is not enabled for this project")]
    ApiDisabled,
    #[error("Failed to extract text from image: {0}")]
    Generic(String),
}

impl OcrError {
    /// Classify a raw provider/transport error message.
    ///
    /// HTTP statuses are only recognized in the `(<code> <reason>)` form the
    /// adapters format, never as bare digits.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("invalid_grant")
            || lower.contains("invalid_rapt")
            || lower.contains("reauth")
            || message.contains("UNAUTHENTICATED")
            || message.contains("(401 ")
        {
            return OcrError::AuthFailure;
        }

        // Checked before the generic 403 case: Google reports a disabled API
        // as PERMISSION_DENIED with a SERVICE_DISABLED reason.
        if message.contains("SERVICE_DISABLED")
            || lower.contains("api not enabled")
            || lower.contains("has not been used")
            || lower.contains("it is disabled")
        {
            return OcrError::ApiDisabled;
        }

        if message.contains("PERMISSION_DENIED")
            || message.contains("(403 ")
            || lower.contains("permission denied")
        {
            return OcrError::PermissionDenied;
        }

        OcrError::Generic(message.to_string())
    }
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Extract all text from an image. Returns an empty string when the image
    /// contains no text.
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Known provider identifiers used for startup selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OcrProviderKind {
    #[default]
    GoogleVision,
    MistralOcr,
}

impl OcrProviderKind {
    /// Parse an `OCR_PROVIDER` value into a provider kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "google_vision" | "vision" => Some(Self::GoogleVision),
            "mistral_ocr" | "mistral" => Some(Self::MistralOcr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failures() {
        assert_eq!(
            OcrError::classify("Token exchange failed (400 Bad Request): {\"error\":\"invalid_grant\"}"),
            OcrError::AuthFailure
        );
        assert_eq!(
            OcrError::classify("reauth related error (invalid_rapt)"),
            OcrError::AuthFailure
        );
        assert_eq!(
            OcrError::classify("Vision API error (401 Unauthorized): UNAUTHENTICATED"),
            OcrError::AuthFailure
        );
    }

    #[test]
    fn test_classify_api_disabled_before_permission() {
        let msg = "Vision API error (403 Forbidden): PERMISSION_DENIED: Cloud Vision API has not been used in project 123 before or it is disabled. reason: SERVICE_DISABLED";
        assert_eq!(OcrError::classify(msg), OcrError::ApiDisabled);
        assert_eq!(
            OcrError::classify("Vision API not enabled"),
            OcrError::ApiDisabled
        );
    }

    #[test]
    fn test_classify_permission_denied() {
        assert_eq!(
            OcrError::classify("Vision API error (403 Forbidden): PERMISSION_DENIED"),
            OcrError::PermissionDenied
        );
        assert_eq!(
            OcrError::classify("Permission denied on resource project demo"),
            OcrError::PermissionDenied
        );
    }

    #[test]
    fn test_classify_ignores_status_digits_elsewhere() {
        let msg = "Mistral OCR API error (500 Internal Server Error): request 7401-4403 failed after 14030 bytes";
        assert_eq!(OcrError::classify(msg), OcrError::Generic(msg.to_string()));
        assert_eq!(
            OcrError::classify("Mistral OCR API error (401 Unauthorized): invalid api key"),
            OcrError::AuthFailure
        );
        assert_eq!(
            OcrError::classify("Mistral OCR API error (403 Forbidden): no access"),
            OcrError::PermissionDenied
        );
    }

    #[test]
    fn test_classify_generic() {
        assert_eq!(
            OcrError::classify("connection reset by peer"),
            OcrError::Generic("connection reset by peer".to_string())
        );
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(OcrProviderKind::parse("google_vision"), Some(OcrProviderKind::GoogleVision));
        assert_eq!(OcrProviderKind::parse(" mistral_ocr "), Some(OcrProviderKind::MistralOcr));
        assert_eq!(OcrProviderKind::parse("tesseract"), None);
    }
}

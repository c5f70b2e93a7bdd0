//! Google Cloud Vision OCR provider (`images:annotate` REST API).
//!
//! Tries `DOCUMENT_TEXT_DETECTION` first since it handles dense, tabular label
//! layouts better, then falls back to plain `TEXT_DETECTION`.

use super::{OcrError, OcrProvider};
use crate::gcp::GoogleCredentials;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Hints for the languages nutrition labels commonly use. Vision still
/// auto-detects; hints only improve accuracy.
const LANGUAGE_HINTS: &[&str] = &["en", "es", "fr", "de", "it", "pt", "zh", "ja", "ko", "ar", "hi"];

pub struct GoogleVisionProvider {
    client: reqwest::Client,
    credentials: Arc<GoogleCredentials>,
}

impl GoogleVisionProvider {
    pub fn new(client: reqwest::Client, credentials: Arc<GoogleCredentials>) -> Self {
        match credentials.project_id() {
            Some(project) => info!("Vision client initialized with project: {}", project),
            None => info!("Vision client initialized (using credential default project)"),
        }
        Self {
            client,
            credentials,
        }
    }

    async fn annotate(
        &self,
        image_b64: &str,
        feature: &'static str,
    ) -> Result<AnnotateImageResponse, OcrError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(|e| OcrError::classify(&format!("{:#}", e)))?;

        let body = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageSource {
                    content: image_b64.to_string(),
                },
                features: vec![Feature { kind: feature }],
                image_context: ImageContext {
                    language_hints: LANGUAGE_HINTS.to_vec(),
                },
            }],
        };

        let mut request = self.client.post(ANNOTATE_URL).bearer_auth(&token).json(&body);
        if let Some(project) = self.credentials.project_id() {
            request = request.header("x-goog-user-project", project);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| OcrError::classify(&e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OcrError::classify(&format!(
                "Vision API error ({}): {}",
                status, text
            )));
        }

        let parsed: AnnotateResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Generic(format!("Failed to parse Vision response: {}", e)))?;

        let image_response = parsed.responses.into_iter().next().unwrap_or_default();
        if let Some(err) = &image_response.error {
            return Err(OcrError::classify(&err.describe()));
        }

        Ok(image_response)
    }
}

#[async_trait::async_trait]
impl OcrProvider for GoogleVisionProvider {
    fn name(&self) -> &str {
        "google_vision"
    }

    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let image_b64 = BASE64.encode(image);

        let document = self.annotate(&image_b64, "DOCUMENT_TEXT_DETECTION").await?;
        if let Some(text) = document_text(&document) {
            debug!("Document text detection found {} characters", text.len());
            return Ok(text);
        }

        let detection = self.annotate(&image_b64, "TEXT_DETECTION").await?;
        if let Some(text) = detection_text(&detection) {
            debug!("Text detection found {} characters", text.len());
            return Ok(text);
        }

        warn!("No text found in image");
        Ok(String::new())
    }
}

fn document_text(resp: &AnnotateImageResponse) -> Option<String> {
    resp.full_text_annotation
        .as_ref()
        .map(|a| a.text.clone())
        .filter(|t| !t.trim().is_empty())
}

/// The first text annotation is the whole detected text block.
fn detection_text(resp: &AnnotateImageResponse) -> Option<String> {
    resp.text_annotations
        .first()
        .map(|a| a.description.clone())
        .filter(|t| !t.trim().is_empty())
}

// ── Vision API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageRequest {
    image: ImageSource,
    features: Vec<Feature>,
    image_context: ImageContext,
}

#[derive(Serialize)]
struct ImageSource {
    content: String,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext {
    language_hints: Vec<&'static str>,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

/// Per-image `google.rpc.Status`.
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: String,
}

impl ApiStatus {
    /// Render with the canonical code name so [`OcrError::classify`] can match it.
    fn describe(&self) -> String {
        let code = self.code.unwrap_or(2);
        format!(
            "Vision API error ({} {}): {}",
            code,
            rpc_code_name(code),
            self.message
        )
    }
}

/// Canonical name of a `google.rpc.Code` value.
fn rpc_code_name(code: i32) -> &'static str {
    match code {
        0 => "OK",
        1 => "CANCELLED",
        3 => "INVALID_ARGUMENT",
        4 => "DEADLINE_EXCEEDED",
        5 => "NOT_FOUND",
        6 => "ALREADY_EXISTS",
        7 => "PERMISSION_DENIED",
        8 => "RESOURCE_EXHAUSTED",
        9 => "FAILED_PRECONDITION",
        10 => "ABORTED",
        11 => "OUT_OF_RANGE",
        12 => "UNIMPLEMENTED",
        13 => "INTERNAL",
        14 => "UNAVAILABLE",
        15 => "DATA_LOSS",
        16 => "UNAUTHENTICATED",
        _ => "UNKNOWN",
    }
}

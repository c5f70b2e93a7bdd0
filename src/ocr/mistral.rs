//! Mistral OCR provider (uses Mistral's OCR API with an inline image).

use super::{OcrError, OcrProvider};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const OCR_URL: &str = "https://api.mistral.ai/v1/ocr";
const OCR_MODEL: &str = "mistral-ocr-latest";

pub struct MistralOcrProvider {
    api_key: String,
    client: reqwest::Client,
}

impl MistralOcrProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client,
        }
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    model: &'static str,
    document: DocumentSource,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum DocumentSource {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<MistralPage>,
}

#[derive(Deserialize)]
struct MistralPage {
    markdown: String,
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl OcrProvider for MistralOcrProvider {
    fn name(&self) -> &str {
        "mistral_ocr"
    }

    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let body = OcrRequest {
            model: OCR_MODEL,
            document: DocumentSource::ImageUrl {
                image_url: data_url(image),
            },
        };

        info!("MistralOcrProvider: calling OCR API ({} bytes)", image.len());

        let resp = self
            .client
            .post(OCR_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::classify(&e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OcrError::classify(&format!(
                "Mistral OCR API error ({}): {}",
                status, text
            )));
        }

        let ocr: OcrResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Generic(format!("Failed to parse Mistral OCR response: {}", e)))?;

        let text = join_pages(ocr);
        debug!("MistralOcrProvider: extracted {} characters", text.len());
        Ok(text)
    }
}

/// Inline the image as a data URL, using the sniffed MIME type.
fn data_url(image: &[u8]) -> String {
    let mime = match image::guess_format(image) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => "image/jpeg",
    };
    format!("data:{};base64,{}", mime, BASE64.encode(image))
}

fn join_pages(ocr: OcrResponse) -> String {
    ocr.pages
        .into_iter()
        .map(|p| p.markdown)
        .filter(|m| !m.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

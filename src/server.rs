//! HTTP surface: health check and the multipart analyze endpoint.

use crate::analyzer::{AnalyzeRequest, Analyzer, PreferenceInput};
use crate::config::ResponseSpeed;
use crate::error::AnalyzeError;
use crate::preferences::UserPreferences;
use crate::schema::ScoreResult;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Declared MIME types accepted for the `image` field.
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Room for the non-image form fields on top of the image limit.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
}

impl AppState {
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .analyzer
        .gateways()
        .config()
        .max_image_bytes
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Last-resort boundary: a panic anywhere in the pipeline becomes a generic
/// `internal_error` body. The panic payload is logged, never returned.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    let request_id = Uuid::new_v4().to_string();
    error!("Request {} panicked: {}", request_id, detail);

    AnalyzeError::Internal(detail)
        .with_request_id(request_id)
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    success: bool,
    request_id: String,
    image_hash: String,
    model: String,
    attempts: u32,
    result: ScoreResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    ocr_text: Option<String>,
}

/// Upload a label photo and score it.
async fn analyze(State(state): State<AppState>, multipart: Multipart) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("analyze", request_id = %request_id);

    async move {
        let max_bytes = state.analyzer.gateways().config().max_image_bytes;
        let form = match AnalyzeForm::read(multipart, max_bytes).await {
            Ok(form) => form,
            Err(e) => return e.with_request_id(request_id).into_response(),
        };
        let include_ocr_text = form.include_ocr_text;

        info!(
            "Received image ({} bytes, {}), speed {:?}",
            form.request.image.len(),
            form.mime,
            form.request.speed
        );

        match state.analyzer.analyze(form.request).await {
            Ok(analysis) => {
                info!(
                    "Analysis complete: model {}, {} attempt(s), general score {}",
                    analysis.model, analysis.attempts, analysis.result.general_score
                );
                Json(AnalyzeResponse {
                    success: true,
                    request_id,
                    image_hash: analysis.image_hash,
                    model: analysis.model,
                    attempts: analysis.attempts,
                    result: analysis.result,
                    ocr_text: include_ocr_text.then_some(analysis.ocr_text),
                })
                .into_response()
            }
            Err(e) => e.with_request_id(request_id).into_response(),
        }
    }
    .instrument(span)
    .await
}

// ============================================================================
// Multipart parsing
// ============================================================================

struct AnalyzeForm {
    request: AnalyzeRequest,
    mime: String,
    include_ocr_text: bool,
}

impl AnalyzeForm {
    async fn read(mut multipart: Multipart, max_bytes: usize) -> Result<Self, AnalyzeError> {
        let mut image: Option<(String, Vec<u8>)> = None;
        let mut preferences: Option<String> = None;
        let mut preferences_context: Option<String> = None;
        let mut speed: Option<String> = None;
        let mut include_ocr_text = false;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => {
                    let mime = field
                        .content_type()
                        .unwrap_or_default()
                        .to_ascii_lowercase();
                    let bytes = field.bytes().await.map_err(|e| multipart_error(e, max_bytes))?;
                    image = Some((mime, bytes.to_vec()));
                }
                "preferences" => preferences = Some(read_text(field, max_bytes).await?),
                "preferencesContext" => {
                    preferences_context = Some(read_text(field, max_bytes).await?)
                }
                "speed" => speed = Some(read_text(field, max_bytes).await?),
                "includeOcrText" => {
                    let value = read_text(field, max_bytes).await?;
                    include_ocr_text = matches!(value.trim(), "true" | "1");
                }
                _ => {}
            }
        }

        let (mime, image) =
            image.ok_or_else(|| AnalyzeError::InvalidInput("No image provided".to_string()))?;
        validate_image(&mime, &image, max_bytes)?;

        let speed = match speed.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => ResponseSpeed::parse(raw).ok_or_else(|| {
                AnalyzeError::InvalidInput(format!(
                    "Invalid speed '{}'. Use fast, balanced or thorough.",
                    raw
                ))
            })?,
            None => ResponseSpeed::default(),
        };

        Ok(Self {
            request: AnalyzeRequest {
                image,
                preferences: preference_input(preferences, preferences_context)?,
                speed,
            },
            mime,
            include_ocr_text,
        })
    }
}

async fn read_text(
    field: axum::extract::multipart::Field<'_>,
    max_bytes: usize,
) -> Result<String, AnalyzeError> {
    field.text().await.map_err(|e| multipart_error(e, max_bytes))
}

fn multipart_error(err: MultipartError, max_bytes: usize) -> AnalyzeError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AnalyzeError::PayloadTooLarge {
            size: None,
            limit: max_bytes,
        }
    } else {
        AnalyzeError::InvalidInput(format!("Malformed multipart body: {}", err.body_text()))
    }
}

/// Structured preferences win over a pre-formatted directive.
fn preference_input(
    preferences: Option<String>,
    context: Option<String>,
) -> Result<PreferenceInput, AnalyzeError> {
    if let Some(raw) = preferences.filter(|p| !p.trim().is_empty()) {
        let prefs: UserPreferences = serde_json::from_str(&raw).map_err(|e| {
            AnalyzeError::InvalidInput(format!("Invalid preferences JSON: {}", e))
        })?;
        return Ok(PreferenceInput::Structured(prefs));
    }

    Ok(match context.filter(|c| !c.trim().is_empty()) {
        Some(directive) => PreferenceInput::Directive(directive),
        None => PreferenceInput::None,
    })
}

/// Declared type, size and actual content must all check out.
fn validate_image(mime: &str, image: &[u8], max_bytes: usize) -> Result<(), AnalyzeError> {
    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return Err(AnalyzeError::InvalidInput(format!(
            "Unsupported image type '{}'. Use JPEG, PNG or WebP.",
            mime
        )));
    }
    if image.is_empty() {
        return Err(AnalyzeError::InvalidInput("Image is empty".to_string()));
    }
    if image.len() > max_bytes {
        return Err(AnalyzeError::PayloadTooLarge {
            size: Some(image.len()),
            limit: max_bytes,
        });
    }
    match image::guess_format(image) {
        Ok(image::ImageFormat::Jpeg | image::ImageFormat::Png | image::ImageFormat::WebP) => Ok(()),
        _ => Err(AnalyzeError::InvalidInput(
            "Image content is not a JPEG, PNG or WebP file".to_string(),
        )),
    }
}

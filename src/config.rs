//! Service configuration.
//!
//! Everything is read from the environment once at startup (`.env` is loaded by
//! `main` through dotenvy). Malformed numeric values are startup errors rather
//! than silent defaults.

use crate::ocr::OcrProviderKind;
use crate::scoring::{
    ScoringPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BASE_DELAY, DEFAULT_CANDIDATES,
    DEFAULT_MAX_RETRIES,
};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 6_000_000;
pub const DEFAULT_OCR_MIN_CHARS: usize = 40;
pub const DEFAULT_GCP_LOCATION: &str = "us-central1";

const FAST_CANDIDATES: &[&str] = &["gemini-2.5-flash-lite", "gemini-2.5-flash", "gemini-2.0-flash"];
const THOROUGH_CANDIDATES: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub max_image_bytes: usize,
    pub ocr_min_chars: usize,
    pub ocr_provider: OcrProviderKind,
    /// `GEMINI_MODEL` candidates. When non-empty they replace every speed ordering.
    pub model_override: Vec<String>,
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub retry_base_delay: Duration,
    pub gcp_project: Option<String>,
    pub gcp_location: String,
    pub credentials_path: Option<PathBuf>,
    pub mistral_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            ocr_min_chars: DEFAULT_OCR_MIN_CHARS,
            ocr_provider: OcrProviderKind::default(),
            model_override: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_base_delay: DEFAULT_BASE_DELAY,
            gcp_project: None,
            gcp_location: DEFAULT_GCP_LOCATION.to_string(),
            credentials_path: None,
            mistral_api_key: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        info!(
            "Config loaded: bind={}, ocr_provider={:?}, max_image_bytes={}, ocr_min_chars={}",
            config.bind_addr, config.ocr_provider, config.max_image_bytes, config.ocr_min_chars
        );
        Ok(config)
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let ocr_provider = match get("OCR_PROVIDER") {
            Some(raw) => OcrProviderKind::parse(&raw)
                .ok_or_else(|| anyhow!("Unknown OCR_PROVIDER '{}' (expected google_vision or mistral_ocr)", raw))?,
            None => defaults.ocr_provider,
        };

        let model_override = get("GEMINI_MODEL")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_image_bytes: parse_or(&get, "MAX_IMAGE_BYTES", defaults.max_image_bytes)?,
            ocr_min_chars: parse_or(&get, "OCR_MIN_CHARS", defaults.ocr_min_chars)?,
            ocr_provider,
            model_override,
            max_retries: parse_or(&get, "LLM_MAX_RETRIES", defaults.max_retries)?,
            attempt_timeout: Duration::from_secs(parse_or(
                &get,
                "LLM_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )?),
            retry_base_delay: Duration::from_millis(parse_or(
                &get,
                "LLM_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            gcp_project: get("GOOGLE_CLOUD_PROJECT").or_else(|| get("GCP_PROJECT")),
            gcp_location: get("GOOGLE_CLOUD_LOCATION")
                .or_else(|| get("GCP_LOCATION"))
                .unwrap_or(defaults.gcp_location),
            credentials_path: get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            mistral_api_key: get("MISTRAL_API_KEY"),
        })
    }

    /// Candidate ordering for a request: the override when configured,
    /// otherwise the ordering for `speed`.
    pub fn candidates_for(&self, speed: ResponseSpeed) -> Vec<String> {
        if !self.model_override.is_empty() {
            return self.model_override.clone();
        }
        speed.candidates().iter().map(|m| m.to_string()).collect()
    }

    pub fn scoring_policy(&self, speed: ResponseSpeed) -> ScoringPolicy {
        ScoringPolicy {
            max_retries: self.max_retries,
            attempt_timeout: self.attempt_timeout,
            base_delay: self.retry_base_delay,
            ..ScoringPolicy::default()
        }
        .with_candidates(self.candidates_for(speed))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

// ============================================================================
// Response speed
// ============================================================================

/// Caller-selected latency/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSpeed {
    Fast,
    #[default]
    Balanced,
    Thorough,
}

impl ResponseSpeed {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "balanced" => Some(Self::Balanced),
            "thorough" => Some(Self::Thorough),
            _ => None,
        }
    }

    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::Fast => FAST_CANDIDATES,
            Self::Balanced => DEFAULT_CANDIDATES,
            Self::Thorough => THOROUGH_CANDIDATES,
        }
    }
}

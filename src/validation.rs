//! Parsing and strict validation of raw model output into a [`ScoreResult`].

use crate::preferences::{HealthMode, PreferenceFlag};
use crate::schema::{
    ExtractedFacts, HealthModeScore, ScoreResult, MAX_JUSTIFICATION_CHARS, MAX_SCORE, MIN_SCORE,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Why one model response was rejected. Both kinds are retry-eligible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("model output is not valid JSON: {0}")]
    MalformedOutput(String),
    #[error("model output does not match the score schema: {0}")]
    SchemaViolation(String),
}

/// Validates model output against the score schema for one request.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    required_modes: Vec<HealthMode>,
}

impl ResponseValidator {
    /// `required_modes` are the health modes active in the originating preferences;
    /// the result must score exactly these.
    pub fn new(required_modes: Vec<HealthMode>) -> Self {
        Self { required_modes }
    }

    pub fn required_modes(&self) -> &[HealthMode] {
        &self.required_modes
    }

    pub fn validate(&self, raw: &str) -> Result<ScoreResult, ValidationError> {
        let json_text = strip_code_fence(raw);

        let value: serde_json::Value = serde_json::from_str(json_text).map_err(|e| {
            ValidationError::MalformedOutput(format!(
                "{} (near: {})",
                e,
                json_text.chars().take(80).collect::<String>()
            ))
        })?;

        if !value.is_object() {
            return Err(ValidationError::SchemaViolation(
                "top-level value must be a JSON object".to_string(),
            ));
        }

        let parsed: RawScoreResult = serde_json::from_value(value)
            .map_err(|e| ValidationError::SchemaViolation(e.to_string()))?;

        let general_score = integer_score("generalScore", &parsed.general_score)?;
        check_justification("generalJustification", &parsed.general_justification)?;

        let raw_modes = parsed.health_mode_scores.unwrap_or_default();
        for mode in &self.required_modes {
            if !raw_modes.contains_key(mode.key()) {
                return Err(ValidationError::SchemaViolation(format!(
                    "healthModeScores is missing required key '{}'",
                    mode.key()
                )));
            }
        }

        let mut health_mode_scores = BTreeMap::new();
        for (key, entry) in raw_modes {
            if !self.required_modes.iter().any(|m| m.key() == key) {
                return Err(ValidationError::SchemaViolation(format!(
                    "healthModeScores contains unrequested key '{}'",
                    key
                )));
            }
            let score = integer_score(&format!("healthModeScores.{}.score", key), &entry.score)?;
            check_justification(
                &format!("healthModeScores.{}.justification", key),
                &entry.justification,
            )?;
            health_mode_scores.insert(
                key,
                HealthModeScore {
                    score,
                    justification: entry.justification,
                },
            );
        }

        Ok(ScoreResult {
            general_score,
            general_justification: parsed.general_justification,
            health_mode_scores,
            warnings: parsed.warnings,
            extracted: parsed.extracted,
        })
    }
}

/// Strip a single surrounding code fence (tagged like ```` ```json ```` or bare) and
/// surrounding whitespace.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };

    let tag_len = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    if tag_len > 0 {
        debug!("Removed tagged code fence ({})", &rest[..tag_len]);
    } else {
        debug!("Removed bare code fence");
    }

    let body = rest[tag_len..].trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScoreResult {
    general_score: serde_json::Number,
    general_justification: String,
    #[serde(default)]
    health_mode_scores: Option<BTreeMap<String, RawHealthModeScore>>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
    #[serde(default)]
    extracted: Option<ExtractedFacts>,
}

#[derive(Debug, Deserialize)]
struct RawHealthModeScore {
    score: serde_json::Number,
    justification: String,
}

fn integer_score(field: &str, number: &serde_json::Number) -> Result<u8, ValidationError> {
    let value = number.as_f64().unwrap_or(f64::NAN);
    let in_range = value >= f64::from(MIN_SCORE) && value <= f64::from(MAX_SCORE);
    if !in_range || value.fract() != 0.0 {
        return Err(ValidationError::SchemaViolation(format!(
            "{} must be an integer in [{}, {}], got {}",
            field, MIN_SCORE, MAX_SCORE, number
        )));
    }
    Ok(value as u8)
}

fn check_justification(field: &str, text: &str) -> Result<(), ValidationError> {
    let len = text.chars().count();
    if len > MAX_JUSTIFICATION_CHARS {
        return Err(ValidationError::SchemaViolation(format!(
            "{} is {} characters, maximum is {}",
            field, len, MAX_JUSTIFICATION_CHARS
        )));
    }
    Ok(())
}

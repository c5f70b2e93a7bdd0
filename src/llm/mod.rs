//! LLM gateway abstraction.
//!
//! Defines the [`LlmGateway`] trait the scoring orchestrator drives, so the
//! Vertex AI adapter can be swapped for a test double or another provider.

pub mod vertex;

use serde::Serialize;
use thiserror::Error;

/// Sampling parameters sent with every generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 4096,
        }
    }
}

/// Plain-text output of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Provider finish reason (`STOP`, `MAX_TOKENS`, ...), informational only.
    pub finish_reason: Option<String>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("STOP".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered with a non-success status.
    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The request never produced a usable HTTP response.
    #[error("LLM transport error: {0}")]
    Transport(String),
    /// Credentials or project context could not be resolved.
    #[error("LLM client setup failed: {0}")]
    Setup(String),
}

#[async_trait::async_trait]
pub trait LlmGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, LlmError>;
}

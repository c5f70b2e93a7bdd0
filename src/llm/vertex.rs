//! Gemini on Vertex AI via the `generateContent` REST endpoint.

use super::{Generation, GenerationParams, LlmError, LlmGateway};
use crate::gcp::GoogleCredentials;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Vertex AI client. Project and location are fixed at construction; the model
/// is chosen per call so one client serves every candidate.
pub struct VertexGeminiClient {
    client: Client,
    credentials: Arc<GoogleCredentials>,
    project_id: String,
    location: String,
}

impl VertexGeminiClient {
    pub fn new(
        client: Client,
        credentials: Arc<GoogleCredentials>,
        location: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let project_id = credentials.project_id().map(str::to_string).ok_or_else(|| {
            LlmError::Setup(
                "GOOGLE_CLOUD_PROJECT is not set. Vertex AI requires a GCP project ID.".to_string(),
            )
        })?;
        let location = location.into();

        info!(
            "Vertex AI client initialized (project: {}, location: {})",
            project_id, location
        );

        Ok(Self {
            client,
            credentials,
            project_id,
            location,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        let host = if self.location == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{}-aiplatform.googleapis.com", self.location)
        };
        format!(
            "https://{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            host, self.project_id, self.location, model
        )
    }
}

#[async_trait::async_trait]
impl LlmGateway for VertexGeminiClient {
    fn name(&self) -> &str {
        "vertex_gemini"
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, LlmError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(|e| LlmError::Setup(format!("{:#}", e)))?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: params.clone(),
        };

        debug!("Sending request to Vertex AI: model={}", model);

        let response = self
            .client
            .post(self.endpoint(model))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text.chars().take(500).collect(),
            });
        }

        let response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("Failed to parse Vertex AI response: {}", e)))?;

        if let Some(usage) = &response.usage_metadata {
            info!(
                "Vertex AI response: {} tokens (prompt: {}, completion: {})",
                usage.total_token_count, usage.prompt_token_count, usage.candidates_token_count
            );
        }

        Ok(into_generation(response))
    }
}

/// First candidate's text parts, concatenated. Missing content yields empty text.
fn into_generation(response: GenerateContentResponse) -> Generation {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Generation {
            text: String::new(),
            finish_reason: None,
        };
    };

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    Generation {
        text,
        finish_reason: candidate.finish_reason,
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_generation_config() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: "hi".to_string(),
                }],
            }],
            generation_config: GenerationParams::default(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn test_text_parts_concatenated() {
        let json = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"generalScore\":"}, {"text": "7}"}]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let generation = into_generation(response);
        assert_eq!(generation.text, "{\"generalScore\":7}");
        assert_eq!(generation.finish_reason.as_deref(), Some("MAX_TOKENS"));
    }

    #[test]
    fn test_missing_candidates_yield_empty_text() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert_eq!(into_generation(response).text, "");

        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        let generation = into_generation(response);
        assert!(generation.text.is_empty());
        assert_eq!(generation.finish_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_endpoint_uses_regional_host() {
        let creds = Arc::new(
            GoogleCredentials::load(Client::new(), None, Some("demo-project".to_string())).unwrap(),
        );
        let client = VertexGeminiClient::new(Client::new(), creds.clone(), "us-central1").unwrap();
        assert_eq!(
            client.endpoint("gemini-2.5-flash"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo-project/locations/us-central1/publishers/google/models/gemini-2.5-flash:generateContent"
        );

        let global = VertexGeminiClient::new(Client::new(), creds, "global").unwrap();
        assert!(global.endpoint("m").starts_with("https://aiplatform.googleapis.com/"));
    }

    #[test]
    fn test_missing_project_is_setup_error() {
        let creds = Arc::new(GoogleCredentials::load(Client::new(), None, None).unwrap());
        assert!(matches!(
            VertexGeminiClient::new(Client::new(), creds, "us-central1"),
            Err(LlmError::Setup(_))
        ));
    }
}

//! Lazily constructed OCR and LLM client handles.
//!
//! Clients are built on first use and then shared by every request. Concurrent
//! first use initializes once; a failed initialization is not cached, so the
//! next request tries again (e.g. after credentials are fixed).

use crate::config::AppConfig;
use crate::gcp::GoogleCredentials;
use crate::llm::vertex::VertexGeminiClient;
use crate::llm::LlmGateway;
use crate::ocr::mistral::MistralOcrProvider;
use crate::ocr::vision::GoogleVisionProvider;
use crate::ocr::{OcrProvider, OcrProviderKind};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Upper bound on any single outbound HTTP call. LLM attempts are also
/// bounded by the (shorter) per-attempt timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Gateways {
    config: Arc<AppConfig>,
    client: reqwest::Client,
    credentials: OnceCell<Arc<GoogleCredentials>>,
    ocr: OnceCell<Arc<dyn OcrProvider>>,
    llm: OnceCell<Arc<dyn LlmGateway>>,
}

impl Gateways {
    pub fn new(config: Arc<AppConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            credentials: OnceCell::new(),
            ocr: OnceCell::new(),
            llm: OnceCell::new(),
        })
    }

    /// Pre-seeded handles; nothing is constructed lazily.
    pub fn with_handles(
        config: Arc<AppConfig>,
        ocr: Arc<dyn OcrProvider>,
        llm: Arc<dyn LlmGateway>,
    ) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            credentials: OnceCell::new(),
            ocr: OnceCell::from(ocr),
            llm: OnceCell::from(llm),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn ocr(&self) -> Result<Arc<dyn OcrProvider>> {
        let provider = self
            .ocr
            .get_or_try_init(|| async {
                let provider: Arc<dyn OcrProvider> = match self.config.ocr_provider {
                    OcrProviderKind::GoogleVision => Arc::new(GoogleVisionProvider::new(
                        self.client.clone(),
                        self.credentials().await?,
                    )),
                    OcrProviderKind::MistralOcr => {
                        let api_key = self.config.mistral_api_key.clone().ok_or_else(|| {
                            anyhow!("MISTRAL_API_KEY is required when OCR_PROVIDER=mistral_ocr")
                        })?;
                        Arc::new(MistralOcrProvider::new(self.client.clone(), api_key))
                    }
                };
                info!("OCR provider ready: {}", provider.name());
                Ok::<_, anyhow::Error>(provider)
            })
            .await?;
        Ok(provider.clone())
    }

    pub async fn llm(&self) -> Result<Arc<dyn LlmGateway>> {
        let gateway = self
            .llm
            .get_or_try_init(|| async {
                let client = VertexGeminiClient::new(
                    self.client.clone(),
                    self.credentials().await?,
                    self.config.gcp_location.clone(),
                )?;
                let gateway: Arc<dyn LlmGateway> = Arc::new(client);
                info!("LLM gateway ready: {}", gateway.name());
                Ok::<_, anyhow::Error>(gateway)
            })
            .await?;
        Ok(gateway.clone())
    }

    async fn credentials(&self) -> Result<Arc<GoogleCredentials>> {
        let credentials = self
            .credentials
            .get_or_try_init(|| async {
                let credentials = GoogleCredentials::load(
                    self.client.clone(),
                    self.config.credentials_path.as_deref(),
                    self.config.gcp_project.clone(),
                )?;
                Ok::<_, anyhow::Error>(Arc::new(credentials))
            })
            .await?;
        Ok(credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mistral_without_key_fails_and_is_not_cached() {
        let config = AppConfig {
            ocr_provider: OcrProviderKind::MistralOcr,
            ..AppConfig::default()
        };
        let gateways = Gateways::new(Arc::new(config)).unwrap();

        let err = gateways.ocr().await.err().unwrap();
        assert!(err.to_string().contains("MISTRAL_API_KEY"));
        assert!(gateways.ocr.get().is_none());
    }

    #[tokio::test]
    async fn test_mistral_handle_built_once() {
        let config = AppConfig {
            ocr_provider: OcrProviderKind::MistralOcr,
            mistral_api_key: Some("test-key".to_string()),
            ..AppConfig::default()
        };
        let gateways = Gateways::new(Arc::new(config)).unwrap();

        let first = gateways.ocr().await.unwrap();
        let second = gateways.ocr().await.unwrap();
        assert_eq!(first.name(), "mistral_ocr");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_llm_without_project_is_an_error() {
        let gateways = Gateways::new(Arc::new(AppConfig::default())).unwrap();
        let err = gateways.llm().await.err().unwrap();
        assert!(err.to_string().contains("GOOGLE_CLOUD_PROJECT"));
    }
}

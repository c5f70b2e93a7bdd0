//! Google Cloud OAuth2 access tokens for the Vision and Vertex AI REST APIs.
//!
//! Tokens come from a service account key file exchanged through a signed JWT,
//! or from the GCE metadata server when no key file is configured (Cloud Run,
//! GCE, GKE). Tokens are cached and refreshed shortly before expiry.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this many seconds before the token actually expires.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Access-token provider shared by every Google API adapter.
pub struct GoogleCredentials {
    source: TokenSource,
    project_id: Option<String>,
    client: reqwest::Client,
    token_cache: Mutex<Option<CachedToken>>,
}

enum TokenSource {
    ServiceAccount(ServiceAccountKey),
    MetadataServer,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64,
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl GoogleCredentials {
    /// Load credentials. `key_path` is the service account JSON file, if any;
    /// `project_override` wins over the key file's own `project_id`.
    pub fn load(
        client: reqwest::Client,
        key_path: Option<&Path>,
        project_override: Option<String>,
    ) -> Result<Self> {
        let (source, key_project) = match key_path {
            Some(path) => {
                let key_json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read service account key: {:?}", path))?;
                let key: ServiceAccountKey = serde_json::from_str(&key_json)
                    .with_context(|| format!("Failed to parse service account key: {:?}", path))?;
                info!("Using service account credentials for {}", key.client_email);
                let project = key.project_id.clone();
                (TokenSource::ServiceAccount(key), project)
            }
            None => {
                info!("No service account key configured, using the metadata server");
                (TokenSource::MetadataServer, None)
            }
        };

        Ok(Self {
            source,
            project_id: project_override.or(key_project),
            client,
            token_cache: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Get a valid OAuth2 access token, refreshing if expired.
    pub async fn access_token(&self) -> Result<String> {
        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if now_secs() < cached.expires_at.saturating_sub(EXPIRY_MARGIN_SECS) {
                return Ok(cached.access_token.clone());
            }
        }

        let resp = match &self.source {
            TokenSource::ServiceAccount(key) => self.exchange_jwt(key).await?,
            TokenSource::MetadataServer => self.fetch_from_metadata().await?,
        };
        debug!("Fetched Google access token (expires in {}s)", resp.expires_in);

        let token = resp.access_token.clone();
        *cache = Some(CachedToken {
            access_token: resp.access_token,
            expires_at: now_secs() + resp.expires_in,
        });
        Ok(token)
    }

    async fn exchange_jwt(&self, key: &ServiceAccountKey) -> Result<TokenResponse> {
        let token_uri = key.token_uri.as_deref().unwrap_or(TOKEN_URI);
        let now = now_secs();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": CLOUD_PLATFORM_SCOPE,
            "aud": token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Invalid RSA private key in service account JSON")?;
        let jwt = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .context("Failed to encode JWT")?;

        let resp = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .context("Token exchange request failed")?;

        let status = resp.status();
        if !status.is_success() {
            // Keep the body: it carries invalid_grant and similar markers the
            // OCR failure classifier relies on.
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed ({}): {}", status, body);
        }

        resp.json().await.context("Failed to parse token response")
    }

    async fn fetch_from_metadata(&self) -> Result<TokenResponse> {
        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Metadata server unreachable; set GOOGLE_APPLICATION_CREDENTIALS when running outside Google Cloud")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Metadata server token request failed ({}): {}", status, body);
        }

        resp.json()
            .await
            .context("Failed to parse metadata server token response")
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

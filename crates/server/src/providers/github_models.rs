use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use scriptrag_core::provider::rate_limit::parse_rate_limit;
use scriptrag_core::{EmbeddingProvider, Error, ProviderTag, Result};

const DEFAULT_BASE_URL: &str = "https://models.inference.ai.azure.com";

/// Embeds text against the GitHub Models inference endpoint, which speaks
/// the same `/embeddings` shape as an OpenAI-compatible provider but
/// authenticates with a GitHub token and has its own default base URL —
/// kept as its own provider so the chain's availability cache and
/// rate-limit cooldowns track it separately from a self-hosted
/// OpenAI-compatible endpoint.
pub struct GitHubModelsProvider {
    client: Client,
    base_url: String,
    token: String,
}

impl GitHubModelsProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for GitHubModelsProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::GitHubModels
    }

    async fn is_available(&self) -> bool {
        !self.token.is_empty()
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": text });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("github models request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let text = response.text().await.unwrap_or_default();
            let hint = parse_rate_limit(retry_after.as_deref(), &text);
            return Err(Error::RateLimited {
                retry_after_secs: hint.map(|h| h.retry_after_secs).unwrap_or(60),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "unknown".into());
            warn!(%status, body = %text, "github models embeddings request failed");
            return Err(Error::ProviderUnavailable(format!("github models returned {status}: {text}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFormatError(format!("response parse error: {e}")))?;

        value
            .get("data")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|entry| entry.get("embedding"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect())
            .ok_or_else(|| Error::EmbeddingFormatError("response missing data[0].embedding".into()))
    }
}

use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use scriptrag_core::provider::rate_limit::parse_rate_limit;
use scriptrag_core::{EmbeddingProvider, Error, ProviderTag, Result};

/// Embeds text against any OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::OpenAiCompatible
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        matches!(self.request(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": text });

        let response = self
            .request(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("openai-compatible request failed: {e}")))?;

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
            warn!(%status, body = %text, "openai-compatible embeddings request failed");
            return Err(Error::ProviderUnavailable(format!("provider returned {status}: {text}")));
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

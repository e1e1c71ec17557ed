use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use scriptrag_core::{EmbeddingProvider, Error, ProviderTag, Result};

/// Embeds text against a local Ollama instance's `/api/embeddings`
/// endpoint. An empty or `"auto"` model string resolves to whatever
/// model Ollama currently has loaded.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn resolve_running_model(&self) -> Result<String> {
        let ps_url = format!("{}/api/ps", self.base_url);
        if let Ok(resp) = self.client.get(&ps_url).send().await {
            if resp.status().is_success() {
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    if let Some(name) = body
                        .get("models")
                        .and_then(|m| m.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|m| m.get("name"))
                        .and_then(|n| n.as_str())
                    {
                        return Ok(name.to_owned());
                    }
                }
            }
        }

        let tags_url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&tags_url)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("ollama unreachable: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("ollama tags parse failed: {e}")))?;
        body.get("models")
            .and_then(|m| m.as_array())
            .and_then(|arr| arr.first())
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .map(str::to_owned)
            .ok_or_else(|| Error::ProviderUnavailable("ollama has no models loaded".into()))
    }

    async fn effective_model(&self, model: &str) -> Result<String> {
        if model.is_empty() || model.eq_ignore_ascii_case("auto") {
            self.resolve_running_model().await
        } else {
            Ok(model.to_owned())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Ollama
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let model = self.effective_model(model).await?;
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "prompt": text });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_else(|_| "unknown".into());
            warn!(%status, body = %text, "ollama embeddings request failed");
            return Err(Error::ProviderUnavailable(format!("ollama returned {status}: {text}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFormatError(format!("ollama response parse error: {e}")))?;

        value
            .get("embedding")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect())
            .ok_or_else(|| Error::EmbeddingFormatError("ollama response missing embedding array".into()))
    }
}

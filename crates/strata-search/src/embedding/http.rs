//! Remote embedding providers over HTTP (`ureq`, blocking).

use super::{EmbeddingProvider, ProviderInfo};
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const OPENAI_MAX_INPUT_CHARS: usize = 24_000;
const OPENAI_MAX_BATCH_SIZE: usize = 2_048;
const OLLAMA_MAX_INPUT_CHARS: usize = 8_192;
const OLLAMA_MAX_BATCH_SIZE: usize = 64;

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// POST a JSON body and decode the JSON response, surfacing the response
/// body on HTTP errors.
fn post_json<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<T> {
    let mut request = agent.post(url).set("Content-Type", "application/json");
    if let Some(token) = bearer {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }

    match request.send_json(body) {
        Ok(response) => response
            .into_json::<T>()
            .with_context(|| format!("decode response from {url}")),
        Err(ureq::Error::Status(status, response)) => {
            let detail = response.into_string().unwrap_or_default();
            Err(anyhow!("{url} returned HTTP {status}: {}", detail.trim()))
        }
        Err(err) => Err(anyhow!(err).context(format!("request to {url} failed"))),
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiProvider {
    model: String,
    base_url: String,
    api_key: Option<String>,
    dimensions: Option<usize>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiItem>,
}

#[derive(Deserialize)]
struct OpenAiItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        model: &str,
        base_url: &str,
        api_key: Option<String>,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Self {
        Self {
            model: model.to_string(),
            base_url: trim_base_url(base_url),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            dimensions,
            agent: agent(timeout),
        }
    }

    fn request_body(&self, texts: &[&str]) -> Value {
        let mut body = json!({ "model": self.model, "input": texts });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = json!(dimensions);
        }
        body
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            name: "openai".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            max_input_length: OPENAI_MAX_INPUT_CHARS,
            max_batch_size: OPENAI_MAX_BATCH_SIZE,
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow!("openai returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("openai API key is not set");
        };

        let url = format!("{}/embeddings", self.base_url);
        let response: OpenAiResponse =
            post_json(&self.agent, &url, Some(api_key), &self.request_body(texts))?;

        let mut items = response.data;
        items.sort_by_key(|item| item.index);
        debug!(model = %self.model, count = items.len(), "openai embeddings received");
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    fn validate(&self) -> bool {
        self.api_key.is_some() && !self.base_url.is_empty()
    }
}

/// Ollama `/api/embed` endpoint.
pub struct OllamaProvider {
    model: String,
    base_url: String,
    dimensions: usize,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(model: &str, base_url: &str, dimensions: usize, timeout: Duration) -> Self {
        Self {
            model: model.to_string(),
            base_url: trim_base_url(base_url),
            dimensions,
            agent: agent(timeout),
        }
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".to_string(),
            model: self.model.clone(),
            dimensions: Some(self.dimensions),
            max_input_length: OLLAMA_MAX_INPUT_CHARS,
            max_batch_size: OLLAMA_MAX_BATCH_SIZE,
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow!("ollama returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({ "model": self.model, "input": texts });
        let response: OllamaResponse = post_json(&self.agent, &url, None, &body)?;
        debug!(model = %self.model, count = response.embeddings.len(), "ollama embeddings received");
        Ok(response.embeddings)
    }

    fn validate(&self) -> bool {
        self.agent
            .get(&format!("{}/api/version", self.base_url))
            .call()
            .is_ok()
    }
}

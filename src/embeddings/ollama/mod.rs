#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EmbeddingBatch, Embedder};
use crate::config::OllamaConfig;
use crate::embeddings::chunking::estimate_token_count;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECONDS: u64 = 2;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Invalid Ollama address in configuration")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent: agent_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = agent_with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Confirm the server answers and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Checking Ollama at {} for model {}", self.base_url, self.model);

        let models = self
            .list_models()
            .with_context(|| format!("Ollama at {} did not respond", self.base_url))?;

        if models.iter().all(|m| m.name != self.model) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!("Model {} missing from {:?}", self.model, available);
            return Err(anyhow!(
                "Embedding model '{}' is not pulled (server has: {})",
                self.model,
                available.join(", ")
            ));
        }

        info!("Ollama at {} serves {}", self.base_url, self.model);
        Ok(())
    }

    /// Models pulled on the server
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        let body = self.send_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let tags: ModelsResponse =
            serde_json::from_str(&body).context("Unexpected /api/tags response")?;
        debug!("Ollama reports {} models", tags.models.len());
        Ok(tags.models)
    }

    fn endpoint(&self, route: &str) -> Result<Url> {
        self.base_url
            .join(route)
            .with_context(|| format!("Cannot build {route} URL from {}", self.base_url))
    }

    /// One `/api/embed` round trip, returning vectors and tokens consumed
    fn embed_batch(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        let url = self.endpoint("/api/embed")?;
        let payload = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })?;

        let body = self.send_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&payload)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse =
            serde_json::from_str(&body).context("Unexpected /api/embed response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            ));
        }

        let token_usage = response
            .prompt_eval_count
            .unwrap_or_else(|| texts.iter().map(|t| estimate_token_count(t)).sum());

        Ok((response.embeddings, token_usage))
    }

    /// Retry 5xx and transport failures with exponential backoff; anything
    /// else fails on the first attempt
    fn send_with_retry<F>(&self, mut send: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut attempt = 1;
        loop {
            let error = match send() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if !is_transient(&error) {
                warn!("Ollama request failed permanently: {}", error);
                return Err(anyhow!("Ollama request failed: {error}"));
            }
            if attempt >= self.retry_attempts {
                error!(
                    "Ollama at {} still failing after {} attempts: {}",
                    self.base_url, attempt, error
                );
                return Err(anyhow!(
                    "Ollama request failed after {attempt} attempts: {error}"
                ));
            }

            let delay = backoff(attempt);
            warn!(
                "Ollama request failed ({}), retrying in {:?} ({}/{})",
                error, delay, attempt, self.retry_attempts
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}

fn agent_with_timeout(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn is_transient(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(BACKOFF_BASE_SECONDS.pow(attempt.saturating_sub(1)))
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                dimension: 0,
                token_usage: 0,
            });
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut vectors = Vec::with_capacity(texts.len());
        let mut token_usage = 0;

        for batch in texts.chunks(self.batch_size as usize) {
            let (embeddings, tokens) = self
                .embed_batch(batch)
                .with_context(|| format!("Embedding a batch of {} texts failed", batch.len()))?;
            vectors.extend(embeddings);
            token_usage += tokens;
        }

        let dimension = vectors.first().map_or(0, Vec::len);
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(anyhow!(
                "Provider returned mixed dimensions: {} and {}",
                dimension,
                bad.len()
            ));
        }

        debug!(
            "Generated {} embeddings with {} dimensions",
            vectors.len(),
            dimension
        );

        Ok(EmbeddingBatch {
            vectors,
            dimension,
            token_usage,
        })
    }
}

//! HTTP embedding provider.
//!
//! Speaks the Ollama-compatible JSON shape (`/api/embeddings`,
//! `/api/generate`) with a bearer token for hosted deployments. Transient
//! failures retry with exponential backoff starting at one second; responses
//! are cached in a bounded LRU keyed by content hash when enabled.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::cancel::Cancellation;
use crate::config::EmbeddingConfig;
use crate::error::{EngramError, Result};

const BACKOFF_BASE: Duration = Duration::from_secs(1);

// ── wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

// ── provider ────────────────────────────────────────────────────────────────

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: EmbeddingConfig,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngramError::Internal(format!("http client: {e}")))?;

        let cache = if config.cache_enabled {
            let capacity = NonZeroUsize::new(config.cache_size.max(1))
                .expect("cache capacity is at least one");
            Some(Mutex::new(LruCache::new(capacity)))
        } else {
            None
        };

        Ok(Self {
            client,
            config,
            cache,
        })
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.embedding_model.as_bytes());
        hasher.update([0]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.config.api_key)
        }
    }

    /// Run `send` with bounded exponential backoff, respecting the
    /// cancellation deadline between attempts.
    async fn with_backoff<T, F, Fut>(&self, cancel: &Cancellation, mut send: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = BACKOFF_BASE;
        let mut last = EngramError::BackendUnavailable("no attempts made".to_string());
        for attempt in 0..=self.config.max_retries {
            cancel.checkpoint()?;
            match send().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                        "embedding request failed, backing off");
                    let sleep = match cancel.remaining() {
                        Some(remaining) => delay.min(remaining),
                        None => delay,
                    };
                    tokio::time::sleep(sleep).await;
                    delay *= 2;
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }

    async fn post_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            prompt: text,
        };
        let response = self
            .authorize(self.client.post(self.endpoint("api/embeddings")))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngramError::BackendUnavailable(format!("embedding request: {e}")))?;

        if !response.status().is_success() {
            return Err(EngramError::BackendUnavailable(format!(
                "embedding provider returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngramError::BackendUnavailable(format!("embedding response: {e}")))?;
        if parsed.embedding.is_empty() {
            return Err(EngramError::BackendUnavailable(
                "embedding provider returned an empty vector".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    async fn embed(&self, text: &str, cancel: &Cancellation) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EngramError::InvalidInput("cannot embed empty text".to_string()));
        }

        let key = self.cache_key(text);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().expect("embedding cache poisoned").get(&key) {
                return Ok(hit.clone());
            }
        }

        let vector = self.with_backoff(cancel, || self.post_embedding(text)).await?;

        if let Some(cache) = &self.cache {
            cache
                .lock()
                .expect("embedding cache poisoned")
                .put(key, vector.clone());
        }
        Ok(vector)
    }

    async fn summarize(&self, contents: &[String], cancel: &Cancellation) -> Result<String> {
        if self.config.consolidation_model.is_empty() {
            return Err(EngramError::Internal(
                "no consolidation model configured".to_string(),
            ));
        }
        let prompt = format!(
            "Condense the following related observations into one short paragraph \
             that preserves the shared facts:\n\n{}",
            contents.join("\n---\n")
        );
        let request = GenerateRequest {
            model: &self.config.consolidation_model,
            prompt,
            stream: false,
        };

        self.with_backoff(cancel, || async {
            let response = self
                .authorize(self.client.post(self.endpoint("api/generate")))
                .json(&request)
                .send()
                .await
                .map_err(|e| EngramError::BackendUnavailable(format!("summarize request: {e}")))?;
            if !response.status().is_success() {
                return Err(EngramError::BackendUnavailable(format!(
                    "summarizer returned {}",
                    response.status()
                )));
            }
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| EngramError::BackendUnavailable(format!("summarize response: {e}")))?;
            Ok(parsed.response.trim().to_string())
        })
        .await
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .authorize(self.client.get(self.endpoint("api/tags")))
            .send()
            .await
            .map_err(|e| EngramError::BackendUnavailable(format!("embedding health: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EngramError::BackendUnavailable(format!(
                "embedding provider returned {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(cache_enabled: bool) -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(EmbeddingConfig {
            cache_enabled,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn cache_key_depends_on_model_and_text() {
        let a = provider(true);
        let mut altered_config = EmbeddingConfig::default();
        altered_config.embedding_model = "another-model".to_string();
        let b = HttpEmbeddingProvider::new(altered_config).unwrap();

        assert_eq!(a.cache_key("hello"), a.cache_key("hello"));
        assert_ne!(a.cache_key("hello"), a.cache_key("world"));
        assert_ne!(a.cache_key("hello"), b.cache_key("hello"));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let p = provider(false);
        assert_eq!(p.endpoint("api/tags"), "http://localhost:11434/api/tags");
    }

    #[tokio::test]
    async fn empty_text_is_invalid_input() {
        let p = provider(false);
        let err = p.embed("", &Cancellation::new()).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn summarize_without_model_is_disabled() {
        let p = provider(false);
        let err = p
            .summarize(&["a".to_string()], &Cancellation::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_retries() {
        let p = provider(false);
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = p.embed("text", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }
}

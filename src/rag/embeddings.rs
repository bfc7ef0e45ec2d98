use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::{ConfigError, ProviderError};
use crate::proxy::KeyRing;

/// Failures come back as `Err(ProviderError)`; the builder and the search
/// treat them as "no vector" rather than aborting.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Identifier recorded next to cached vectors.
    fn model(&self) -> &str;
}

pub struct EmbeddingGenerator {
    client: Client,
    endpoint: String,
    model: String,
    keys: Arc<KeyRing>,
    max_chars: usize,
}

impl EmbeddingGenerator {
    pub fn new(settings: &ProviderSettings, keys: Arc<KeyRing>) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        let endpoint = format!("{}/embeddings", settings.base_url.trim_end_matches('/'));
        tracing::info!(
            "Embedding client ready: model={} endpoint={}",
            settings.embedding_model,
            endpoint
        );

        Ok(Self {
            client,
            endpoint,
            model: settings.embedding_model.clone(),
            keys,
            max_chars: settings.max_embedding_chars,
        })
    }

    async fn request(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let (key_index, key) = self.keys.active();
        let body = EmbeddingRequest { model: &self.model, input };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let err = ProviderError::Status { status: status.as_u16(), body };
            if err.is_key_rejection() {
                self.keys.reject(key_index);
            }
            return Err(err);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(ProviderError::Empty)?;
        if embedding.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let input = truncate_chars(text, self.max_chars);
        self.request(input).await.map_err(|e| {
            tracing::warn!("Embedding request failed: {}", e);
            e
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => &text[..byte_pos],
        None => text,
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

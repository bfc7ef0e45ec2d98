use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{ConversationSettings, ProviderSettings};
use crate::error::{ConfigError, ProviderError};
use crate::models::{ChatRequest, ChatResponse, Message};

/// A rejected key (401/403/429) moves the active slot to the next key for
/// later calls. The call that saw the rejection still fails.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<String>,
    active: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Result<Self, ConfigError> {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(Self { keys, active: AtomicUsize::new(0) })
    }

    pub fn active(&self) -> (usize, &str) {
        let index = self.active.load(Ordering::Acquire) % self.keys.len();
        (index, &self.keys[index])
    }

    /// Moves past `index` unless another caller already did.
    pub fn reject(&self, index: usize) {
        let next = (index + 1) % self.keys.len();
        if self
            .active
            .compare_exchange(index, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                "API key {}******** rejected, switching to {}********",
                key_prefix(&self.keys[index]),
                key_prefix(&self.keys[next])
            );
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn key_prefix(key: &str) -> &str {
    match key.char_indices().nth(8) {
        Some((pos, _)) => &key[..pos],
        None => key,
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String, ProviderError>;
}

pub struct LiteLLMProxy {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    keys: Arc<KeyRing>,
}

impl LiteLLMProxy {
    pub fn new(
        provider: &ProviderSettings,
        conversation: &ConversationSettings,
        keys: Arc<KeyRing>,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(provider.timeout()).build()?;
        Ok(Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            model: provider.chat_model.clone(),
            temperature: conversation.temperature,
            max_tokens: conversation.max_tokens,
            keys,
        })
    }

    pub async fn chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let (key_index, key) = self.keys.active();

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
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

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health/liveliness", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ChatProvider for LiteLLMProxy {
    async fn complete(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            stream: Some(false),
        };

        let response = self.chat_completion(request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ProviderError::Empty)?;

        if content.trim().is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(content)
    }
}

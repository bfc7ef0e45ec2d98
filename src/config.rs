use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_CONFIG_FILE: &str = "cv-rag";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub conversation: ConversationSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_keys: Vec<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout_secs: u64,
    pub max_embedding_chars: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            api_keys: Vec::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_embedding_chars: 8000,
        }
    }
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub cache_path: PathBuf,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay_ms: 1000,
            cache_path: PathBuf::from("./data/index_cache.json"),
        }
    }
}

impl IndexSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    pub history_window: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            history_window: 4,
            temperature: 0.3,
            max_tokens: 1024,
            session_ttl_secs: 1800,
            max_sessions: 1000,
        }
    }
}

impl ConversationSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".to_string() }
    }
}

impl Settings {
    /// Loads `.env`, the optional settings file and `CV_RAG__*` variables,
    /// then validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let path = std::env::var("CV_RAG_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let settings: Settings = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("CV_RAG")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("provider.api_keys")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from TOML text without touching the environment.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.provider.api_keys.iter().any(|k| !k.trim().is_empty()) {
            return Err(ConfigError::MissingApiKey);
        }
        if self.index.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "index.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "retrieval.top_k",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.conversation.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                key: "conversation.max_sessions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.provider.max_embedding_chars == 0 {
            return Err(ConfigError::Invalid {
                key: "provider.max_embedding_chars",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let settings = Settings::from_toml(
            r#"
            [provider]
            api_keys = ["sk-test"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.index.batch_size, 5);
        assert_eq!(settings.index.batch_delay(), Duration::from_millis(1000));
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.conversation.history_window, 4);
        assert_eq!(settings.provider.max_embedding_chars, 8000);
        assert_eq!(settings.conversation.session_ttl(), Duration::from_secs(1800));
        assert_eq!(settings.conversation.max_sessions, 1000);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_toml(
            r#"
            [provider]
            api_keys = ["a", "b"]
            chat_model = "claude-3-haiku"

            [index]
            batch_size = 10
            batch_delay_ms = 250

            [retrieval]
            top_k = 5
            "#,
        )
        .unwrap();

        assert_eq!(settings.provider.api_keys.len(), 2);
        assert_eq!(settings.provider.chat_model, "claude-3-haiku");
        assert_eq!(settings.index.batch_size, 10);
        assert_eq!(settings.retrieval.top_k, 5);
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let err = Settings::from_toml("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let err = Settings::from_toml("[provider]\napi_keys = [\"  \"]").unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = Settings::from_toml(
            r#"
            [provider]
            api_keys = ["k"]
            [index]
            batch_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "index.batch_size", .. }));
    }

    #[test]
    fn test_zero_max_sessions_rejected() {
        let err = Settings::from_toml(
            r#"
            [provider]
            api_keys = ["k"]
            [conversation]
            max_sessions = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "conversation.max_sessions", .. }));
    }
}

use thiserror::Error;

/// Embedding and generation failures are values, not aborts: the caller
/// decides whether to drop the unit of work or fall back.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("provider returned an empty response")]
    Empty,
}

impl ProviderError {
    pub fn is_key_rejection(&self) -> bool {
        matches!(self, ProviderError::Status { status: 401 | 403 | 429, .. })
    }
}

/// Unrecoverable setup problems, raised before any processing starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no provider API key configured")]
    MissingApiKey,
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failure to read or write the cache slot. Callers treat it as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

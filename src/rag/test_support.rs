//! Deterministic providers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{CandidateRecord, Message, Skill};
use crate::proxy::ChatProvider;

use super::embeddings::EmbeddingProvider;

const VOCABULARY: &[&str] = &[
    "python", "machine learning", "ml", "java", "spring", "react", "javascript", "design",
    "figma", "sales", "marketing", "rust", "developer", "data",
];

/// Bag-of-keywords embedder: one dimension per vocabulary term.
#[derive(Default)]
pub struct KeywordEmbedder {
    /// Texts containing this marker fail to embed.
    pub fail_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn failing_on(marker: &str) -> Self {
        Self { fail_marker: Some(marker.to_string()), ..Default::default() }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(ProviderError::Status { status: 503, body: "unavailable".to_string() });
            }
        }
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = VOCABULARY
            .iter()
            .map(|term| lower.matches(term).count() as f32)
            .collect();
        // Constant component keeps every vector non-zero.
        vector.push(0.1);
        Ok(vector)
    }

    fn model(&self) -> &str {
        "keyword-test"
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Status { status: 500, body: "boom".to_string() })
    }

    fn model(&self) -> &str {
        "failing-test"
    }
}

/// Chat provider that records every prompt and answers with a fixed reply.
pub struct RecordingChat {
    pub reply: Option<String>,
    pub prompts: Mutex<Vec<Vec<Message>>>,
}

impl RecordingChat {
    pub fn replying(reply: &str) -> Self {
        Self { reply: Some(reply.to_string()), prompts: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self { reply: None, prompts: Mutex::new(Vec::new()) }
    }

    pub fn last_prompt(&self) -> Vec<Message> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for RecordingChat {
    async fn complete(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(messages);
        self.reply.clone().ok_or(ProviderError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        })
    }
}

pub fn candidate(name: &str, profession: &str, country: &str, skills: &[&str]) -> CandidateRecord {
    CandidateRecord {
        name: Some(name.to_string()),
        profession: Some(profession.to_string()),
        country: Some(country.to_string()),
        email: Some(format!("{}@example.com", name.to_lowercase().replace(' ', "."))),
        phone_number: Some("+1 415 555 0100".to_string()),
        skills: skills.iter().map(|s| Skill::Plain(s.to_string())).collect(),
        ..Default::default()
    }
}

/// Five candidates, two of them with Python.
pub fn sample_dataset() -> Vec<CandidateRecord> {
    vec![
        candidate("Asha Rao", "Data Scientist", "India", &["Python", "Machine Learning"]),
        candidate("Ben Ortiz", "Frontend Engineer", "Spain", &["React", "JavaScript"]),
        candidate("Chen Wei", "Backend Developer", "China", &["Python", "Django"]),
        candidate("Dana Kim", "Product Designer", "Korea", &["Figma", "Design"]),
        candidate("Eli Novak", "Account Executive", "Czechia", &["Sales", "Marketing"]),
    ]
}

/// Serves `router` on an ephemeral local port; returns its base URL.
pub(crate) async fn serve_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Bearer token of a stubbed request, empty when absent.
pub(crate) fn bearer(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string()
}

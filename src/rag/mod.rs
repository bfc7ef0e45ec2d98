pub mod chunker;
pub mod context;
pub mod conversation;
pub mod embeddings;
pub mod index_builder;
pub mod index_cache;
pub mod index_manager;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::models::{CandidateRecord, RetrievedCandidate};
use crate::proxy::ChatProvider;
use self::context::{
    assemble_messages, provenance_note, sanitize_retrieved, system_instruction, DatasetSummary,
    FALLBACK_REPLY, INDEX_BUILDING_REPLY, NO_DATASET_REPLY, NO_MATCH_REPLY,
};
use self::conversation::ConversationState;
use self::embeddings::EmbeddingProvider;
use self::index_manager::{IndexManager, QueryIndex};
use self::vector_store::{search, VectorIndex};

#[derive(Debug, Clone)]
pub struct Dataset {
    pub records: Vec<CandidateRecord>,
    pub fingerprint: String,
    pub summary: DatasetSummary,
}

impl Dataset {
    pub fn new(records: Vec<CandidateRecord>) -> Self {
        let fingerprint = index_cache::fingerprint(&records);
        let summary = DatasetSummary::from_records(&records);
        Self { records, fingerprint, summary }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Answered,
    NoMatch,
    Fallback,
    /// No dataset loaded, or its first index is still building.
    NotReady,
}

impl ReplyKind {
    pub fn keeps_history(self) -> bool {
        !matches!(self, ReplyKind::NotReady)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    /// Text for the user, including the provenance note.
    pub text: String,
    /// The model's answer alone; this is what goes into the history.
    pub answer: String,
    pub retrieved: Vec<RetrievedCandidate>,
    pub kind: ReplyKind,
}

impl AssistantReply {
    fn canned(text: &str, kind: ReplyKind, retrieved: Vec<RetrievedCandidate>) -> Self {
        Self {
            text: text.to_string(),
            answer: text.to_string(),
            retrieved,
            kind,
        }
    }
}

pub struct RAGEngine {
    embeddings: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatProvider>,
    index_manager: Arc<IndexManager>,
    dataset: RwLock<Option<Arc<Dataset>>>,
    top_k: usize,
    history_window: usize,
}

impl RAGEngine {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
        index_manager: Arc<IndexManager>,
        top_k: usize,
        history_window: usize,
    ) -> Self {
        Self {
            embeddings,
            chat,
            index_manager,
            dataset: RwLock::new(None),
            top_k,
            history_window,
        }
    }

    pub fn index_manager(&self) -> &Arc<IndexManager> {
        &self.index_manager
    }

    pub async fn dataset(&self) -> Option<Arc<Dataset>> {
        self.dataset.read().await.clone()
    }

    /// Makes `records` the active dataset. The index is built lazily on the
    /// first question, or eagerly via [`RAGEngine::spawn_index_build`].
    pub async fn load_dataset(&self, records: Vec<CandidateRecord>) -> Arc<Dataset> {
        let dataset = Arc::new(Dataset::new(records));
        self.index_manager.select_dataset(&dataset.fingerprint).await;
        *self.dataset.write().await = Some(dataset.clone());
        tracing::info!("Active dataset: {} records", dataset.records.len());
        dataset
    }

    pub fn spawn_index_build(&self, dataset: Arc<Dataset>) -> JoinHandle<()> {
        let manager = self.index_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.ensure_index(&dataset).await {
                tracing::warn!("Background index build failed: {}", e);
            }
        })
    }

    pub async fn ask(&self, history: &ConversationState, user_message: &str) -> AssistantReply {
        let Some(dataset) = self.dataset().await else {
            return AssistantReply::canned(NO_DATASET_REPLY, ReplyKind::NotReady, Vec::new());
        };
        let index = match self.index_manager.index_for_query(&dataset).await {
            QueryIndex::Ready(index) => index,
            QueryIndex::Building => {
                tracing::info!("Index still building, question not searched");
                return AssistantReply::canned(
                    INDEX_BUILDING_REPLY,
                    ReplyKind::NotReady,
                    Vec::new(),
                );
            }
            QueryIndex::Unavailable => {
                return AssistantReply::canned(FALLBACK_REPLY, ReplyKind::Fallback, Vec::new());
            }
        };
        self.respond(user_message, &index, &dataset.summary, history).await
    }

    pub async fn respond(
        &self,
        user_message: &str,
        index: &VectorIndex,
        summary: &DatasetSummary,
        history: &ConversationState,
    ) -> AssistantReply {
        let ranked = search(self.embeddings.as_ref(), user_message, index, self.top_k).await;
        if ranked.is_empty() {
            tracing::info!("No candidates retrieved, answering without the model");
            return AssistantReply::canned(NO_MATCH_REPLY, ReplyKind::NoMatch, Vec::new());
        }

        let records = sanitize_retrieved(&ranked);
        let retrieved: Vec<RetrievedCandidate> = records.iter().map(|r| r.provenance()).collect();

        let system = system_instruction(summary, &records);
        let window = history.window(self.history_window);
        let messages = assemble_messages(system, window, user_message);
        tracing::debug!(
            "Prompting model with {} retrieved records and {} history turns",
            records.len(),
            window.len()
        );

        match self.chat.complete(messages).await {
            Ok(answer) => AssistantReply {
                text: format!("{}{}", answer, provenance_note(&records)),
                answer,
                retrieved,
                kind: ReplyKind::Answered,
            },
            Err(e) => {
                tracing::error!("Generation failed: {}", e);
                AssistantReply::canned(FALLBACK_REPLY, ReplyKind::Fallback, retrieved)
            }
        }
    }
}

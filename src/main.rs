use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use cv_rag::config::Settings;
use cv_rag::models::{AskRequest, AskResponse, CandidateRecord, DatasetResponse};
use cv_rag::proxy::{KeyRing, LiteLLMProxy};
use cv_rag::rag::conversation::{SessionLimits, SessionStore};
use cv_rag::rag::embeddings::EmbeddingGenerator;
use cv_rag::rag::index_builder::BatchPolicy;
use cv_rag::rag::index_cache::IndexCache;
use cv_rag::rag::index_manager::{IndexManager, IndexStatus};
use cv_rag::rag::RAGEngine;

struct AppState {
    rag_engine: RAGEngine,
    litellm_proxy: Arc<LiteLLMProxy>,
    sessions: SessionStore,
}

#[tokio::main]
async fn main() -> Result<()> {
    cv_rag::init_tracing();

    // Missing credentials or bad tunables stop startup here.
    let settings = Settings::load()?;

    tracing::info!("Provider gateway: {}", settings.provider.base_url);
    tracing::info!("Index cache: {}", settings.index.cache_path.display());

    let keys = Arc::new(KeyRing::new(settings.provider.api_keys.clone())?);
    tracing::info!("{} provider API key(s) configured", keys.len());

    let embeddings = Arc::new(EmbeddingGenerator::new(&settings.provider, keys.clone())?);
    let litellm_proxy = Arc::new(LiteLLMProxy::new(
        &settings.provider,
        &settings.conversation,
        keys,
    )?);
    let index_manager = Arc::new(IndexManager::new(
        embeddings.clone(),
        IndexCache::new(&settings.index.cache_path),
        BatchPolicy::from(&settings.index),
    ));
    let rag_engine = RAGEngine::new(
        embeddings,
        litellm_proxy.clone(),
        index_manager,
        settings.retrieval.top_k,
        settings.conversation.history_window,
    );

    let state = Arc::new(AppState {
        rag_engine,
        litellm_proxy,
        sessions: SessionStore::new(SessionLimits::from(&settings.conversation)),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/dataset", post(load_dataset_handler))
        .route("/api/v1/ask", post(ask_handler))
        .route("/api/v1/sessions/:id", delete(reset_session_handler))
        .route("/api/v1/index/status", get(index_status_handler))
        .route("/api/v1/index/rebuild", post(rebuild_index_handler))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn load_dataset_handler(
    State(state): State<Arc<AppState>>,
    Json(records): Json<Vec<CandidateRecord>>,
) -> Json<DatasetResponse> {
    let dataset = state.rag_engine.load_dataset(records).await;
    // Warm the index now so the first question does not pay for the build.
    state.rag_engine.spawn_index_build(dataset.clone());

    Json(DatasetResponse {
        fingerprint: dataset.fingerprint.clone(),
        records: dataset.records.len(),
    })
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message must not be empty".to_string()));
    }

    let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
    let history = state.sessions.snapshot(session_id).await;

    let reply = state.rag_engine.ask(&history, message).await;
    if reply.kind.keeps_history() {
        state.sessions.append(session_id, message, &reply.answer).await;
    }

    tracing::info!(
        "Session {}: {:?} with {} retrieved candidates",
        session_id,
        reply.kind,
        reply.retrieved.len()
    );

    Ok(Json(AskResponse {
        session_id,
        reply: reply.text,
        retrieved: reply.retrieved,
    }))
}

async fn reset_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.sessions.reset(id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn index_status_handler(State(state): State<Arc<AppState>>) -> Json<IndexStatus> {
    Json(state.rag_engine.index_manager().get_status().await)
}

async fn rebuild_index_handler(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let dataset = state
        .rag_engine
        .dataset()
        .await
        .ok_or((StatusCode::CONFLICT, "No dataset loaded".to_string()))?;

    if state.rag_engine.index_manager().is_indexing().await {
        return Err((StatusCode::CONFLICT, "Indexing already in progress".to_string()));
    }

    let manager = state.rag_engine.index_manager().clone();
    tokio::spawn(async move {
        if let Err(e) = manager.rebuild(&dataset).await {
            tracing::error!("Index rebuild failed: {}", e);
        }
    });

    Ok(StatusCode::ACCEPTED)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let gateway_healthy = state.litellm_proxy.health_check().await;
    let status = state.rag_engine.index_manager().get_status().await;

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "gateway": gateway_healthy,
            "index_entries": status.total_entries,
            "indexing": status.is_indexing,
        }
    }))
}

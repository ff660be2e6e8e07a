use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::proxy::handlers;
use crate::proxy::memory::MemoryRegulator;
use crate::proxy::middleware::auth::require_api_key;
use crate::proxy::signature_cache::SignatureCache;
use crate::proxy::state::{AppState, CoreServices};
use crate::proxy::token::{CredentialStore, QuotaCache, TokenManager};
use crate::proxy::upstream::UpstreamClient;

async fn health_handler(State(core): State<Arc<CoreServices>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime": core.started_at.elapsed().as_secs(),
    }))
}

async fn memory_handler(State(core): State<Arc<CoreServices>>) -> Json<Value> {
    Json(json!({
        "report": core.memory.report(),
        "credentials": core.token_manager.len().await,
    }))
}

pub fn build_router(state: AppState) -> Router {
    let config = state.core.config.clone();

    let protected = Router::new()
        .route("/v1/memory", get(memory_handler))
        .route("/v1/models", get(handlers::openai::handle_list_models))
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route("/v1/messages", post(handlers::claude::handle_messages))
        .route("/v1beta/models", get(handlers::gemini::handle_list_models))
        .route(
            "/v1beta/models/:model",
            get(handlers::gemini::handle_get_model).post(handlers::gemini::handle_model_action),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            config,
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
}

/// Wires the process-wide services: store, rotator, caches, regulator, and
/// their subscriptions.
pub async fn build_services(config: AppConfig) -> AppResult<Arc<CoreServices>> {
    let config = Arc::new(config);
    let store = Arc::new(CredentialStore::new(config.accounts_path()));
    let upstream = Arc::new(UpstreamClient::new());
    let signatures = Arc::new(SignatureCache::new());
    let quota = Arc::new(QuotaCache::new(config.quotas_path()));
    let memory = Arc::new(MemoryRegulator::new(config.memory_high_mb));

    memory.subscribe(quota.clone());
    memory.subscribe(signatures.clone());

    let token_manager = Arc::new(TokenManager::new(
        store,
        upstream.clone(),
        config.rotation.clone(),
        config.skip_project_discovery,
    ));
    match token_manager.load().await {
        Ok(0) => warn!("[W-CRED-EMPTY] no credentials on disk; every chat call will 500"),
        Ok(_) => {}
        Err(e) => return Err(AppError::Credential(e)),
    }

    Ok(Arc::new(CoreServices {
        config,
        token_manager,
        upstream,
        signatures,
        quota,
        memory,
        started_at: Instant::now(),
    }))
}

pub async fn start(config: AppConfig) -> AppResult<()> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let core = build_services(config).await?;

    let cancel = CancellationToken::new();
    core.memory.clone().start(cancel.clone());
    core.quota.clone().start_sweeper(cancel.clone());

    let router = build_router(AppState { core: core.clone() });
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    cancel.cancel();
    core.quota.persist().await;
    Ok(())
}

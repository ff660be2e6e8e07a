use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::proxy::memory::MemoryRegulator;
use crate::proxy::signature_cache::SignatureCache;
use crate::proxy::token::{QuotaCache, TokenManager};
use crate::proxy::upstream::UpstreamClient;

/// Process-wide services, constructed once at startup and passed down.
pub struct CoreServices {
    pub config: Arc<AppConfig>,
    pub token_manager: Arc<TokenManager>,
    pub upstream: Arc<UpstreamClient>,
    pub signatures: Arc<SignatureCache>,
    pub quota: Arc<QuotaCache>,
    pub memory: Arc<MemoryRegulator>,
    pub started_at: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<CoreServices>,
}

impl axum::extract::FromRef<AppState> for Arc<CoreServices> {
    fn from_ref(state: &AppState) -> Self {
        state.core.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.core.config.clone()
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::auth::oauth;
use crate::config::{RotationConfig, RotationStrategy};
use crate::proxy::token::store::CredentialStore;
use crate::proxy::token::types::{now_ms, Credential};
use crate::proxy::upstream::UpstreamClient;

struct RotationState {
    current_index: usize,
    request_count: HashMap<String, u32>,
}

/// Credential pool and rotator. Owns the in-memory credential list and all
/// rotation state; the store is the single disk writer it delegates to.
///
/// The rotation mutex is held across the whole selection (including refresh
/// I/O), so concurrent `get_token` calls serialize and never observe a
/// half-committed index.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    upstream: Arc<UpstreamClient>,
    credentials: RwLock<Vec<Credential>>,
    rotation: Mutex<RotationState>,
    rotation_config: RwLock<RotationConfig>,
    token_url: String,
    skip_project_discovery: bool,
}

impl TokenManager {
    pub fn new(
        store: Arc<CredentialStore>,
        upstream: Arc<UpstreamClient>,
        rotation_config: RotationConfig,
        skip_project_discovery: bool,
    ) -> Self {
        Self {
            store,
            upstream,
            credentials: RwLock::new(Vec::new()),
            rotation: Mutex::new(RotationState {
                current_index: 0,
                request_count: HashMap::new(),
            }),
            rotation_config: RwLock::new(rotation_config),
            token_url: crate::constants::OAUTH_TOKEN_URL.to_string(),
            skip_project_discovery,
        }
    }

    #[cfg(test)]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub async fn load(&self) -> Result<usize, String> {
        let loaded = self.store.load()?;
        let count = loaded.len();
        *self.credentials.write().await = loaded;
        info!("Loaded {} credential(s) from {}", count, self.store.path().display());
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }

    pub async fn credentials_snapshot(&self) -> Vec<Credential> {
        self.credentials.read().await.clone()
    }

    /// Returns a live credential ready to call upstream, or None when the
    /// pool is exhausted.
    pub async fn get_token(&self) -> Option<Credential> {
        let mut rotation = self.rotation.lock().await;
        self.select(&mut rotation, true).await
    }

    async fn select(&self, rotation: &mut RotationState, allow_reset: bool) -> Option<Credential> {
        let config = self.rotation_config.read().await.clone();
        let total = self.credentials.read().await.len();
        if total == 0 {
            return None;
        }

        let mut live_seen = 0usize;
        let mut skipped_for_quota = 0usize;

        for offset in 0..total {
            let idx = (rotation.current_index + offset) % total;
            let mut cred = { self.credentials.read().await[idx].clone() };

            if !cred.enable {
                continue;
            }
            live_seen += 1;

            if config.strategy == RotationStrategy::QuotaExhausted && !cred.has_quota {
                skipped_for_quota += 1;
                continue;
            }

            if cred.is_expired(now_ms()) {
                match oauth::refresh_access_token_at(&self.token_url, &cred.refresh_token).await {
                    Ok(token) => {
                        cred.apply_refresh(token.access_token, token.expires_in, now_ms());
                        self.commit(&cred).await;
                    }
                    Err(failure) if failure.is_fatal() => {
                        warn!(
                            "[E-CRED-REFRESH-FATAL] disabling credential {}: {}",
                            cred.email, failure
                        );
                        cred.enable = false;
                        self.commit(&cred).await;
                        continue;
                    }
                    Err(failure) => {
                        warn!(
                            "[W-CRED-REFRESH] skipping credential {} this attempt: {}",
                            cred.email, failure
                        );
                        continue;
                    }
                }
            }

            if cred.project_id.is_none() {
                if self.skip_project_discovery {
                    let mock = generate_mock_project_id();
                    debug!("Synthesized project id {} for {}", mock, cred.email);
                    cred.project_id = Some(mock);
                    self.commit(&cred).await;
                } else {
                    match self.upstream.discover_project_id(&cred.access_token).await {
                        Ok(Some(project_id)) => {
                            cred.project_id = Some(project_id);
                            self.commit(&cred).await;
                        }
                        Ok(None) => {
                            warn!(
                                "[E-CRED-INELIGIBLE] account {} has no cloudaicompanionProject, disabling",
                                cred.email
                            );
                            cred.enable = false;
                            self.commit(&cred).await;
                            continue;
                        }
                        Err(e) => {
                            warn!(
                                "[W-CRED-PROJECT] project discovery failed for {}, skipping: {}",
                                cred.email, e
                            );
                            continue;
                        }
                    }
                }
            }

            rotation.current_index = idx;
            self.post_advance(rotation, &config, idx, total, &cred.refresh_token);
            return Some(cred);
        }

        // Best-effort "new billing window" guess: when every live credential
        // sat out for quota, restore them all and take the scan from the top.
        if allow_reset
            && config.strategy == RotationStrategy::QuotaExhausted
            && live_seen > 0
            && skipped_for_quota == live_seen
        {
            info!("[W-QUOTA-RESET] all credentials quota-exhausted, optimistically restoring");
            self.restore_all_quota().await;
            rotation.current_index = 0;
            return Box::pin(self.select(rotation, false)).await;
        }

        None
    }

    fn post_advance(
        &self,
        rotation: &mut RotationState,
        config: &RotationConfig,
        idx: usize,
        total: usize,
        refresh_token: &str,
    ) {
        match config.strategy {
            RotationStrategy::RoundRobin | RotationStrategy::QuotaExhausted => {
                rotation.current_index = (idx + 1) % total;
            }
            RotationStrategy::RequestCount => {
                // Counting happens here, once per successful selection;
                // skipped or disabled credentials never consume budget.
                let counter = rotation
                    .request_count
                    .entry(refresh_token.to_string())
                    .or_insert(0);
                *counter += 1;
                if *counter >= config.request_count_per_token.max(1) {
                    *counter = 0;
                    rotation.current_index = (idx + 1) % total;
                }
            }
        }
    }

    pub async fn disable_token(&self, refresh_token: &str) {
        self.mutate(refresh_token, |cred| cred.enable = false).await;
    }

    pub async fn mark_quota_exhausted(&self, refresh_token: &str) {
        self.mutate(refresh_token, |cred| cred.has_quota = false).await;
    }

    pub async fn restore_quota(&self, refresh_token: &str) {
        self.mutate(refresh_token, |cred| cred.has_quota = true).await;
    }

    /// Hot-swaps the strategy. Rotation counters and the index reset whenever
    /// the configuration changes.
    pub async fn update_rotation_config(
        &self,
        strategy: RotationStrategy,
        request_count_per_token: u32,
    ) {
        {
            let mut config = self.rotation_config.write().await;
            config.strategy = strategy;
            config.request_count_per_token = request_count_per_token;
        }
        let mut rotation = self.rotation.lock().await;
        rotation.current_index = 0;
        rotation.request_count.clear();
        info!("Rotation config updated: {:?}", strategy);
    }

    async fn restore_all_quota(&self) {
        let snapshot = {
            let mut credentials = self.credentials.write().await;
            for cred in credentials.iter_mut() {
                cred.has_quota = true;
            }
            credentials.clone()
        };
        if let Err(e) = self.store.persist_all(&snapshot).await {
            warn!("[W-CRED-PERSIST] failed to persist quota reset: {}", e);
        }
    }

    async fn mutate(&self, refresh_token: &str, apply: impl FnOnce(&mut Credential)) {
        let updated = {
            let mut credentials = self.credentials.write().await;
            match credentials
                .iter_mut()
                .find(|c| c.refresh_token == refresh_token)
            {
                Some(cred) => {
                    apply(cred);
                    Some(cred.clone())
                }
                None => None,
            }
        };
        if let Some(cred) = updated {
            if let Err(e) = self.store.persist_one(&cred).await {
                warn!("[W-CRED-PERSIST] failed to persist {}: {}", cred.email, e);
            }
        }
    }

    async fn commit(&self, cred: &Credential) {
        {
            let mut credentials = self.credentials.write().await;
            if let Some(row) = credentials
                .iter_mut()
                .find(|c| c.refresh_token == cred.refresh_token)
            {
                *row = cred.clone();
            }
        }
        if let Err(e) = self.store.persist_one(cred).await {
            warn!("[W-CRED-PERSIST] failed to persist {}: {}", cred.email, e);
        }
    }
}

/// Fallback project id in `{adjective}-{noun}-{5 random base36}` form for
/// deployments that skip discovery.
pub fn generate_mock_project_id() -> String {
    use rand::Rng;

    const ADJECTIVES: [&str; 5] = ["useful", "bright", "swift", "calm", "bold"];
    const NOUNS: [&str; 5] = ["fuze", "wave", "spark", "flow", "core"];
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::thread_rng();
    let adj = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix: String = (0..5)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();

    format!("{}-{}-{}", adj, noun, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Form, Json, Router};
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;
    use tokio::net::TcpListener;

    fn fresh_credential(tag: &str) -> Credential {
        let mut cred = Credential::new(format!("rt-{}", tag));
        cred.email = format!("{}@test", tag);
        cred.project_id = Some(format!("project-{}", tag));
        cred.apply_refresh(format!("at-{}", tag), 3600, now_ms());
        cred
    }

    fn temp_store() -> Arc<CredentialStore> {
        let path = std::env::temp_dir()
            .join(format!("apogee-manager-{}", uuid::Uuid::new_v4()))
            .join("accounts.json");
        Arc::new(CredentialStore::new(path))
    }

    async fn manager_with(
        credentials: Vec<Credential>,
        config: RotationConfig,
    ) -> TokenManager {
        let store = temp_store();
        store.persist_all(&credentials).await.expect("seed store");
        let manager = TokenManager::new(
            store,
            Arc::new(UpstreamClient::new()),
            config,
            true,
        );
        manager.load().await.expect("load");
        manager
    }

    #[tokio::test]
    async fn round_robin_is_fair_over_ten_rounds() {
        let n = 3;
        let creds: Vec<_> = (0..n).map(|i| fresh_credential(&i.to_string())).collect();
        let manager = manager_with(creds, RotationConfig::default()).await;

        let mut counts: StdHashMap<String, u32> = StdHashMap::new();
        for _ in 0..(10 * n) {
            let cred = manager.get_token().await.expect("live credential");
            *counts.entry(cred.refresh_token).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), n);
        for (_, count) in counts {
            assert!(count >= 8, "fairness bound violated: {}", count);
        }
    }

    #[tokio::test]
    async fn quota_exhausted_skips_and_optimistically_resets() {
        let mut creds: Vec<_> = (0..3).map(|i| fresh_credential(&i.to_string())).collect();
        creds[1].has_quota = false;
        let manager = manager_with(
            creds,
            RotationConfig {
                strategy: RotationStrategy::QuotaExhausted,
                request_count_per_token: 10,
            },
        )
        .await;

        let first = manager.get_token().await.unwrap();
        assert_eq!(first.refresh_token, "rt-0");
        let second = manager.get_token().await.unwrap();
        assert_eq!(second.refresh_token, "rt-2");

        manager.mark_quota_exhausted("rt-0").await;
        let third = manager.get_token().await.unwrap();
        assert_eq!(third.refresh_token, "rt-2");

        manager.mark_quota_exhausted("rt-2").await;
        let fourth = manager.get_token().await.unwrap();
        assert_eq!(fourth.refresh_token, "rt-0");
        for cred in manager.credentials_snapshot().await {
            assert!(cred.has_quota, "optimistic reset should restore {}", cred.email);
        }
    }

    #[tokio::test]
    async fn request_count_rotates_after_budget_consumed() {
        let creds: Vec<_> = (0..2).map(|i| fresh_credential(&i.to_string())).collect();
        let manager = manager_with(
            creds,
            RotationConfig {
                strategy: RotationStrategy::RequestCount,
                request_count_per_token: 2,
            },
        )
        .await;

        let mut sequence = Vec::new();
        for _ in 0..6 {
            sequence.push(manager.get_token().await.unwrap().refresh_token);
        }
        assert_eq!(sequence, vec!["rt-0", "rt-0", "rt-1", "rt-1", "rt-0", "rt-0"]);
    }

    #[tokio::test]
    async fn disabled_credentials_are_never_returned() {
        let mut creds: Vec<_> = (0..2).map(|i| fresh_credential(&i.to_string())).collect();
        creds[0].enable = false;
        let manager = manager_with(creds, RotationConfig::default()).await;

        for _ in 0..4 {
            assert_eq!(manager.get_token().await.unwrap().refresh_token, "rt-1");
        }
    }

    #[tokio::test]
    async fn empty_pool_returns_none() {
        let manager = manager_with(Vec::new(), RotationConfig::default()).await;
        assert!(manager.get_token().await.is_none());
    }

    #[tokio::test]
    async fn strategy_change_resets_rotation_state() {
        let creds: Vec<_> = (0..2).map(|i| fresh_credential(&i.to_string())).collect();
        let manager = manager_with(creds, RotationConfig::default()).await;

        assert_eq!(manager.get_token().await.unwrap().refresh_token, "rt-0");
        manager
            .update_rotation_config(RotationStrategy::RoundRobin, 10)
            .await;
        // Index reset: the scan starts over at the first credential.
        assert_eq!(manager.get_token().await.unwrap().refresh_token, "rt-0");
    }

    #[derive(serde::Deserialize)]
    struct TokenForm {
        refresh_token: String,
    }

    async fn start_mock_token_endpoint() -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new().route(
            "/token",
            post(|Form(form): Form<TokenForm>| async move {
                if form.refresh_token == "rt-dead" {
                    (
                        axum::http::StatusCode::BAD_REQUEST,
                        Json(json!({"error": "invalid_grant"})),
                    )
                } else {
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({"access_token": "at-new", "expires_in": 3600})),
                    )
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{}/token", addr), server)
    }

    #[tokio::test]
    async fn fatal_refresh_disables_credential_on_disk_and_moves_on() {
        let (token_url, server) = start_mock_token_endpoint().await;

        let mut dead = Credential::new("rt-dead");
        dead.email = "dead@test".to_string();
        dead.project_id = Some("project-dead".to_string());
        // Expired: timestamp far in the past.
        let live = fresh_credential("live");

        let store = temp_store();
        store
            .persist_all(&[dead, live])
            .await
            .expect("seed store");
        let manager = TokenManager::new(
            store.clone(),
            Arc::new(UpstreamClient::new()),
            RotationConfig::default(),
            true,
        )
        .with_token_url(token_url);
        manager.load().await.expect("load");

        let picked = manager.get_token().await.expect("live credential");
        server.abort();
        assert_eq!(picked.refresh_token, "rt-live");

        // The dead row survives on disk, disabled.
        let rows = store.load().expect("reload");
        let dead_row = rows.iter().find(|c| c.refresh_token == "rt-dead").unwrap();
        assert!(!dead_row.enable);
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_and_persisted() {
        let (token_url, server) = start_mock_token_endpoint().await;

        let mut stale = Credential::new("rt-stale");
        stale.email = "stale@test".to_string();
        stale.project_id = Some("project-stale".to_string());
        stale.apply_refresh("at-old".to_string(), 3600, now_ms() - 4000 * 1000);
        assert!(stale.is_expired(now_ms()));

        let store = temp_store();
        store.persist_all(&[stale]).await.expect("seed store");
        let manager = TokenManager::new(
            store.clone(),
            Arc::new(UpstreamClient::new()),
            RotationConfig::default(),
            true,
        )
        .with_token_url(token_url);
        manager.load().await.expect("load");

        let picked = manager.get_token().await.expect("refreshed credential");
        server.abort();
        assert_eq!(picked.access_token, "at-new");
        assert!(!picked.is_expired(now_ms()));

        let rows = store.load().expect("reload");
        assert_eq!(rows[0].access_token, "at-new");
    }

    #[test]
    fn mock_project_id_has_expected_shape() {
        let id = generate_mock_project_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 5);
    }
}

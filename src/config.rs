use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Strategy used by the credential rotator to pick the next account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    QuotaExhausted,
    RequestCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub strategy: RotationStrategy,
    /// Only meaningful for `request_count`: how many requests one credential
    /// serves before the rotator advances.
    pub request_count_per_token: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::RoundRobin,
            request_count_per_token: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Shared-secret gate for every /v1 and /v1beta route. Empty disables the
    /// check entirely.
    pub api_key: String,
    /// Directory holding accounts.json and quotas.json.
    pub data_dir: PathBuf,
    pub rotation: RotationConfig,
    /// 429-only retry budget for one inbound chat request.
    pub retry_times: u32,
    pub heartbeat_interval_secs: u64,
    /// When false, thoughtSignature / signature fields are stripped from every
    /// outbound payload on all three surfaces.
    pub pass_signature_to_client: bool,
    /// Heap threshold (MB) the memory regulator derives its four tiers from.
    pub memory_high_mb: u64,
    /// Process-wide system prompt concatenated in front of caller-supplied
    /// system text.
    pub system_instruction: String,
    /// Skip the loadCodeAssist project lookup and synthesize a random project
    /// id for credentials that lack one.
    pub skip_project_discovery: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8045,
            api_key: String::new(),
            data_dir: PathBuf::from("data"),
            rotation: RotationConfig::default(),
            retry_times: 3,
            heartbeat_interval_secs: 15,
            pass_signature_to_client: true,
            memory_high_mb: 200,
            system_instruction: String::new(),
            skip_project_discovery: false,
        }
    }
}

impl AppConfig {
    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    pub fn quotas_path(&self) -> PathBuf {
        self.data_dir.join("quotas.json")
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

/// Reads config.json if present, otherwise falls back to defaults. Missing
/// keys take their default value, so partial files are fine.
pub fn load_config(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::Config(format!("invalid config file {}: {}", path.display(), e)))
}

pub fn validate_config(config: &AppConfig) -> AppResult<()> {
    if config.port == 0 {
        return Err(AppError::Config("port must be non-zero".to_string()));
    }
    if config.memory_high_mb == 0 {
        return Err(AppError::Config(
            "memory_high_mb must be non-zero".to_string(),
        ));
    }
    if config.rotation.strategy == RotationStrategy::RequestCount
        && config.rotation.request_count_per_token == 0
    {
        return Err(AppError::Config(
            "request_count_per_token must be non-zero for the request_count strategy".to_string(),
        ));
    }
    Ok(())
}

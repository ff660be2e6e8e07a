mod auth;
pub mod config;
pub mod constants;
pub mod error;
mod logger;
pub mod proxy;
mod utils;

use tracing::{error, info, warn};

use config::AppConfig;

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(key) = std::env::var("API_KEY") {
        if !key.trim().is_empty() {
            info!("Using API key from environment");
            config.api_key = key;
        }
    }

    if let Ok(port) = std::env::var("PORT") {
        let trimmed = port.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<u16>() {
                Ok(p) if p > 0 => {
                    config.port = p;
                    info!("Using port from environment: {}", p);
                }
                _ => warn!("[W-PORT-INVALID] ignoring invalid port value: {}", port),
            }
        }
    }

    if let Ok(dir) = std::env::var("APOGEE_DATA_DIR") {
        if !dir.trim().is_empty() {
            config.data_dir = std::path::PathBuf::from(dir);
        }
    }

    if let Ok(host) = std::env::var("APOGEE_HOST") {
        if !host.trim().is_empty() {
            config.host = host;
        }
    }
}

pub fn run() {
    logger::init_logger();

    let config_path = std::env::var("APOGEE_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("config.json"));

    let mut config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("[E-CONFIG-LOAD] {}", e);
            std::process::exit(1);
        }
    };
    apply_env_overrides(&mut config);
    if let Err(e) = config::validate_config(&config) {
        error!("[E-CONFIG-INVALID] {}", e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("[E-RUNTIME-INIT] failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(async {
        if let Err(e) = proxy::server::start(config).await {
            error!("[E-RUNTIME-STARTUP] {}", e);
            std::process::exit(1);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct ScopedEnvVar {
        key: &'static str,
        previous: Option<String>,
    }

    impl ScopedEnvVar {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for ScopedEnvVar {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn env_port_overrides_config_port() {
        let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _port = ScopedEnvVar::set("PORT", "8046");

        let mut config = AppConfig::default();
        config.port = 9999;
        apply_env_overrides(&mut config);

        assert_eq!(config.port, 8046);
    }

    #[test]
    fn invalid_env_port_is_ignored() {
        let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _port = ScopedEnvVar::set("PORT", "not-a-port");

        let mut config = AppConfig::default();
        config.port = 9999;
        apply_env_overrides(&mut config);

        assert_eq!(config.port, 9999);
    }

    #[test]
    fn env_api_key_overrides_config() {
        let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _key = ScopedEnvVar::set("API_KEY", "env-secret");

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);

        assert_eq!(config.api_key, "env-secret");
    }
}

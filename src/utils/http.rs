use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

#[cfg(not(any(feature = "tls-native", feature = "tls-rustls")))]
compile_error!("one TLS backend feature must be enabled: `tls-native` or `tls-rustls`");

pub fn apply_tls_backend(builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
    #[cfg(all(feature = "tls-rustls", not(feature = "tls-native")))]
    {
        builder.use_rustls_tls()
    }
    #[cfg(feature = "tls-native")]
    {
        builder
    }
}

/// Short-timeout client for OAuth refresh and discovery calls.
pub static SHARED_CLIENT: Lazy<Client> = Lazy::new(|| create_base_client(Some(15)));

/// Client for generation calls. No total timeout: the caller expects
/// long-running generations and the heartbeat keeps intermediaries alive.
pub static GENERATE_CLIENT: Lazy<Client> = Lazy::new(|| create_base_client(None));

fn create_base_client(timeout_secs: Option<u64>) -> Client {
    let mut builder = apply_tls_backend(Client::builder())
        .connect_timeout(Duration::from_secs(20))
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(crate::constants::USER_AGENT.as_str());

    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }

    builder.build().unwrap_or_else(|_| Client::new())
}

pub fn get_client() -> Client {
    SHARED_CLIENT.clone()
}

pub fn get_generate_client() -> Client {
    GENERATE_CLIENT.clone()
}

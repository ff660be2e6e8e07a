use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Error surface of the upstream requester. `status == 0` means the request
/// never produced an HTTP response (connect/timeout/body failure).
#[derive(Error, Debug)]
#[error("upstream error (status {status}): {message}")]
pub struct UpstreamError {
    pub status: u16,
    pub message: String,
    pub is_upstream_api_error: bool,
    pub raw_body: Option<String>,
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
            is_upstream_api_error: false,
            raw_body: None,
        }
    }

    /// Builds an error from a non-2xx upstream body, extracting the nested
    /// `error.message` when the upstream encoded one.
    pub fn api(status: u16, raw_body: String) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(&raw_body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| format!("upstream returned HTTP {}", status));
        Self {
            status,
            message,
            is_upstream_api_error: true,
            raw_body: Some(raw_body),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

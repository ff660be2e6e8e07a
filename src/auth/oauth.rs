use serde::Deserialize;

use crate::constants::{OAUTH_CLIENT_ID, OAUTH_CLIENT_SECRET, OAUTH_TOKEN_URL};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Failure of one refresh attempt. A 400/403 from the token endpoint means the
/// refresh token itself is dead and the credential must be disabled; anything
/// else (network, 5xx) leaves the credential alone.
#[derive(Debug)]
pub struct RefreshFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl RefreshFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self.status, Some(400) | Some(403))
    }
}

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "refresh failed (HTTP {}): {}", status, self.message),
            None => write!(f, "refresh request failed: {}", self.message),
        }
    }
}

pub async fn refresh_access_token(refresh_token: &str) -> Result<TokenResponse, RefreshFailure> {
    refresh_access_token_at(OAUTH_TOKEN_URL, refresh_token).await
}

pub async fn refresh_access_token_at(
    token_url: &str,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshFailure> {
    let client = crate::utils::http::get_client();
    let params = [
        ("client_id", OAUTH_CLIENT_ID),
        ("client_secret", OAUTH_CLIENT_SECRET),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| RefreshFailure {
            status: None,
            message: if e.is_connect() || e.is_timeout() {
                format!(
                    "{}. Unable to reach the Google authorization server; check network/proxy settings.",
                    e
                )
            } else {
                e.to_string()
            },
        })?;

    let status = response.status();
    if status.is_success() {
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshFailure {
                status: None,
                message: format!("refresh response parsing failed: {}", e),
            })?;
        tracing::debug!(
            "Token refreshed successfully, expires in {} seconds",
            token.expires_in
        );
        Ok(token)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(RefreshFailure {
            status: Some(status.as_u16()),
            message: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_statuses_are_400_and_403() {
        for status in [400, 403] {
            let failure = RefreshFailure {
                status: Some(status),
                message: "invalid_grant".to_string(),
            };
            assert!(failure.is_fatal());
        }
        for status in [401, 429, 500, 503] {
            let failure = RefreshFailure {
                status: Some(status),
                message: String::new(),
            };
            assert!(!failure.is_fatal());
        }
        let transport = RefreshFailure {
            status: None,
            message: "timeout".to_string(),
        };
        assert!(!transport.is_fatal());
    }
}

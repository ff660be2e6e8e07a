use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One OAuth credential row. `refresh_token` is the stable identity key across
/// memory and disk; `session_id` is regenerated at every load and never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: String,
    /// Access-token lifetime in seconds, as reported by the token endpoint.
    #[serde(default)]
    pub expires_in: i64,
    /// Millisecond epoch of the last successful refresh.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_true", rename = "hasQuota")]
    pub has_quota: bool,
    #[serde(default, rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(skip, default)]
    pub session_id: String,
}

impl Credential {
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            access_token: String::new(),
            expires_in: 0,
            timestamp: 0,
            enable: true,
            has_quota: true,
            project_id: None,
            email: String::new(),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Expiry predicate: the token dies 300 seconds before its nominal
    /// lifetime so a request never departs with a token about to lapse.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.timestamp + (self.expires_in - 300) * 1000
    }

    pub fn apply_refresh(&mut self, access_token: String, expires_in: i64, now_ms: i64) {
        self.access_token = access_token;
        self.expires_in = expires_in;
        self.timestamp = now_ms;
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_matches_timestamp_plus_lifetime_minus_grace() {
        let mut cred = Credential::new("rt-1");
        cred.timestamp = 1_000_000;
        cred.expires_in = 3600;
        let boundary = 1_000_000 + (3600 - 300) * 1000;

        assert!(!cred.is_expired(boundary - 1));
        assert!(cred.is_expired(boundary));
        assert!(cred.is_expired(boundary + 1));
    }

    #[test]
    fn never_refreshed_credential_is_expired() {
        let cred = Credential::new("rt-1");
        assert!(cred.is_expired(now_ms()));
    }

    #[test]
    fn session_id_is_not_serialized() {
        let mut cred = Credential::new("rt-1");
        cred.session_id = "ephemeral".to_string();
        let json = serde_json::to_value(&cred).unwrap();
        assert!(json.get("session_id").is_none());
        assert!(json.get("sessionId").is_none());
        assert_eq!(json.get("hasQuota").and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn disk_row_with_missing_flags_defaults_to_enabled() {
        let cred: Credential =
            serde_json::from_str(r#"{"refresh_token":"rt-2","access_token":"at"}"#).unwrap();
        assert!(cred.enable);
        assert!(cred.has_quota);
        assert!(cred.project_id.is_none());
    }
}

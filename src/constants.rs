use once_cell::sync::Lazy;

pub const V1_INTERNAL_BASE_URL: &str =
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal";

pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// Desktop OAuth client baked into the Antigravity IDE. Not a secret in the
// usual sense: every installed copy of the IDE ships the same pair.
pub const OAUTH_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const OAUTH_CLIENT_SECRET: &str = "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";

const FALLBACK_UPSTREAM_VERSION: &str = "1.15.8";

// Upstream rejects unknown agents, so the UA always claims the Windows build
// of the IDE regardless of where the gateway actually runs.
pub static USER_AGENT: Lazy<String> = Lazy::new(|| {
    let version = std::env::var("APOGEE_UPSTREAM_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_UPSTREAM_VERSION.to_string());
    format!("antigravity/{} windows/amd64", version)
});

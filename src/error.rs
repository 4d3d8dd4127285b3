use serde_json::Value;
use thiserror::Error;

/// Failures the HTTP layer turns into specific status codes.
///
/// Library code returns `anyhow::Result` and raises these through it; callers
/// recover them with `downcast_ref::<ReelError>()`.
#[derive(Debug, Error)]
pub enum ReelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{provider} API error (status {status}): {message}")]
    Provider {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} task failed: {message}")]
    TaskFailed {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} task did not finish after {attempts} status checks")]
    TimedOut { provider: &'static str, attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access required for user {0}")]
    AccessRequired(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl ReelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ReelError::InvalidInput(message.into())
    }
}

/// Pull a human-readable message out of a provider's error body.
///
/// Understands `{error:{message}}`, `{error}`, `{message}` and `{msg}`; anything
/// else is truncated raw text.
pub fn provider_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => json["error"]["message"]
            .as_str()
            .or_else(|| json["error"].as_str())
            .or_else(|| json["message"].as_str())
            .or_else(|| json["msg"].as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| body.chars().take(200).collect()),
        Err(_) => body.chars().take(200).collect(),
    }
}

use thiserror::Error;

/// Errors callers need to tell apart. Everything else travels as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("AI returned a malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("a generation is already in progress")]
    Busy,

    #[error("{0} not found. Please set it to use this provider.")]
    MissingApiKey(&'static str),

    #[error("GitHub is not configured. Set token, owner and repo with /config set")]
    GithubNotConfigured,

    #[error("{provider} request failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
}

impl StudioError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        StudioError::Provider {
            provider,
            message: message.into(),
        }
    }
}

//! Error types for model providers.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a model provider.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials not found for provider.
    #[error("credentials not found for provider: {0}")]
    CredentialsNotFound(String),

    /// Failed to access system keyring.
    #[error("keyring error: {0}")]
    Keyring(String),

    /// Provider API returned an error status.
    #[error("provider API error: {0}")]
    ProviderApi(String),

    /// Provider rejected the call because of quota or rate limits.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Request failed before a response was received.
    #[error("request failed: {0}")]
    Request(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map a transport error, keeping timeouts distinguishable.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Request(err.to_string())
        }
    }

    /// Map a non-success HTTP status into an error.
    pub(crate) fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Error::RateLimited(format!("{provider} API returned {status}: {body}"))
        } else if status == reqwest::StatusCode::GATEWAY_TIMEOUT
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Error::Timeout(format!("{provider} API returned {status}"))
        } else {
            Error::ProviderApi(format!("{provider} API returned {status}: {body}"))
        }
    }
}

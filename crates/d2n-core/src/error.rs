//! Error types for the d2n system
//!
//! Remote failures are a small closed set ([`Error::NotFound`],
//! [`Error::Transport`], [`Error::Authentication`], plus rate limiting and
//! provider-specific rejections) so the reconciler can tell "no match" apart
//! from "call failed".

use thiserror::Error;

/// Result type alias for d2n operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the d2n system
#[derive(Error, Debug)]
pub enum Error {
    /// Host event source errors (daemon unreachable, malformed inspect data)
    #[error("Host event source error: {0}")]
    EventSource(String),

    /// Mapping cache persistence errors
    #[error("Mapping cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Network or server-side failure talking to a remote service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credential rejected by a remote service
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Record or entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote service rejected the request for another reason
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Remote service name
        provider: String,
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a host event source error
    pub fn event_source(msg: impl Into<String>) -> Self {
        Self::EventSource(msg.into())
    }

    /// Create a mapping cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status from a remote service to an error kind
    ///
    /// 401/403 → authentication, 404 → not found, 429 → rate limited,
    /// 5xx → transport, anything else → provider error.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!(
                "{provider} rejected the credential or it lacks access (status {status})"
            )),
            404 => Self::not_found(format!("{provider} returned 404: {body}")),
            429 => Self::rate_limited(format!(
                "{provider} rate limit exceeded (status {status})"
            )),
            500..=599 => Self::transport(format!(
                "{provider} server error (status {status}): {body}"
            )),
            _ => Self::provider(provider, format!("status {status}: {body}")),
        }
    }

    /// Whether this error means the target does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error is a credential rejection
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

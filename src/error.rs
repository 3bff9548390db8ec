//! Error types for the bridge.

use serde_json::Value;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Remote API error: {0}")]
    Api(#[from] ApiError),

    #[error("Credential cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Identity/discovery endpoint failures.
///
/// Terminal for the current request: the token layer performs at most one
/// refresh per call chain and never retries these silently.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Identity endpoint response is missing `{field}`")]
    MissingField { field: &'static str },

    #[error("Discovery endpoint response is missing `api_endpoint`")]
    DiscoveryFailed,

    #[error("Auth request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },
}

/// Remote contact-center API failures.
///
/// Structured 4xx/5xx replies are NOT errors at this layer: the upstream
/// status and error body travel back inside [`crate::remote::ApiReply`] so
/// the caller can lift them into its own transport status. Only failures
/// with no diagnostic body end up here.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Transport failure calling {operation}: {reason}")]
    Transport { operation: &'static str, reason: String },

    #[error("Unusable response body from {operation}: {reason}")]
    InvalidBody { operation: &'static str, reason: String },
}

/// Credential cache failures (file-backed store for linked sessions).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Gateway server failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to start: {0}")]
    StartupFailed(String),
}

impl Error {
    /// JSON error body surfaced to the gateway caller, paired with the
    /// transport status from [`Error::status_code`].
    pub fn to_error_body(&self) -> Value {
        serde_json::json!({ "error": self.to_string() })
    }

    /// Transport status the gateway should answer with for this failure.
    ///
    /// Auth and transport failures are upstream problems, not caller
    /// mistakes, so they surface as 502.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) | Self::Gateway(_) => 500,
            Self::Auth(_) | Self::Api(_) | Self::Cache(_) => 502,
        }
    }
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;

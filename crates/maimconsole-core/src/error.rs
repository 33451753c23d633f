//! Error types for the maimconsole core library.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for envelope and configuration handling.
#[derive(Debug, Error)]
pub enum Error {
    /// An outbound envelope could not be built
    #[error("Failed to encode envelope: {0}")]
    Encoding(String),

    /// An inbound frame is not a usable envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML configuration file could not be parsed
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

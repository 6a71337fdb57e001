//! Error types for the parproc core library.

use thiserror::Error;

/// Result type alias using parproc's core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for configuration and manifest handling.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job manifest error
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Transport adapter error.
    #[error("Transport error on {transport}: {message}")]
    Transport { transport: String, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a transport error.
    pub fn transport(transport: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            transport: transport.into(),
            message: msg.into(),
        }
    }
}

impl From<hemma_common::Error> for BridgeError {
    fn from(err: hemma_common::Error) -> Self {
        match err {
            hemma_common::Error::Config(msg) => Self::Config(msg),
            hemma_common::Error::Io(e) => Self::Io(e),
            other => Self::Serialization(other.to_string()),
        }
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

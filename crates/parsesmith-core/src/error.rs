//! Unified error types for parsesmith

use thiserror::Error;

/// Unified error type for all parsesmith operations
#[derive(Error, Debug)]
pub enum ParseSmithError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid bank identifier: {0}")]
    InvalidBank(String),

    // Generation backend errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    // Artifact errors
    #[error("Artifact error: {0}")]
    Artifact(String),

    // Test execution errors
    #[error("Test runner error: {0}")]
    TestRunner(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using ParseSmithError
pub type Result<T> = std::result::Result<T, ParseSmithError>;

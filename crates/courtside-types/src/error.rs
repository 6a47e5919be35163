//! Error types for the Courtside platform

use thiserror::Error;

/// Main error type for the Courtside crates
#[derive(Error, Debug)]
pub enum CourtsideError {
    /// IO related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid dataset spec, feature block, or model configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required data is absent (master CSV, dataset rows, artifacts)
    #[error("Data missing: {0}")]
    DataMissing(String),

    /// Feature-key parse failure or rejected feature combination
    #[error("Feature error: {0}")]
    Feature(String),

    /// Exception inside a training run
    #[error("Run error: {0}")]
    Run(String),

    /// Exception inside an agent tool
    #[error("Tool error: {0}")]
    Tool(String),

    /// Planner or synthesizer returned unusable output
    #[error("LLM error: {0}")]
    Llm(String),

    /// Database related errors
    #[error("Database error: {0}")]
    Database(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input provided to a function
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Item not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error with custom message
    #[error("Error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for CourtsideError {
    fn from(error: serde_json::Error) -> Self {
        CourtsideError::Serialization {
            source: Box::new(error),
        }
    }
}

impl From<std::num::ParseIntError> for CourtsideError {
    fn from(error: std::num::ParseIntError) -> Self {
        CourtsideError::InvalidInput(format!("Failed to parse integer: {}", error))
    }
}

impl From<std::num::ParseFloatError> for CourtsideError {
    fn from(error: std::num::ParseFloatError) -> Self {
        CourtsideError::InvalidInput(format!("Failed to parse float: {}", error))
    }
}

/// Result type for the Courtside crates
pub type Result<T> = std::result::Result<T, CourtsideError>;

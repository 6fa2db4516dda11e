//! Error types for the claims orchestrator

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::inference::InferenceError;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// Inference backend still throttling after the single retry.
    /// The only condition allowed to reach the caller from the specialist.
    #[error("Rate limited by inference backend: {0}")]
    RateLimited(String),

    #[error("Inference error: {0}")]
    Inference(InferenceError),

    #[error("Banking gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Malformed tool arguments: {0}")]
    MalformedToolArgs(String),

    #[error("Tool not recognized: {0}")]
    UnknownTool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<InferenceError> for OrchestrationError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::RateLimited(detail) => OrchestrationError::RateLimited(detail),
            other => OrchestrationError::Inference(other),
        }
    }
}

impl OrchestrationError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OrchestrationError::RateLimited(_))
    }
}

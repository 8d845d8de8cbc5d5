//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Stored content is not valid UTF-8")]
    InvalidUtf8Data,

    #[error("No content was stored")]
    NoData,

    #[error("Invalid JSON response: {0}")]
    InvalidJsonResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

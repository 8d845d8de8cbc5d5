//! Error types for agent-runner

use std::time::Duration;

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while resolving, executing or persisting a run
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No agent registered under this id
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// No model registered under this name
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    /// Session does not exist in storage
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// An allow-list names a tool that is not registered
    #[error("Unknown tool: {tool}")]
    UnknownTool { tool: String },

    /// A tool is not permitted for this run
    #[error("Tool not allowed: {tool}")]
    ToolNotAllowed { tool: String },

    /// The model produced neither content nor tool calls
    #[error("No response from model")]
    NoResponseFromModel,

    /// Inconsistent agent, session or request configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Content could not be decoded into the requested type
    #[error("Invalid JSON response: {message}")]
    InvalidJsonResponse { message: String },

    /// The run asked for more tool calls than its policy allows
    #[error("Tool call limit exceeded: limit {limit}, requested {requested}")]
    ToolCallLimitExceeded { limit: usize, requested: usize },

    /// An attempt exceeded its time budget
    #[error("Execution timed out after {} ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The caller cancelled the invocation
    #[error("Execution cancelled")]
    Cancelled,

    /// Stored content is not valid text
    #[error("Content is not valid UTF-8")]
    InvalidUtf8Data,

    /// No content was stored
    #[error("No content was stored")]
    NoData,

    /// The model backend failed
    #[error("Model error: {message}")]
    Model { message: String },

    /// Tool execution machinery failed (not a tool's own error)
    #[error("Tool infrastructure failure in {tool}: {message}")]
    ToolInfrastructure { tool: String, message: String },

    /// A blocking hook returned an error
    #[error("Hook {hook} failed: {message}")]
    HookFailed { hook: String, message: String },

    /// Storage failed
    #[error("Storage error: {0}")]
    Storage(agent_core::Error),
}

impl RuntimeError {
    /// Create a Model error
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create an InvalidConfiguration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Whether the execution policy may retry after this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ToolCallLimitExceeded { .. }
                | Self::Cancelled
                | Self::InvalidConfiguration { .. }
                | Self::UnknownTool { .. }
                | Self::ToolNotAllowed { .. }
                | Self::AgentNotFound { .. }
                | Self::ModelNotFound { .. }
                | Self::SessionNotFound { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<agent_core::Error> for RuntimeError {
    fn from(err: agent_core::Error) -> Self {
        use agent_core::Error;

        match err {
            Error::SessionNotFound(session_id) => Self::SessionNotFound { session_id },
            Error::InvalidUtf8Data => Self::InvalidUtf8Data,
            Error::NoData => Self::NoData,
            Error::InvalidJsonResponse(message) => Self::InvalidJsonResponse { message },
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err = RuntimeError::from(agent_core::Error::SessionNotFound("s-9".into()));
        assert!(matches!(err, RuntimeError::SessionNotFound { ref session_id } if session_id == "s-9"));

        assert!(matches!(
            RuntimeError::from(agent_core::Error::InvalidUtf8Data),
            RuntimeError::InvalidUtf8Data
        ));
        assert!(matches!(
            RuntimeError::from(agent_core::Error::Storage("disk".into())),
            RuntimeError::Storage(_)
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(RuntimeError::model("boom").is_retryable());
        assert!(RuntimeError::Timeout {
            timeout: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(!RuntimeError::Cancelled.is_retryable());
        assert!(!RuntimeError::ToolCallLimitExceeded {
            limit: 2,
            requested: 3
        }
        .is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = RuntimeError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Execution timed out after 1500 ms");
    }
}

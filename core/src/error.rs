//! Structured error types for AgentProbe
//!
//! One taxonomy for the whole orchestration core: parse failures are
//! recovered locally by the session, tool invocation failures surface after
//! the retry budget, backend errors drive the one-time fallback decision,
//! and generation errors travel through reply channels as payloads before
//! being re-raised in the requesting context.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for AgentProbe operations
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Model output could not be decoded into tool commands.
    ///
    /// Recovered locally: the session treats the raw reply as the final
    /// answer instead of propagating this.
    #[error("unparseable model output: {reason}")]
    Parse { reason: String },

    /// A tool collaborator kept failing after the full retry budget
    #[error("tool invocation failed: {server}/{tool} after {attempts} attempts - {cause}")]
    ToolInvocation {
        server: String,
        tool: String,
        attempts: u32,
        cause: String,
    },

    /// The supervised inference process exited before becoming ready
    #[error("backend startup failed: {reason}")]
    BackendStartup { reason: String },

    /// The supervised inference process never accepted connections in time
    #[error("backend not ready after {timeout:?}")]
    BackendTimeout { timeout: Duration },

    /// A replica worker reported a generation failure through its reply channel
    #[error("generation failed: {message}")]
    Generation { message: String },

    /// The dispatcher was shut down before this request was served
    #[error("inference dispatcher is shut down")]
    DispatcherClosed,

    /// Invalid or unreadable configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ProbeError {
    /// Whether the tool invoker may retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) | Self::Json(_) => true,
            Self::Generation { .. } => true,
            Self::Parse { .. }
            | Self::ToolInvocation { .. }
            | Self::BackendStartup { .. }
            | Self::BackendTimeout { .. }
            | Self::DispatcherClosed
            | Self::InvalidConfig { .. } => false,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias using ProbeError
pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProbeError::Http("connection reset".to_string()).is_retryable());
        assert!(!ProbeError::DispatcherClosed.is_retryable());
        assert!(!ProbeError::ToolInvocation {
            server: "bank".to_string(),
            tool: "transfer".to_string(),
            attempts: 10,
            cause: "boom".to_string(),
        }
        .is_retryable());
    }
}

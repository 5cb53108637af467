//! Error types for the maestro engine.
//!
//! One crate-wide [`Error`] enum covers every failure domain: LLM calls,
//! tool execution, stores, the sandbox, and the pattern/mission engines.
//! Constructor helpers keep call sites terse.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the LLM provider (network, rate limit, invalid response).
    #[error("LLM error: {message}")]
    Llm {
        /// The underlying error message.
        message: String,
        /// Whether the error is transient (rate limit, timeout) and worth retrying.
        retryable: bool,
    },

    /// Error during tool execution.
    #[error("Tool '{tool_name}' error: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// Error from the session / mission / memory store.
    #[error("Store error: {0}")]
    Store(String),

    /// Error from the subprocess sandbox.
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// A pattern run failed with an engine-level error.
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// A mission could not make progress.
    #[error("Mission error: {0}")]
    Mission(String),

    /// Invalid configuration or definition.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded its deadline.
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The run was cancelled by the user or the watchdog.
    #[error("Cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a non-retryable LLM error.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a retryable LLM error (rate limit, timeout, transient network).
    #[must_use]
    pub fn llm_transient(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a tool execution error.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a pattern engine error.
    #[must_use]
    pub fn pattern(message: impl Into<String>) -> Self {
        Self::Pattern(message.into())
    }

    /// Create a mission orchestration error.
    #[must_use]
    pub fn mission(message: impl Into<String>) -> Self {
        Self::Mission(message.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error is worth retrying at the phase level.
    ///
    /// Covers transient LLM failures and timeouts, which the orchestrator
    /// retries with a fixed delay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Llm {
                retryable: true,
                ..
            } | Self::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::llm_transient("429 too many requests").is_retryable());
        assert!(Error::Timeout(600).is_retryable());
        assert!(!Error::llm("bad request").is_retryable());
        assert!(!Error::tool("build", "exit 1").is_retryable());
    }
}

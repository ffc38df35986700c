//! Error types for CouncilWatch.
//!
//! Library crates use [`CouncilWatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all CouncilWatch operations.
#[derive(Debug, thiserror::Error)]
pub enum CouncilWatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while listing, fetching an agenda, or fetching a document.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream markup or payload did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing agenda URL, bad token, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An extraction tool ran but failed.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// An extraction tool could not be started because it is not installed.
    #[error("{tool} is not available")]
    ToolUnavailable { tool: String },

    /// A bounded stage ran past its deadline.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// The run deadline fired while waiting.
    #[error("run cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CouncilWatchError>;

impl CouncilWatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a tool failure for the named tool.
    pub fn tool(tool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a libSQL error with the statement it came from.
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    /// Prefix the message with the operation that failed, keeping the variant.
    ///
    /// `Cancelled` and `ToolUnavailable` are returned unchanged so callers can
    /// still match on them.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            Self::Config { message } => Self::Config {
                message: format!("{ctx}: {message}"),
            },
            Self::Network(message) => Self::Network(format!("{ctx}: {message}")),
            Self::Parse { message } => Self::Parse {
                message: format!("{ctx}: {message}"),
            },
            Self::Storage(message) => Self::Storage(format!("{ctx}: {message}")),
            Self::Validation { message } => Self::Validation {
                message: format!("{ctx}: {message}"),
            },
            Self::Tool { tool, message } => Self::Tool {
                tool,
                message: format!("{ctx}: {message}"),
            },
            Self::Timeout { stage, secs } => Self::Timeout {
                stage: format!("{ctx}: {stage}"),
                secs,
            },
            Self::Io { path, source } => Self::Io {
                path,
                source: std::io::Error::new(source.kind(), format!("{ctx}: {source}")),
            },
            other => other,
        }
    }
}

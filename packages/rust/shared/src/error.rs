//! Error types for Firmscope.
//!
//! Library crates use [`FirmscopeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Firmscope operations.
#[derive(Debug, thiserror::Error)]
pub enum FirmscopeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to an external source.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Input file could not be read or contained no usable records.
    #[error("input error: {0}")]
    Input(String),

    /// The output file could not be created or its header written.
    /// Fatal: without it the run cannot produce artifacts.
    #[error("cannot initialize output {path:?}: {message}")]
    OutputInitialization { path: PathBuf, message: String },

    /// Appending rows or writing a dump/checkpoint failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (shape mismatch, checkpoint mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FirmscopeError>;

impl FirmscopeError {
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

    /// Create an output-initialization error for `path`.
    pub fn output_init(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::OutputInitialization {
            path: path.into(),
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

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutputInitialization { .. } | Self::Input(_) | Self::Config { .. }
        )
    }
}

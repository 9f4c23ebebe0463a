//! Error types for a transformation run.
//!
//! Only fatal conditions live here. A fatal error aborts the run before any
//! table is written, except [`StarError::SinkWriteFailure`], which is raised
//! per table by a sink and recorded in the run summary by the pipeline.
//!
//! Row-level problems (unresolved foreign keys, conflicting attribute values)
//! are not errors: they are collected as [`crate::issues::Issue`] values.
//!
//! ```no_run
//! use starload::error::{Result, ResultExt as _};
//!
//! fn read_fixture(path: &str) -> Result<String> {
//!     let text = std::fs::read_to_string(path).context("Failed to read fixture")?;
//!     Ok(text)
//! }
//! ```

use std::fmt;

/// Main error type for starload operations.
#[derive(Debug)]
pub enum StarError {
    /// The raw record set could not be read at all.
    SourceUnavailable(String),

    /// A required column is absent, entirely null, or entirely non-coercible,
    /// or the input has no rows.
    SchemaMismatch(String),

    /// The destination rejected a table write.
    SinkWriteFailure { table: String, message: String },

    /// I/O errors (files, directories)
    Io(std::io::Error),

    /// Data processing errors raised by Polars
    DataProcessing(String),

    /// Database errors raised by sqlx
    Database(String),

    /// Configuration errors
    Config(String),

    /// Generic error with context
    Other(String),
}

impl StarError {
    pub(crate) fn sink(table: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::SinkWriteFailure {
            table: table.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for StarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable(msg) => write!(f, "Source unavailable: {msg}"),
            Self::SchemaMismatch(msg) => write!(f, "Schema mismatch: {msg}"),
            Self::SinkWriteFailure { table, message } => {
                write!(f, "Failed to write table '{table}': {message}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StarError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<polars::error::PolarsError> for StarError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<sqlx::Error> for StarError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<anyhow::Error> for StarError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Result type alias for starload operations.
pub type Result<T> = std::result::Result<T, StarError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<StarError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: StarError = e.into();
            StarError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: StarError = e.into();
            StarError::Other(format!("{}: {}", f(), err))
        })
    }
}

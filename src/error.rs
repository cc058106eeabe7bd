//! Crate-wide error type
//!
//! Leaf errors live in [`crate::utils::error`] and stay usable on their own;
//! [`Error`] wraps them together with store, cache and configuration
//! failures. [`RegsyncErrorTrait`] tells the reconciler whether a failed
//! entity is worth retrying on the next pass.

use std::io;
use thiserror::Error;

pub use crate::utils::error::{EncodingError, FetchError, ParseError};

/// Retry classification shared by every regsync error
pub trait RegsyncErrorTrait: std::error::Error {
    /// A later pass may succeed without operator action
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Where a failure originated, used as a structured log field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Registrar, listings or evaluation portal
    Upstream,
    /// Payload shape, page markup or day/time encoding
    Payload,
    /// Snapshot store or republish cache
    Storage,
    /// Missing credentials and invalid settings
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Payload => "payload",
            Self::Storage => "storage",
            Self::Config => "config",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Upstream request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Unreadable upstream payload: {0}")]
    Parse(#[from] ParseError),

    #[error("Schedule encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Snapshot store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Republish cache backend failure (pool, connection or command)
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot rows or cache payloads that do not (de)serialize
    #[error("Snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Fatal at startup; nothing is fetched once this is raised
    #[error("Config error: {0}")]
    Config(String),

    /// A thread panicked while holding a shared handle
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl RegsyncErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Cache(_) | Self::Io(_) => true,
            Self::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            Self::Parse(_)
            | Self::Encoding(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::LockPoisoned(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Upstream,
            Self::Parse(_) | Self::Encoding(_) => ErrorCategory::Payload,
            Self::Database(_)
            | Self::Cache(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::LockPoisoned(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn cache(msg: impl std::fmt::Display) -> Self {
        Self::Cache(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the regsync pipeline
//!
//! This module defines the leaf error types raised while talking to the
//! upstream systems, parsing their payloads and encoding schedule values.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Credentials rejected by the upstream
    #[error("Unauthorized: status {0}")]
    Unauthorized(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded (last: {0})")]
    MaxRetriesExceeded(String),

    /// Response body did not match the expected shape
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The public listings page carried no API token
    #[error("API token not found in listings page")]
    TokenNotFound,
}

impl FetchError {
    /// Transient failures worth another attempt on a later pass
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::RateLimit
                | Self::ServerError(_)
                | Self::Timeout
                | Self::MaxRetriesExceeded(_)
        )
    }
}

/// Errors that can occur while parsing upstream payloads and pages
#[derive(Error, Debug)]
pub enum ParseError {
    /// Rating chart data could not be read
    #[error("Malformed rating chart: {0}")]
    MalformedChart(String),

    /// Term code is not four digits
    #[error("Invalid term code: {0}")]
    InvalidTerm(String),
}

/// Errors raised by the day/time encoders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Time string is not "H:MM AM/PM"
    #[error("Invalid time: {0:?}")]
    InvalidTime(String),

    /// Day token is not a known weekday abbreviation
    #[error("Unknown day token: {0:?}")]
    UnknownDay(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_recoverable() {
        assert!(FetchError::Timeout.is_recoverable());
        assert!(FetchError::ServerError(503).is_recoverable());
        assert!(!FetchError::Unauthorized(401).is_recoverable());
        assert!(!FetchError::TokenNotFound.is_recoverable());
    }

    #[test]
    fn test_encoding_error_display() {
        let err = EncodingError::InvalidTime("25:00".to_string());
        assert_eq!(err.to_string(), "Invalid time: \"25:00\"");
    }
}

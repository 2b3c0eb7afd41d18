//! Error types for the Tollgate admission-control layer.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// The admission path itself never returns this type: rejections are
/// ordinary [`Decision`](crate::ratelimit::Decision) values.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Override store errors (unavailable backend, unreadable data)
    #[error("Override store error: {0}")]
    Store(String),

    /// An override value outside its permitted range
    #[error("Invalid override: {field} = {value} (allowed {min}..={max})")]
    InvalidOverride {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

//! Error types for Slidegate.

use thiserror::Error;

/// Main error type for Slidegate operations.
#[derive(Error, Debug)]
pub enum SlidegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window size or capacity that cannot define a limiter
    #[error("Invalid rate limit: {0}")]
    InvalidLimit(String),

    /// Lookup of a policy that was never registered
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, SlidegateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SlidegateError::InvalidLimit("max_requests must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid rate limit: max_requests must be positive");

        let err = SlidegateError::UnknownPolicy("login".to_string());
        assert_eq!(err.to_string(), "Unknown rate limit policy: login");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SlidegateError = io_error.into();
        assert!(matches!(err, SlidegateError::Io(_)));
    }
}

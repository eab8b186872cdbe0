//! Error types for the correlation ID core
//!
//! Identifier handling itself never fails a request: a rejected header is
//! replaced, a missing error tracker is a no-op. These errors only surface
//! while building layers, loading settings or touching the flow store from
//! outside a flow.

use thiserror::Error;

use crate::context::ContextError;

/// Main error type for correlation ID operations
#[derive(Error, Debug)]
pub enum CorrelationError {
    /// Invalid combination of options
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured header name is not a valid HTTP header name
    #[error("Invalid header name '{name}': {reason}")]
    InvalidHeaderName { name: String, reason: String },

    /// Flow-local storage was accessed outside of a flow
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Settings could not be read or parsed
    #[error("Settings error: {0}")]
    Settings(String),

    /// The tracing subscriber could not be configured
    #[error("Logging error: {0}")]
    Logging(String),
}

impl CorrelationError {
    /// Create an invalid header name error
    pub fn invalid_header_name(name: impl Into<String>, reason: impl ToString) -> Self {
        CorrelationError::InvalidHeaderName {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        CorrelationError::Config(msg.into())
    }

    /// Create a settings error
    pub fn settings(msg: impl Into<String>) -> Self {
        CorrelationError::Settings(msg.into())
    }

    /// Check if this error was caused by user-supplied configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CorrelationError::Config(_)
                | CorrelationError::InvalidHeaderName { .. }
                | CorrelationError::Settings(_)
        )
    }
}

impl From<std::io::Error> for CorrelationError {
    fn from(err: std::io::Error) -> Self {
        CorrelationError::Settings(format!("I/O error: {}", err))
    }
}

impl From<toml::de::Error> for CorrelationError {
    fn from(err: toml::de::Error) -> Self {
        CorrelationError::Settings(format!("TOML error: {}", err))
    }
}

/// Result type alias for correlation ID operations
pub type Result<T> = std::result::Result<T, CorrelationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CorrelationError::invalid_header_name("bad header", "invalid HTTP header name");
        assert_eq!(
            err.to_string(),
            "Invalid header name 'bad header': invalid HTTP header name"
        );
    }

    #[test]
    fn test_is_config_error() {
        assert!(CorrelationError::settings("missing").is_config_error());
        assert!(CorrelationError::config("uuid_length must be > 0").is_config_error());
        assert!(CorrelationError::invalid_header_name("x y", "space").is_config_error());
        assert!(!CorrelationError::Context(ContextError::NoActiveFlow).is_config_error());
        assert!(!CorrelationError::Logging("already set".to_string()).is_config_error());
    }

    #[test]
    fn test_from_toml_error() {
        let err: CorrelationError = toml::from_str::<toml::Value>("= nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, CorrelationError::Settings(_)));
        assert!(err.to_string().starts_with("Settings error: TOML error"));
    }
}

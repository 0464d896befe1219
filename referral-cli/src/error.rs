//! CLI Error Types
//!
//! Error types for the referral CLI application.

use referral_core::EngineError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// File I/O error
    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Engine error
    #[error("Engine error: {0}")]
    EngineError(#[from] EngineError),

    /// Record not found
    #[error("Not found: {id}")]
    NotFound { id: String },
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        CliError::ConfigError {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_arg(message: impl Into<String>) -> Self {
        CliError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        CliError::NotFound { id: id.into() }
    }

    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigError { .. } => 1,
            CliError::InvalidArgument { .. } => 2,
            CliError::IoError(_) => 5,
            CliError::JsonError(_) => 6,
            CliError::EngineError(EngineError::InvalidConfig(_)) => 1,
            CliError::EngineError(e) if e.is_fatal() => 31,
            CliError::EngineError(_) => 12,
            CliError::NotFound { .. } => 21,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = CliError::config("missing data dir");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("missing data dir"));
    }

    #[test]
    fn test_invalid_argument() {
        let err = CliError::invalid_arg("unknown tier: 4");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_engine_error_codes() {
        let storage: CliError = EngineError::Storage("disk full".into()).into();
        assert_eq!(storage.exit_code(), 31);

        let config: CliError = EngineError::InvalidConfig("bad split".into()).into();
        assert_eq!(config.exit_code(), 1);

        let conflict: CliError = EngineError::conflict("order", 7, "already done").into();
        assert_eq!(conflict.exit_code(), 12);
    }
}

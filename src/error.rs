use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tend supervisor
#[derive(Debug, Error)]
pub enum TendError {
    // Configuration errors (fatal at load time)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Process-related errors
    #[error("Process already registered and running: {0}")]
    DuplicateName(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnError {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Signal error: {0}")]
    SignalError(String),

    // Log-related errors
    #[error("Failed to open log file {}: {source}", path.display())]
    LogOpenError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log error: {0}")]
    LogError(String),

    // Supervisor lifecycle
    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TendError {
    /// Whether this error belongs to the load-time configuration family
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TendError::ConfigError(_)
                | TendError::InvalidConfig(_)
                | TendError::MissingConfigField(_)
                | TendError::ConfigValidationError(_)
        )
    }
}

/// Result type alias for tend operations
pub type Result<T> = std::result::Result<T, TendError>;

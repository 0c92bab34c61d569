use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Execution errors
    #[error("Tool call failed: {0}")]
    Tool(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

/// Why an admission attempt did not start a run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    /// A run for this subscription is already in progress
    #[error("a run is already in progress for this subscription")]
    Conflict,

    /// The coordinator or its store could not be reached; nothing was admitted
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
}

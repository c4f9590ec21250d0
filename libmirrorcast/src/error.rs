//! Error types for Mirrorcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MirrorError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MirrorError::InvalidInput(_) => 3,
            MirrorError::Config(_) => 2,
            MirrorError::Platform(_) => 1,
            MirrorError::Database(_) => 1,
        }
    }

    /// HTTP status carried by an upstream platform error, if any
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            MirrorError::Platform(platform_error) => platform_error.status(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} must be between {min} and {max}. {field}: {value}")]
    OutOfRange {
        field: String,
        min: i64,
        max: i64,
        value: i64,
    },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    /// Non-2xx response from either platform
    #[error("{platform} returned HTTP {status} ({context}): {body}")]
    Upstream {
        platform: String,
        context: String,
        status: u16,
        body: String,
    },

    /// Response body did not have the expected shape
    #[error("Unexpected response ({0})")]
    Protocol(String),

    /// Transport failure before any HTTP status was received
    #[error("Network error: {0}")]
    Network(String),
}

impl PlatformError {
    /// HTTP status code for upstream errors
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the destination rejected an upload for its size (HTTP 413)
    pub fn is_payload_too_large(&self) -> bool {
        self.status() == Some(413)
    }
}

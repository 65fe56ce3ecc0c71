//! Error type shared by every stage.
//!
//! [`PktwatchError::is_recoverable`] decides whether a retry loop keeps
//! going; [`PktwatchError::category`] tags log lines.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PktwatchError {
    #[error("Capture already running")]
    CaptureAlreadyRunning,

    #[error("No capture interface available")]
    NoInterface,

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Forwarding error: {0}")]
    Forward(String),

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Storage error: {0}")]
    Persist(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Connection pool exhausted")]
    PoolExhausted,
}

/// Result type alias for pktwatch operations
pub type Result<T> = std::result::Result<T, PktwatchError>;

impl PktwatchError {
    /// Creates a new capture error
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::Capture(msg.into())
    }

    /// Creates a new forwarding error
    pub fn forward<S: Into<String>>(msg: S) -> Self {
        Self::Forward(msg.into())
    }

    /// Creates a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Creates a new persistence error
    pub fn persist<S: Into<String>>(msg: S) -> Self {
        Self::Persist(msg.into())
    }

    /// Creates a new schema error
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Self::Schema(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new recording error
    pub fn recording<S: Into<String>>(msg: S) -> Self {
        Self::Recording(msg.into())
    }

    /// Creates a new invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Returns true if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Forward(_) | Self::Timeout { .. } | Self::PoolExhausted | Self::Io(_) => true,
            Self::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                )
            ),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::CaptureAlreadyRunning | Self::NoInterface | Self::Capture(_) => "capture",
            Self::Recording(_) => "capture",
            Self::Forward(_) | Self::Timeout { .. } => "forward",
            Self::Parse { .. } => "parse",
            Self::Persist(_) | Self::Database(_) | Self::PoolExhausted => "persist",
            Self::Schema(_) => "schema",
            Self::Config(_) => "config",
            Self::InvalidRequest(_) => "validation",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}

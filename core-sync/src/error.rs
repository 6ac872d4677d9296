use bridge_traits::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Client {client_id} does not support {capability}")]
    UnsupportedCapability { client_id: i64, capability: String },

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] LibraryError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Sync already in progress for {key}")]
    SyncInProgress { key: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },
}

impl SyncError {
    /// Errors that must fail the enclosing job rather than be skipped.
    ///
    /// A version conflict that outlived its retries only loses one item.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Persistence(LibraryError::VersionConflict { .. }) => false,
            SyncError::Persistence(_) | SyncError::Configuration(_) => true,
            _ => false,
        }
    }

    /// Errors a caller may log, count and move past.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal() && !matches!(self, SyncError::Cancelled)
    }

    pub(crate) fn invalid_value(field: &str, value: impl Into<String>) -> Self {
        SyncError::InvalidValue {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::NotSupported {
                client_id,
                capability,
            } => SyncError::UnsupportedCapability {
                client_id,
                capability,
            },
            BridgeError::RemoteCall(message) => SyncError::RemoteCall(message),
            BridgeError::Timeout(message) => SyncError::RemoteCall(format!("timeout: {}", message)),
            other => SyncError::RemoteCall(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Persistence(LibraryError::Database(error))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

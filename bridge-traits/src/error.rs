use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Capability not supported by client {client_id}: {capability}")]
    NotSupported { client_id: i64, capability: String },

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Remote call timed out: {0}")]
    Timeout(String),

    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Invalid response from remote: {0}")]
    InvalidResponse(String),
}

impl BridgeError {
    /// Whether repeating the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::RemoteCall(_) | BridgeError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlobCopyError>;

#[derive(Debug, Error)]
pub enum BlobCopyError {
    /// Another holder owns an active lease on the blob.
    #[error("lease conflict: {0}")]
    LeaseConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Network or service failure; may be transient, the caller owns retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// Release of a lease that was already released or has expired.
    #[error("invalid lease state: {0}")]
    InvalidLeaseState(String),

    #[error("no pending copy operation: {0}")]
    NoPendingCopy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<object_store::Error> for BlobCopyError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => BlobCopyError::NotFound(path),
            other => BlobCopyError::Transport(other.to_string()),
        }
    }
}

impl BlobCopyError {
    pub fn is_lease_conflict(&self) -> bool {
        matches!(self, BlobCopyError::LeaseConflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobCopyError::NotFound(_))
    }

    pub fn is_invalid_lease_state(&self) -> bool {
        matches!(self, BlobCopyError::InvalidLeaseState(_))
    }
}

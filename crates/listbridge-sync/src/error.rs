//! Sync error types
//!
//! Only failures that stop a single record from syncing are errors here.
//! A field with no mapping target or a record with no counterpart is an
//! ordinary outcome.

use listbridge_clients::ClientError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}

impl SyncError {
    pub fn bootstrap(reason: impl Into<String>) -> Self {
        Self::Bootstrap(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Client(e) => e.is_transient(),
            SyncError::Bootstrap(_) => false,
        }
    }
}

//! Upload error types.

use glacier_transfer::{TransferError, TreeHash};

/// Errors returned by a [`VaultClient`](crate::VaultClient).
#[derive(Debug, Clone, thiserror::Error)]
pub enum VaultError {
    #[error("service error: {0}")]
    Service(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Why a single part attempt did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("checksum mismatch: local {local}, remote {remote}")]
    ChecksumMismatch { local: TreeHash, remote: TreeHash },

    #[error("reading part failed: {0}")]
    Read(#[from] TransferError),

    #[error("task join error: {0}")]
    Join(String),
}

/// A job exhausted its attempts or failed unrecoverably; the pool was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("part at offset {offset} failed after {attempts} attempt(s): {cause}")]
pub struct PoolFailure {
    /// Offset of the job that failed.
    pub offset: u64,
    /// Attempts spent on that job (0 if its bytes could not be read).
    pub attempts: u32,
    #[source]
    pub cause: PartError,
    /// Offsets that finished before the failure. Reported for diagnostics only.
    pub succeeded: Vec<u64>,
    /// Offsets that were in flight or never started.
    pub aborted: Vec<u64>,
}

/// Why a pool run did not complete.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Failed(#[from] PoolFailure),

    /// Cancelled from outside before every job finished.
    #[error("pool cancelled ({} part(s) done, {} aborted)", .succeeded.len(), .aborted.len())]
    Cancelled {
        succeeded: Vec<u64>,
        aborted: Vec<u64>,
    },
}

/// Errors produced by the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Pool(#[from] PoolFailure),

    #[error("task join error: {0}")]
    Join(String),

    #[error("cancelled")]
    Cancelled,

    #[error("upload {upload_id} interrupted (resume with this upload id): {source}")]
    Interrupted {
        upload_id: String,
        source: Box<UploadError>,
    },
}

impl UploadError {
    /// Upload id to resume with, if a multipart session was open.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            Self::Interrupted { upload_id, .. } => Some(upload_id),
            _ => None,
        }
    }

    /// Whether the error was raised before any remote call.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Transfer(TransferError::InvalidPartSize(_))
        )
    }
}

impl From<PoolError> for UploadError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Failed(failure) => Self::Pool(failure),
            PoolError::Cancelled { .. } => Self::Cancelled,
        }
    }
}

impl From<tokio::task::JoinError> for UploadError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

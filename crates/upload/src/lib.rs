//! Multipart upload engine for archival vaults.
//!
//! This crate drives uploads against any [`VaultClient`]. It has no SDK
//! dependency; `glacier-aws` provides the client that talks to the
//! service.
//!
//! # Pipeline
//!
//! 1. **Size check**: validate the part size, pick single-shot or multipart
//! 2. **Session**: initiate a new upload or resume an existing one
//! 3. **Reconcile**: keep remote parts whose bytes still hash the same
//! 4. **Transfer**: send the remaining parts through the worker pool
//! 5. **Finalize**: commit the archive with its total tree hash

pub mod error;
pub mod pool;
pub mod retry;
pub mod types;
pub mod upload;
pub mod vault;

#[cfg(test)]
mod mock;

// Re-export primary types for convenience.
pub use error::{PartError, PoolError, PoolFailure, UploadError, VaultError};
pub use pool::{PoolReport, UploadWorkerPool};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use types::{
    DEFAULT_PART_SIZE_MIB, DEFAULT_THREADS, UploadEvent, UploadOutcome, UploadRequest,
    UploadSession, UploadState, UploadStrategy,
};
pub use upload::ArchiveUploader;
pub use vault::{ArchiveReceipt, PartListing, VaultClient, VaultFuture};

//! Data types for the upload flow.

use std::fmt;
use std::time::Duration;

use glacier_transfer::{PartSize, TreeHash};

use crate::retry::RetryPolicy;

/// Default number of concurrent part uploads.
pub const DEFAULT_THREADS: usize = 5;

/// Default part size in MiB.
pub const DEFAULT_PART_SIZE_MIB: u64 = 8;

/// What the caller asks the uploader to do.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub vault: String,
    pub description: String,
    /// Part size in MiB; validated before any remote call.
    pub part_size_mib: u64,
    pub threads: usize,
    /// Existing multipart session to resume.
    pub upload_id: Option<String>,
    pub retry: RetryPolicy,
}

impl UploadRequest {
    pub fn new(vault: impl Into<String>) -> Self {
        Self {
            vault: vault.into(),
            description: String::new(),
            part_size_mib: DEFAULT_PART_SIZE_MIB,
            threads: DEFAULT_THREADS,
            upload_id: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Remote multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub part_size: PartSize,
    pub vault: String,
    pub description: String,
}

/// Coordinator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    SizeCheck,
    SingleShot,
    MultipartInit,
    MultipartResume,
    Transferring,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SizeCheck => "size-check",
            Self::SingleShot => "single-shot",
            Self::MultipartInit => "multipart-init",
            Self::MultipartResume => "multipart-resume",
            Self::Transferring => "transferring",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    StateChanged {
        from: UploadState,
        to: UploadState,
    },
    /// A multipart session was opened or re-attached.
    SessionReady {
        upload_id: String,
        part_size: PartSize,
        resumed: bool,
    },
    /// Parts planned, and how many still need sending.
    Planned {
        file_size: u64,
        parts: u64,
        remaining: u64,
    },
    /// A part attempt failed and will be retried.
    PartRetry {
        offset: u64,
        attempt: u32,
        error: String,
    },
    PartUploaded {
        part_index: u64,
        offset: u64,
        bytes: u64,
        attempts: u32,
        bytes_per_second: f64,
        /// Estimated time left for this pool run.
        eta: Option<Duration>,
    },
    /// The service accepted the archive.
    Finalized {
        local: TreeHash,
        remote: TreeHash,
    },
}

/// How the archive was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStrategy {
    SingleShot,
    Multipart {
        upload_id: String,
        parts: u64,
        /// Parts verified from a resumed session instead of re-sent.
        reused_parts: u64,
    },
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub strategy: UploadStrategy,
    pub archive_id: String,
    pub location: String,
    pub archive_size: u64,
    pub local_checksum: TreeHash,
    pub remote_checksum: TreeHash,
}

impl UploadOutcome {
    /// Whether the service's tree hash matches the one computed locally.
    pub fn checksum_verified(&self) -> bool {
        self.local_checksum == self.remote_checksum
    }
}

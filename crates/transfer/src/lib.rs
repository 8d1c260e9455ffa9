//! Part layout, tree hashing and archive access for multipart vault uploads.
//!
//! Everything here is synchronous; the upload engine drives it from
//! blocking tasks.

mod archive;
mod plan;
mod progress;
pub mod treehash;
mod types;
mod validation;

pub use archive::{Archive, ArchiveSource};
pub use plan::{PartPlan, Reconciliation, reconcile};
pub use progress::SpeedCalculator;
pub use treehash::{TreeHash, TreeHasher, chunk_digest, fold_pairs, part_digest, total_digest};
pub use types::{ByteRange, ChecksumTable, RemotePartRecord};
pub use validation::{MAX_PART_SIZE_MIB, MIN_PART_SIZE_MIB, PartSize};

/// Archives smaller than this many bytes are uploaded in a single request.
pub const SINGLE_SHOT_THRESHOLD: u64 = 4096;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid part size: {0}")]
    InvalidPartSize(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid byte range: {0}")]
    InvalidRange(String),

    #[error("read of {len} bytes at offset {offset} exceeds archive size {archive_len}")]
    OutOfBounds {
        offset: u64,
        len: u64,
        archive_len: u64,
    },

    #[error("checksum table incomplete: expected {expected} parts, missing {missing:?}")]
    IncompleteChecksums { expected: u64, missing: Vec<u64> },

    #[error("archive lock poisoned")]
    Poisoned,
}

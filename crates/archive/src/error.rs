//! Archive preparation errors.

use std::path::PathBuf;

/// Errors produced while validating inputs or building an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no input paths given")]
    NoInputs,

    #[error("{} is a symlink; pass the target instead", .0.display())]
    Symlink(PathBuf),

    #[error("{} is neither a regular file nor a directory", .0.display())]
    NotRegularFile(PathBuf),

    #[error("uploading without compression needs exactly one regular file, got {0} path(s)")]
    UncompressedNeedsOneFile(usize),
}

impl ArchiveError {
    /// Whether the error comes from the inputs rather than the filesystem.
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

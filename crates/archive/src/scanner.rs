//! Input validation and size scanning.
//!
//! Top-level inputs must be regular files or directories; a symlink given
//! directly is rejected. Symlinks found inside directories are skipped when
//! sizing and stored as links in the archive.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Checks that every input exists and is a regular file or directory.
pub fn validate_inputs(paths: &[PathBuf]) -> Result<(), ArchiveError> {
    if paths.is_empty() {
        return Err(ArchiveError::NoInputs);
    }
    for path in paths {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            return Err(ArchiveError::Symlink(path.clone()));
        }
        if !metadata.is_dir() && !metadata.is_file() {
            return Err(ArchiveError::NotRegularFile(path.clone()));
        }
    }
    Ok(())
}

/// Total bytes of regular files across all inputs.
pub fn total_input_size(paths: &[PathBuf]) -> Result<u64, ArchiveError> {
    paths.iter().try_fold(0u64, |total, path| Ok(total + input_size(path)?))
}

/// Bytes of a regular file, or of all regular files under a directory.
pub fn input_size(path: &Path) -> Result<u64, ArchiveError> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Err(ArchiveError::Symlink(path.to_path_buf()));
    }
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    if !metadata.is_dir() {
        return Err(ArchiveError::NotRegularFile(path.to_path_buf()));
    }

    let mut total = 0;
    walk_dir(path, &mut total)?;
    Ok(total)
}

fn walk_dir(current: &Path, total: &mut u64) -> Result<(), ArchiveError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        // `DirEntry::metadata` does not follow symlinks.
        let metadata = entry.metadata()?;

        if metadata.file_type().is_symlink() {
            continue;
        }
        if metadata.is_dir() {
            walk_dir(&entry.path(), total)?;
        } else if metadata.is_file() {
            *total += metadata.len();
        }
    }
    Ok(())
}

/// Checks that `paths` is exactly one regular file and returns it.
pub fn single_regular_file(paths: &[PathBuf]) -> Result<&Path, ArchiveError> {
    let [path] = paths else {
        return Err(ArchiveError::UncompressedNeedsOneFile(paths.len()));
    };
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Err(ArchiveError::Symlink(path.clone()));
    }
    if !metadata.is_file() {
        return Err(ArchiveError::NotRegularFile(path.clone()));
    }
    Ok(path.as_path())
}

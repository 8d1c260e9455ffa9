//! Builds the archive that gets uploaded.
//!
//! Inputs are written as one tar stream through a zstd encoder into an
//! anonymous temporary file, which the OS removes once it is closed.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ArchiveError;
use crate::scanner::{single_regular_file, total_input_size, validate_inputs};
use crate::units::human_readable_bytes;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// A file ready to upload, positioned at its start.
#[derive(Debug)]
pub struct PreparedArchive {
    pub file: File,
    /// Bytes of regular input files.
    pub input_bytes: u64,
    /// Bytes of the file to upload.
    pub archive_bytes: u64,
}

struct Progress {
    total: u64,
    done: u64,
}

/// Packs `paths` into a zstd-compressed tar stream in a temporary file.
///
/// Directories are added recursively. Symlinks inside them are stored as
/// links, never followed.
pub fn compress_inputs(paths: &[PathBuf], level: i32) -> Result<PreparedArchive, ArchiveError> {
    validate_inputs(paths)?;

    let total = total_input_size(paths)?;
    info!(
        inputs = paths.len(),
        size = %human_readable_bytes(total),
        "compressing inputs"
    );

    let encoder = zstd::stream::write::Encoder::new(tempfile::tempfile()?, level)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut progress = Progress { total, done: 0 };
    for path in paths {
        let name = archive_name(path)?;
        append_entry(&mut builder, path, &name, &mut progress)?;
    }

    let mut file = builder.into_inner()?.finish()?;
    file.flush()?;
    let archive_bytes = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let ratio = if total == 0 {
        0.0
    } else {
        archive_bytes as f64 / total as f64 * 100.0
    };
    info!(
        input = %human_readable_bytes(total),
        output = %human_readable_bytes(archive_bytes),
        "compressed to {ratio:.2}% of input size"
    );

    Ok(PreparedArchive {
        file,
        input_bytes: total,
        archive_bytes,
    })
}

/// Opens a single regular file to upload as-is.
pub fn open_uncompressed(paths: &[PathBuf]) -> Result<PreparedArchive, ArchiveError> {
    let path = single_regular_file(paths)?;
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    debug!(path = %path.display(), size = %human_readable_bytes(len), "uploading without compression");
    Ok(PreparedArchive {
        file,
        input_bytes: len,
        archive_bytes: len,
    })
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    name: &Path,
    progress: &mut Progress,
) -> Result<(), ArchiveError> {
    let metadata = fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();

    if file_type.is_dir() {
        builder.append_path_with_name(path, name)?;
        let mut children = fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(|entry| entry.file_name());
        for child in children {
            append_entry(builder, &child.path(), &name.join(child.file_name()), progress)?;
        }
    } else if file_type.is_file() {
        builder.append_path_with_name(path, name)?;
        progress.done += metadata.len();
        let percent = if progress.total == 0 {
            100.0
        } else {
            progress.done as f64 / progress.total as f64 * 100.0
        };
        debug!(
            path = %name.display(),
            size = %human_readable_bytes(metadata.len()),
            "added ({percent:.2}% of {})",
            human_readable_bytes(progress.total)
        );
    } else if file_type.is_symlink() {
        builder.append_path_with_name(path, name)?;
    } else {
        warn!(path = %path.display(), "skipping special file");
    }
    Ok(())
}

/// Name of an input inside the archive: its path without root or `.`/`..`.
fn archive_name(path: &Path) -> Result<PathBuf, ArchiveError> {
    let name: PathBuf = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if !name.as_os_str().is_empty() {
        return Ok(name);
    }
    // Inputs like `.` or `/` fall back to their resolved directory name.
    let resolved = fs::canonicalize(path)?;
    Ok(resolved
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("root")))
}

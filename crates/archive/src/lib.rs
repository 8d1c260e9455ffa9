//! Archive preparation for vault uploads.
//!
//! Validates the input paths and packs them into a single seekable file:
//! a zstd-compressed tar stream, or one regular file as-is.

mod error;
mod scanner;
mod tarball;
mod units;

pub use error::ArchiveError;
pub use scanner::{input_size, single_regular_file, total_input_size, validate_inputs};
pub use tarball::{DEFAULT_COMPRESSION_LEVEL, PreparedArchive, compress_inputs, open_uncompressed};
pub use units::human_readable_bytes;

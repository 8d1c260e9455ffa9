use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::TransferError;
use crate::treehash::{TreeHash, total_digest};

/// Inclusive byte range `first..=last` within an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

impl ByteRange {
    /// Range covering `len` bytes starting at `offset`. `len` must be non-zero.
    pub fn from_offset(offset: u64, len: u64) -> Self {
        debug_assert!(len > 0);
        Self {
            first: offset,
            last: offset + len - 1,
        }
    }

    /// Number of bytes covered. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Content-Range header value used for part uploads: `bytes 0-1048575/*`.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.first, self.last)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

impl FromStr for ByteRange {
    type Err = TransferError;

    /// Parses the service's `first-last` notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransferError::InvalidRange(s.to_string());
        let (first, last) = s.trim().split_once('-').ok_or_else(invalid)?;
        let first: u64 = first.trim().parse().map_err(|_| invalid())?;
        let last: u64 = last.trim().parse().map_err(|_| invalid())?;
        // A length of 2^64 bytes does not fit in a u64.
        if last < first || (first == 0 && last == u64::MAX) {
            return Err(invalid());
        }
        Ok(Self { first, last })
    }
}

/// A part the service reports as already received for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePartRecord {
    pub range: ByteRange,
    pub checksum: TreeHash,
}

/// Per-part tree hashes, keyed by part index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumTable {
    entries: BTreeMap<u64, TreeHash>,
}

impl ChecksumTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = (u64, TreeHash)>) {
        self.entries.extend(other);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Part indices in `0..part_count` with no entry.
    pub fn missing(&self, part_count: u64) -> Vec<u64> {
        (0..part_count)
            .filter(|idx| !self.entries.contains_key(idx))
            .collect()
    }

    /// Archive tree hash over parts `0..part_count`.
    ///
    /// Fails unless every index in range has exactly one entry and no
    /// entry lies outside it.
    pub fn total(&self, part_count: u64) -> Result<TreeHash, TransferError> {
        let missing = self.missing(part_count);
        if !missing.is_empty() {
            return Err(TransferError::IncompleteChecksums {
                expected: part_count,
                missing,
            });
        }
        if self.entries.len() as u64 != part_count {
            return Err(TransferError::IncompleteChecksums {
                expected: part_count,
                missing: Vec::new(),
            });
        }
        let ordered: Vec<TreeHash> = self.entries.values().copied().collect();
        total_digest(&ordered).ok_or(TransferError::IncompleteChecksums {
            expected: part_count,
            missing: Vec::new(),
        })
    }
}

impl FromIterator<(u64, TreeHash)> for ChecksumTable {
    fn from_iter<I: IntoIterator<Item = (u64, TreeHash)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

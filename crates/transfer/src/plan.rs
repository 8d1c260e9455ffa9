//! Part planning and resume reconciliation.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::TransferError;
use crate::archive::Archive;
use crate::treehash::{TreeHash, part_digest};
use crate::types::{ByteRange, RemotePartRecord};
use crate::validation::PartSize;

/// Part layout of one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    file_size: u64,
    part_size: PartSize,
}

impl PartPlan {
    pub fn new(file_size: u64, part_size: PartSize) -> Self {
        Self {
            file_size,
            part_size,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn part_size(&self) -> PartSize {
        self.part_size
    }

    /// Every part's starting offset, ascending.
    pub fn jobs(&self) -> BTreeSet<u64> {
        (0..self.file_size)
            .step_by(self.part_size.bytes() as usize)
            .collect()
    }

    /// `ceil(file_size / part_size)`.
    pub fn part_count(&self) -> u64 {
        self.file_size.div_ceil(self.part_size.bytes())
    }

    pub fn part_index(&self, offset: u64) -> u64 {
        offset / self.part_size.bytes()
    }

    /// Length of the part starting at `offset`; only the last part is short.
    pub fn part_len(&self, offset: u64) -> u64 {
        self.part_size
            .bytes()
            .min(self.file_size.saturating_sub(offset))
    }

    pub fn byte_range(&self, offset: u64) -> ByteRange {
        ByteRange::from_offset(offset, self.part_len(offset))
    }

    /// Whether `range` is exactly one planned part.
    pub fn is_planned_range(&self, range: &ByteRange) -> bool {
        if range.first >= self.file_size || range.first % self.part_size.bytes() != 0 {
            return false;
        }
        // Remote ranges are unchecked; `len()` would overflow on a full-width one.
        range.last.checked_sub(range.first) == Some(self.part_len(range.first) - 1)
    }
}

/// Outcome of checking a resumed session against local data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Offsets that still need uploading.
    pub remaining: BTreeSet<u64>,
    /// Verified checksums of parts already on the remote side, by part index.
    pub known: BTreeMap<u64, TreeHash>,
}

/// Re-hashes every part the service claims to have and keeps only those
/// whose local bytes produce the same tree hash. Blocking.
///
/// Everything else, including ranges that do not line up with the plan,
/// stays in `remaining`.
pub fn reconcile(
    plan: &PartPlan,
    archive: &Archive,
    records: &[RemotePartRecord],
) -> Result<Reconciliation, TransferError> {
    let mut known = BTreeMap::new();

    for record in records {
        let range = record.range;
        if !plan.is_planned_range(&range) {
            warn!(range = %range, "remote part does not match local layout, will re-upload");
            continue;
        }

        let bytes = archive.read_range(range.first, range.len())?;
        let local = part_digest(&bytes);
        if local == record.checksum {
            known.insert(plan.part_index(range.first), local);
        } else {
            warn!(
                range = %range,
                local = %local,
                remote = %record.checksum,
                "remote part checksum mismatch, will re-upload"
            );
        }
    }

    let verified: BTreeSet<u64> = known
        .keys()
        .map(|idx| idx * plan.part_size().bytes())
        .collect();
    let remaining: BTreeSet<u64> = plan.jobs().difference(&verified).copied().collect();

    debug!(
        claimed = records.len(),
        verified = known.len(),
        remaining = remaining.len(),
        "reconciled remote parts"
    );

    Ok(Reconciliation { remaining, known })
}

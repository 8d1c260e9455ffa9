use std::fmt;

use crate::TransferError;

const MIB: u64 = 1024 * 1024;

/// Smallest part size the service accepts, in MiB.
pub const MIN_PART_SIZE_MIB: u64 = 1;

/// Largest part size the service accepts, in MiB.
pub const MAX_PART_SIZE_MIB: u64 = 4096;

/// Validated multipart part size.
///
/// Always a power of two between 1 MiB and 4096 MiB inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartSize(u64);

impl PartSize {
    /// Validates a part size given in MiB.
    ///
    /// Rejects:
    /// - Zero
    /// - Values that are not a power of two
    /// - Values outside `[1, 4096]`
    pub fn from_mib(mib: u64) -> Result<Self, TransferError> {
        if !mib.is_power_of_two() {
            return Err(TransferError::InvalidPartSize(format!(
                "{mib} MiB is not a power of two"
            )));
        }
        if !(MIN_PART_SIZE_MIB..=MAX_PART_SIZE_MIB).contains(&mib) {
            return Err(TransferError::InvalidPartSize(format!(
                "{mib} MiB is outside {MIN_PART_SIZE_MIB}..={MAX_PART_SIZE_MIB} MiB"
            )));
        }
        Ok(Self(mib * MIB))
    }

    /// Validates a part size reported in bytes (e.g. by a resumed session).
    pub fn from_bytes(bytes: u64) -> Result<Self, TransferError> {
        if bytes % MIB != 0 {
            return Err(TransferError::InvalidPartSize(format!(
                "{bytes} bytes is not a whole number of MiB"
            )));
        }
        Self::from_mib(bytes / MIB)
    }

    /// Size in bytes.
    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Size in MiB.
    pub fn mib(self) -> u64 {
        self.0 / MIB
    }
}

impl Default for PartSize {
    /// 8 MiB.
    fn default() -> Self {
        Self(8 * MIB)
    }
}

impl fmt::Display for PartSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MiB", self.mib())
    }
}

//! In-memory vault used by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use glacier_transfer::{ByteRange, PartSize, RemotePartRecord, TreeHash, part_digest};

use crate::error::VaultError;
use crate::vault::{ArchiveReceipt, PartListing, VaultClient, VaultFuture};

#[derive(Default)]
struct MockState {
    /// Offset -> failures still to inject before the part succeeds.
    transient: HashMap<u64, u32>,
    /// Offsets whose upload always fails.
    always_fail: HashSet<u64>,
    /// Offset -> wrong checksums still to return.
    corrupt: HashMap<u64, u32>,
    /// Upload attempts per offset.
    attempts: HashMap<u64, u32>,
    /// Parts stored so far, by offset.
    received: BTreeMap<u64, Vec<u8>>,
    /// Pre-seeded part listing pages for resume.
    pages: Vec<PartListing>,
    list_calls: usize,
    initiated: Vec<(String, PartSize)>,
    completed: Option<(String, u64, TreeHash)>,
    single_shot: Option<Vec<u8>>,
    complete_override: Option<TreeHash>,
    aborted: Vec<String>,
    deleted: Vec<String>,
}

pub struct MockVault {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Duration,
}

impl Default for MockVault {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVault {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            latency: Duration::from_millis(5),
        }
    }

    /// Mock whose part uploads each take `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    pub fn fail_transiently(&self, offset: u64, times: u32) {
        self.state.lock().unwrap().transient.insert(offset, times);
    }

    pub fn fail_always(&self, offset: u64) {
        self.state.lock().unwrap().always_fail.insert(offset);
    }

    pub fn corrupt_checksum(&self, offset: u64, times: u32) {
        self.state.lock().unwrap().corrupt.insert(offset, times);
    }

    pub fn seed_part(&self, offset: u64, bytes: Vec<u8>) {
        self.state.lock().unwrap().received.insert(offset, bytes);
    }

    pub fn seed_pages(&self, pages: Vec<PartListing>) {
        self.state.lock().unwrap().pages = pages;
    }

    pub fn override_final_checksum(&self, checksum: TreeHash) {
        self.state.lock().unwrap().complete_override = Some(checksum);
    }

    pub fn attempts(&self, offset: u64) -> u32 {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(&offset)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts.values().sum()
    }

    pub fn received_offsets(&self) -> Vec<u64> {
        self.state.lock().unwrap().received.keys().copied().collect()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn initiated(&self) -> Vec<(String, PartSize)> {
        self.state.lock().unwrap().initiated.clone()
    }

    pub fn completed(&self) -> Option<(String, u64, TreeHash)> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn single_shot_body(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().single_shot.clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Whether any remote call was made at all.
    pub fn untouched(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.attempts.is_empty()
            && s.list_calls == 0
            && s.initiated.is_empty()
            && s.completed.is_none()
            && s.single_shot.is_none()
    }
}

fn receipt(checksum: TreeHash) -> ArchiveReceipt {
    ArchiveReceipt {
        checksum,
        location: "/-/vaults/test/archives/archive-1".into(),
        archive_id: "archive-1".into(),
    }
}

impl VaultClient for MockVault {
    fn initiate_multipart_upload<'a>(
        &'a self,
        _vault: &'a str,
        description: &'a str,
        part_size: PartSize,
    ) -> VaultFuture<'a, String> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.initiated.push((description.to_string(), part_size));
            Ok(format!("upload-{}", s.initiated.len()))
        })
    }

    fn list_parts<'a>(
        &'a self,
        _vault: &'a str,
        _upload_id: &'a str,
        marker: Option<&'a str>,
    ) -> VaultFuture<'a, PartListing> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.list_calls += 1;
            let page = match marker {
                None => 0,
                Some(m) => m
                    .parse::<usize>()
                    .map_err(|_| VaultError::Service(format!("bad marker {m}")))?,
            };
            s.pages
                .get(page)
                .cloned()
                .ok_or_else(|| VaultError::Service("no such upload".into()))
        })
    }

    fn upload_part<'a>(
        &'a self,
        _vault: &'a str,
        _upload_id: &'a str,
        range: ByteRange,
        checksum: TreeHash,
        body: &'a [u8],
    ) -> VaultFuture<'a, TreeHash> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let offset = range.first;
            let mut s = self.state.lock().unwrap();
            *s.attempts.entry(offset).or_default() += 1;

            if s.always_fail.contains(&offset) {
                return Err(VaultError::Transport("connection reset".into()));
            }
            if let Some(left) = s.transient.get_mut(&offset).filter(|n| **n > 0) {
                *left -= 1;
                return Err(VaultError::Service("throttled".into()));
            }
            if let Some(left) = s.corrupt.get_mut(&offset).filter(|n| **n > 0) {
                *left -= 1;
                return Ok(part_digest(b"garbage"));
            }

            let computed = part_digest(body);
            if computed != checksum {
                return Err(VaultError::Service("checksum does not match body".into()));
            }
            s.received.insert(offset, body.to_vec());
            Ok(computed)
        })
    }

    fn complete_multipart_upload<'a>(
        &'a self,
        _vault: &'a str,
        upload_id: &'a str,
        archive_size: u64,
        checksum: TreeHash,
    ) -> VaultFuture<'a, ArchiveReceipt> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            let assembled: Vec<u8> = s.received.values().flatten().copied().collect();
            if assembled.len() as u64 != archive_size {
                return Err(VaultError::Service(format!(
                    "size mismatch: have {}, told {archive_size}",
                    assembled.len()
                )));
            }
            let remote = s.complete_override.unwrap_or_else(|| part_digest(&assembled));
            s.completed = Some((upload_id.to_string(), archive_size, checksum));
            Ok(receipt(remote))
        })
    }

    fn upload_archive<'a>(
        &'a self,
        _vault: &'a str,
        _description: &'a str,
        _checksum: TreeHash,
        body: &'a [u8],
    ) -> VaultFuture<'a, ArchiveReceipt> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.single_shot = Some(body.to_vec());
            Ok(receipt(part_digest(body)))
        })
    }

    fn abort_multipart_upload<'a>(
        &'a self,
        _vault: &'a str,
        upload_id: &'a str,
    ) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().unwrap().aborted.push(upload_id.to_string());
            Ok(())
        })
    }

    fn delete_archive<'a>(&'a self, _vault: &'a str, archive_id: &'a str) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().unwrap().deleted.push(archive_id.to_string());
            Ok(())
        })
    }
}

/// Builds a listing page claiming the given parts.
pub fn page(part_size: PartSize, parts: &[(u64, &[u8])], marker: Option<&str>) -> PartListing {
    PartListing {
        parts: parts
            .iter()
            .map(|(offset, bytes)| RemotePartRecord {
                range: ByteRange::from_offset(*offset, bytes.len() as u64),
                checksum: part_digest(bytes),
            })
            .collect(),
        part_size: part_size.bytes(),
        marker: marker.map(String::from),
    }
}

//! Bounded-concurrency part uploader.
//!
//! Workers pull offsets from a shared queue, read their part through the
//! shared [`Archive`] (one reader at a time), hash it off the async runtime
//! and send it, retrying only the transfer step. The first job that runs
//! out of attempts cancels the rest.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use glacier_transfer::{Archive, PartPlan, SpeedCalculator, TreeHash, part_digest};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PartError, PoolError, PoolFailure};
use crate::retry::RetryPolicy;
use crate::types::{DEFAULT_THREADS, UploadEvent, UploadSession};
use crate::vault::VaultClient;

/// Checksums and attempt counts of a fully successful run.
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Part index -> verified checksum.
    pub checksums: BTreeMap<u64, TreeHash>,
    /// Offset -> attempts the part needed.
    pub attempts: BTreeMap<u64, u32>,
}

/// Runs part uploads for one multipart session.
pub struct UploadWorkerPool {
    client: Arc<dyn VaultClient>,
    session: UploadSession,
    archive: Archive,
    plan: PartPlan,
    threads: usize,
    retry: RetryPolicy,
    events: Option<mpsc::Sender<UploadEvent>>,
    cancel: CancellationToken,
}

enum JobResult {
    Done { checksum: TreeHash, attempts: u32 },
    Failed { attempts: u32, cause: PartError },
    Aborted,
}

#[derive(Default)]
struct PoolState {
    done: BTreeMap<u64, (TreeHash, u32)>,
    aborted: BTreeSet<u64>,
    failure: Option<(u64, u32, PartError)>,
}

struct Shared {
    client: Arc<dyn VaultClient>,
    session: UploadSession,
    archive: Archive,
    plan: PartPlan,
    retry: RetryPolicy,
    events: Option<mpsc::Sender<UploadEvent>>,
    token: CancellationToken,
    queue: Mutex<VecDeque<u64>>,
    state: Mutex<PoolState>,
    speed: SpeedCalculator,
    /// Bytes of jobs not yet acknowledged.
    pending_bytes: AtomicU64,
}

impl UploadWorkerPool {
    pub fn new(
        client: Arc<dyn VaultClient>,
        session: UploadSession,
        archive: Archive,
        plan: PartPlan,
    ) -> Self {
        Self {
            client,
            session,
            archive,
            plan,
            threads: DEFAULT_THREADS,
            retry: RetryPolicy::default(),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Number of concurrent workers (at least one).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends per-part progress to `tx`.
    pub fn events(mut self, tx: mpsc::Sender<UploadEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Cancelling `token` stops the pool. The pool cancels only a child of it.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Uploads every offset in `jobs`.
    ///
    /// Succeeds only if all of them were sent and acknowledged with a
    /// matching checksum.
    pub async fn run(self, jobs: BTreeSet<u64>) -> Result<PoolReport, PoolError> {
        let job_count = jobs.len();
        let workers = self.threads.min(job_count.max(1));
        let pending_bytes = jobs.iter().map(|&offset| self.plan.part_len(offset)).sum();
        let shared = Arc::new(Shared {
            client: self.client,
            session: self.session,
            archive: self.archive,
            plan: self.plan,
            retry: self.retry,
            events: self.events,
            token: self.cancel.child_token(),
            queue: Mutex::new(jobs.iter().copied().collect()),
            state: Mutex::new(PoolState::default()),
            speed: SpeedCalculator::default(),
            pending_bytes: AtomicU64::new(pending_bytes),
        });

        info!(
            upload_id = %shared.session.upload_id,
            jobs = job_count,
            workers,
            "starting part uploads"
        );

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            set.spawn(async move { worker_loop(worker, shared).await });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "upload worker died");
                shared.token.cancel();
                let mut state = shared.lock_state();
                if state.failure.is_none() {
                    // The worker's in-hand job is the first one nobody accounted for.
                    let queued: BTreeSet<u64> = shared.lock_queue().iter().copied().collect();
                    let lost = jobs.iter().copied().find(|offset| {
                        !state.done.contains_key(offset)
                            && !state.aborted.contains(offset)
                            && !queued.contains(offset)
                    });
                    if let Some(offset) = lost {
                        state.failure = Some((offset, 0, PartError::Join(e.to_string())));
                    }
                }
            }
        }

        let leftover: Vec<u64> = shared.lock_queue().drain(..).collect();
        let mut state = std::mem::take(&mut *shared.lock_state());
        state.aborted.extend(leftover);

        if let Some((offset, attempts, cause)) = state.failure {
            error!(offset, attempts, error = %cause, "part upload failed, pool cancelled");
            return Err(PoolError::Failed(PoolFailure {
                offset,
                attempts,
                cause,
                succeeded: state.done.keys().copied().collect(),
                aborted: state.aborted.into_iter().collect(),
            }));
        }

        if state.done.len() < job_count {
            warn!(
                done = state.done.len(),
                aborted = state.aborted.len(),
                "part uploads cancelled"
            );
            return Err(PoolError::Cancelled {
                succeeded: state.done.keys().copied().collect(),
                aborted: state.aborted.into_iter().collect(),
            });
        }

        let mut report = PoolReport::default();
        for (offset, (checksum, attempts)) in state.done {
            report.checksums.insert(shared.plan.part_index(offset), checksum);
            report.attempts.insert(offset, attempts);
        }
        debug!(parts = report.checksums.len(), "all parts uploaded");
        Ok(report)
    }
}

impl Shared {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<u64>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

async fn worker_loop(worker: usize, shared: Arc<Shared>) {
    loop {
        if shared.token.is_cancelled() {
            break;
        }
        let Some(offset) = shared.lock_queue().pop_front() else {
            break;
        };

        let result = upload_job(&shared, offset).await;
        let mut state = shared.lock_state();
        match result {
            JobResult::Done { checksum, attempts } => {
                state.done.insert(offset, (checksum, attempts));
            }
            JobResult::Aborted => {
                state.aborted.insert(offset);
            }
            JobResult::Failed { attempts, cause } => {
                if state.failure.is_none() {
                    state.failure = Some((offset, attempts, cause));
                } else {
                    state.aborted.insert(offset);
                }
                shared.token.cancel();
                break;
            }
        }
    }
    debug!(worker, "upload worker finished");
}

async fn upload_job(shared: &Shared, offset: u64) -> JobResult {
    let len = shared.plan.part_len(offset);
    let range = shared.plan.byte_range(offset);

    // The read holds the archive lock; hashing runs after it is released.
    let archive = shared.archive.clone();
    let read = tokio::task::spawn_blocking(move || {
        archive
            .read_range(offset, len)
            .map(|bytes| {
                let checksum = part_digest(&bytes);
                (bytes, checksum)
            })
    })
    .await;

    let (bytes, local) = match read {
        Ok(Ok(read)) => read,
        Ok(Err(e)) => {
            return JobResult::Failed {
                attempts: 0,
                cause: PartError::Read(e),
            };
        }
        Err(e) => {
            return JobResult::Failed {
                attempts: 0,
                cause: PartError::Join(e.to_string()),
            };
        }
    };

    let max_attempts = shared.retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if shared.token.is_cancelled() {
            return JobResult::Aborted;
        }
        attempt += 1;

        let sent = shared
            .client
            .upload_part(
                &shared.session.vault,
                &shared.session.upload_id,
                range,
                local,
                &bytes,
            )
            .await;

        // A call that finishes after cancellation does not count.
        if shared.token.is_cancelled() {
            return JobResult::Aborted;
        }

        let cause = match sent {
            Ok(remote) if remote == local => {
                shared.speed.add_sample(len);
                let pending = shared
                    .pending_bytes
                    .fetch_sub(len, Ordering::Relaxed)
                    .saturating_sub(len);
                shared.emit(UploadEvent::PartUploaded {
                    part_index: shared.plan.part_index(offset),
                    offset,
                    bytes: len,
                    attempts: attempt,
                    bytes_per_second: shared.speed.bytes_per_second(),
                    eta: shared.speed.eta(pending),
                });
                debug!(range = %range, attempts = attempt, "part uploaded");
                return JobResult::Done {
                    checksum: local,
                    attempts: attempt,
                };
            }
            Ok(remote) => PartError::ChecksumMismatch { local, remote },
            Err(e) => PartError::Vault(e),
        };

        if attempt >= max_attempts {
            return JobResult::Failed {
                attempts: attempt,
                cause,
            };
        }

        warn!(range = %range, attempt, error = %cause, "part upload failed, retrying");
        shared.emit(UploadEvent::PartRetry {
            offset,
            attempt,
            error: cause.to_string(),
        });

        let delay = shared.retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::select! {
                _ = shared.token.cancelled() => return JobResult::Aborted,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVault;
    use glacier_transfer::PartSize;
    use std::io::{self, Cursor, Read, Seek, SeekFrom};
    use std::time::Duration;

    const MIB: u64 = 1024 * 1024;

    fn session() -> UploadSession {
        UploadSession {
            upload_id: "upload-1".into(),
            part_size: PartSize::from_mib(1).unwrap(),
            vault: "test".into(),
            description: String::new(),
        }
    }

    fn data(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn pool(mock: &Arc<MockVault>, len: u64, threads: usize) -> (UploadWorkerPool, PartPlan) {
        let archive = Archive::new(Cursor::new(data(len))).unwrap();
        let plan = PartPlan::new(len, PartSize::from_mib(1).unwrap());
        let client: Arc<dyn VaultClient> = mock.clone();
        let pool = UploadWorkerPool::new(client, session(), archive, plan)
            .threads(threads)
            .retry(RetryPolicy::immediate(10));
        (pool, plan)
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_third_attempt() {
        let mock = Arc::new(MockVault::new());
        mock.fail_transiently(2 * MIB, 2);
        let (pool, plan) = pool(&mock, 5 * MIB, 2);

        let report = pool.run(plan.jobs()).await.unwrap();

        assert_eq!(report.checksums.len(), 5);
        let expected = part_digest(&data(5 * MIB)[2 * MIB as usize..3 * MIB as usize]);
        assert_eq!(report.checksums[&2], expected);
        assert_eq!(report.attempts[&(2 * MIB)], 3);
        assert_eq!(report.attempts[&0], 1);
        assert_eq!(mock.received_offsets().len(), 5);
    }

    #[tokio::test]
    async fn exhausted_job_fails_the_pool() {
        let mock = Arc::new(MockVault::new());
        mock.fail_always(3 * MIB);
        let (pool, plan) = pool(&mock, 5 * MIB, 2);

        let err = pool.run(plan.jobs()).await.unwrap_err();
        let PoolError::Failed(failure) = err else {
            panic!("expected failure, got {err:?}");
        };

        assert_eq!(failure.offset, 3 * MIB);
        assert_eq!(failure.attempts, 10);
        assert_eq!(mock.attempts(3 * MIB), 10);
        assert!(failure.to_string().contains(&(3 * MIB).to_string()));

        let mut accounted: Vec<u64> = failure
            .succeeded
            .iter()
            .chain(&failure.aborted)
            .copied()
            .chain([failure.offset])
            .collect();
        accounted.sort_unstable();
        assert_eq!(accounted, plan.jobs().into_iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn checksum_mismatch_is_retried() {
        let mock = Arc::new(MockVault::new());
        mock.corrupt_checksum(MIB, 1);
        let (pool, plan) = pool(&mock, 2 * MIB + 10, 3);

        let report = pool.run(plan.jobs()).await.unwrap();

        assert_eq!(report.checksums.len(), 3);
        assert_eq!(report.attempts[&MIB], 2);
        assert_eq!(report.attempts[&(2 * MIB)], 1);
    }

    #[tokio::test]
    async fn mismatch_every_time_exhausts_attempts() {
        let mock = Arc::new(MockVault::new());
        mock.corrupt_checksum(0, u32::MAX);
        let (pool, plan) = pool(&mock, MIB, 1);

        let err = pool.run(plan.jobs()).await.unwrap_err();
        let PoolError::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert!(matches!(failure.cause, PartError::ChecksumMismatch { .. }));
        assert_eq!(failure.attempts, 10);
    }

    #[tokio::test]
    async fn concurrency_bounded_by_threads() {
        let mock = Arc::new(MockVault::with_latency(Duration::from_millis(100)));
        let (pool, plan) = pool(&mock, 8 * MIB, 3);

        pool.run(plan.jobs()).await.unwrap();

        assert!(mock.peak_in_flight() <= 3);
        assert!(mock.peak_in_flight() >= 2, "transfers never overlapped");
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let mock = Arc::new(MockVault::new());
        let token = CancellationToken::new();
        token.cancel();
        let (pool, plan) = pool(&mock, 3 * MIB, 2);

        let err = pool.cancel_token(token).run(plan.jobs()).await.unwrap_err();

        match err {
            PoolError::Cancelled { succeeded, aborted } => {
                assert!(succeeded.is_empty());
                assert_eq!(aborted.len(), 3);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(mock.total_attempts(), 0);
    }

    #[tokio::test]
    async fn empty_job_set_succeeds() {
        let mock = Arc::new(MockVault::new());
        let (pool, _) = pool(&mock, 2 * MIB, 2);

        let report = pool.run(BTreeSet::new()).await.unwrap();

        assert!(report.checksums.is_empty());
        assert_eq!(mock.total_attempts(), 0);
    }

    /// Reports a length but fails every read.
    struct Unreadable {
        len: u64,
        pos: u64,
    }

    impl Read for Unreadable {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
    }

    impl Seek for Unreadable {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.pos = match pos {
                SeekFrom::Start(p) => p,
                SeekFrom::End(d) => (self.len as i64 + d) as u64,
                SeekFrom::Current(d) => (self.pos as i64 + d) as u64,
            };
            Ok(self.pos)
        }
    }

    #[tokio::test]
    async fn read_failure_is_not_retried() {
        let mock = Arc::new(MockVault::new());
        let archive = Archive::new(Unreadable { len: 2 * MIB, pos: 0 }).unwrap();
        let plan = PartPlan::new(2 * MIB, PartSize::from_mib(1).unwrap());
        let client: Arc<dyn VaultClient> = mock.clone();

        let err = UploadWorkerPool::new(client, session(), archive, plan)
            .threads(1)
            .run(plan.jobs())
            .await
            .unwrap_err();

        let PoolError::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.offset, 0);
        assert_eq!(failure.attempts, 0);
        assert!(matches!(failure.cause, PartError::Read(_)));
        assert_eq!(failure.aborted, vec![MIB]);
        assert_eq!(mock.total_attempts(), 0);
    }

    #[tokio::test]
    async fn emits_progress_events() {
        let mock = Arc::new(MockVault::new());
        mock.fail_transiently(0, 1);
        let (tx, mut rx) = mpsc::channel(64);
        let (pool, plan) = pool(&mock, 2 * MIB, 1);

        pool.events(tx).run(plan.jobs()).await.unwrap();

        let mut retries = 0;
        let mut uploaded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                UploadEvent::PartRetry { offset, attempt, .. } => {
                    assert_eq!((offset, attempt), (0, 1));
                    retries += 1;
                }
                UploadEvent::PartUploaded { part_index, .. } => uploaded.push(part_index),
                _ => {}
            }
        }
        assert_eq!(retries, 1);
        uploaded.sort_unstable();
        assert_eq!(uploaded, vec![0, 1]);
    }
}

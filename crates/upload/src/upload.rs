//! Upload coordinator.
//!
//! Chooses between a single-request upload and a multipart session, opens
//! or resumes the session, drives the worker pool and commits the archive
//! with its total tree hash.

use std::collections::BTreeSet;
use std::sync::Arc;

use glacier_transfer::{
    Archive, ChecksumTable, PartPlan, PartSize, RemotePartRecord, SINGLE_SHOT_THRESHOLD,
    TransferError, TreeHash, part_digest, reconcile,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{UploadError, VaultError};
use crate::pool::UploadWorkerPool;
use crate::types::{
    UploadEvent, UploadOutcome, UploadRequest, UploadSession, UploadState, UploadStrategy,
};
use crate::vault::VaultClient;

/// Uploads archives to a vault and reports progress over a channel.
pub struct ArchiveUploader {
    client: Arc<dyn VaultClient>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

/// Parts still to send for a multipart session.
struct Pending {
    plan: PartPlan,
    remaining: BTreeSet<u64>,
    known: ChecksumTable,
}

impl ArchiveUploader {
    pub fn new(client: Arc<dyn VaultClient>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            client,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this uploader.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `archive` as described by `request`.
    ///
    /// Once a multipart session exists, every error comes back as
    /// [`UploadError::Interrupted`] carrying the upload id to resume with.
    pub async fn upload(
        &self,
        archive: Archive,
        request: &UploadRequest,
    ) -> Result<UploadOutcome, UploadError> {
        let mut state = UploadState::Idle;
        self.transition(&mut state, UploadState::SizeCheck);

        match self.run(archive, request, &mut state).await {
            Ok(outcome) => {
                self.transition(&mut state, UploadState::Done);
                info!(
                    archive_id = %outcome.archive_id,
                    size = outcome.archive_size,
                    checksum_verified = outcome.checksum_verified(),
                    "upload completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.transition(&mut state, UploadState::Failed);
                match e.upload_id() {
                    Some(id) => error!(upload_id = %id, error = %e, "upload failed"),
                    None => error!(error = %e, "upload failed"),
                }
                Err(e)
            }
        }
    }

    /// Discards a multipart session on the vault.
    pub async fn abort(&self, vault: &str, upload_id: &str) -> Result<(), UploadError> {
        self.client.abort_multipart_upload(vault, upload_id).await?;
        info!(vault, upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Deletes a stored archive.
    pub async fn delete(&self, vault: &str, archive_id: &str) -> Result<(), UploadError> {
        self.client.delete_archive(vault, archive_id).await?;
        info!(vault, archive_id, "archive deleted");
        Ok(())
    }

    async fn run(
        &self,
        archive: Archive,
        request: &UploadRequest,
        state: &mut UploadState,
    ) -> Result<UploadOutcome, UploadError> {
        let part_size = PartSize::from_mib(request.part_size_mib)?;
        if request.threads == 0 {
            return Err(UploadError::Config("thread count must be at least 1".into()));
        }
        if request.retry.max_attempts == 0 {
            return Err(UploadError::Config("max attempts must be at least 1".into()));
        }

        let file_size = archive.len();
        debug!(file_size, part_size = %part_size, "size check");

        if file_size < SINGLE_SHOT_THRESHOLD {
            if let Some(id) = &request.upload_id {
                warn!(upload_id = %id, file_size, "archive too small for multipart, ignoring upload id");
            }
            self.transition(state, UploadState::SingleShot);
            return self.single_shot(archive, request, state).await;
        }

        let session = match &request.upload_id {
            None => {
                self.transition(state, UploadState::MultipartInit);
                self.initiate(request, part_size).await?
            }
            Some(id) => {
                self.transition(state, UploadState::MultipartResume);
                UploadSession {
                    upload_id: id.clone(),
                    part_size,
                    vault: request.vault.clone(),
                    description: request.description.clone(),
                }
            }
        };

        let upload_id = session.upload_id.clone();
        self.multipart(session, archive, request, state)
            .await
            .map_err(|e| UploadError::Interrupted {
                upload_id,
                source: Box::new(e),
            })
    }

    async fn single_shot(
        &self,
        archive: Archive,
        request: &UploadRequest,
        state: &mut UploadState,
    ) -> Result<UploadOutcome, UploadError> {
        let len = archive.len();
        let (body, local) = tokio::task::spawn_blocking(move || {
            let checksum = archive.tree_hash()?;
            archive.read_range(0, len).map(|body| (body, checksum))
        })
        .await??;

        let receipt = self
            .client
            .upload_archive(&request.vault, &request.description, local, &body)
            .await?;

        self.transition(state, UploadState::Finalizing);
        self.check_final(local, receipt.checksum);

        Ok(UploadOutcome {
            strategy: UploadStrategy::SingleShot,
            archive_id: receipt.archive_id,
            location: receipt.location,
            archive_size: len,
            local_checksum: local,
            remote_checksum: receipt.checksum,
        })
    }

    async fn initiate(
        &self,
        request: &UploadRequest,
        part_size: PartSize,
    ) -> Result<UploadSession, UploadError> {
        let upload_id = self
            .client
            .initiate_multipart_upload(&request.vault, &request.description, part_size)
            .await?;
        info!(upload_id = %upload_id, part_size = %part_size, "multipart upload initiated");
        self.emit(UploadEvent::SessionReady {
            upload_id: upload_id.clone(),
            part_size,
            resumed: false,
        });
        Ok(UploadSession {
            upload_id,
            part_size,
            vault: request.vault.clone(),
            description: request.description.clone(),
        })
    }

    async fn multipart(
        &self,
        mut session: UploadSession,
        archive: Archive,
        request: &UploadRequest,
        state: &mut UploadState,
    ) -> Result<UploadOutcome, UploadError> {
        let file_size = archive.len();
        let pending = if request.upload_id.is_some() {
            self.resume(&mut session, &archive).await?
        } else {
            let plan = PartPlan::new(file_size, session.part_size);
            Pending {
                plan,
                remaining: plan.jobs(),
                known: ChecksumTable::new(),
            }
        };
        let Pending {
            plan,
            remaining,
            mut known,
        } = pending;
        let part_count = plan.part_count();
        let reused_parts = known.len() as u64;

        info!(
            upload_id = %session.upload_id,
            parts = part_count,
            remaining = remaining.len(),
            "parts planned"
        );
        self.emit(UploadEvent::Planned {
            file_size,
            parts: part_count,
            remaining: remaining.len() as u64,
        });

        self.transition(state, UploadState::Transferring);
        if !remaining.is_empty() {
            let report = UploadWorkerPool::new(
                Arc::clone(&self.client),
                session.clone(),
                archive.clone(),
                plan,
            )
            .threads(request.threads)
            .retry(request.retry.clone())
            .events(self.events_tx.clone())
            .cancel_token(self.cancel.clone())
            .run(remaining)
            .await?;
            known.extend(report.checksums);
        }

        let missing = known.missing(part_count);
        if !missing.is_empty() {
            warn!(
                missing = missing.len(),
                "checksum table incomplete after transfer, recomputing locally"
            );
            let recomputed = recompute(&archive, plan, missing).await?;
            known.extend(recomputed);
        }

        self.transition(state, UploadState::Finalizing);
        let local = known.total(part_count)?;
        let receipt = self
            .client
            .complete_multipart_upload(&session.vault, &session.upload_id, file_size, local)
            .await?;
        self.check_final(local, receipt.checksum);

        Ok(UploadOutcome {
            strategy: UploadStrategy::Multipart {
                upload_id: session.upload_id,
                parts: part_count,
                reused_parts,
            },
            archive_id: receipt.archive_id,
            location: receipt.location,
            archive_size: file_size,
            local_checksum: local,
            remote_checksum: receipt.checksum,
        })
    }

    /// Re-attaches to a session and works out which parts it still needs.
    async fn resume(
        &self,
        session: &mut UploadSession,
        archive: &Archive,
    ) -> Result<Pending, UploadError> {
        let (records, remote_part_size) = self.list_all_parts(session).await?;

        let part_size = PartSize::from_bytes(remote_part_size).map_err(|e| {
            VaultError::InvalidResponse(format!("session part size {remote_part_size}: {e}"))
        })?;
        if part_size != session.part_size {
            warn!(
                requested = %session.part_size,
                session = %part_size,
                "using the part size the session was created with"
            );
            session.part_size = part_size;
        }
        self.emit(UploadEvent::SessionReady {
            upload_id: session.upload_id.clone(),
            part_size,
            resumed: true,
        });

        let plan = PartPlan::new(archive.len(), part_size);
        let archive = archive.clone();
        let reconciled =
            tokio::task::spawn_blocking(move || reconcile(&plan, &archive, &records)).await??;
        info!(
            upload_id = %session.upload_id,
            verified = reconciled.known.len(),
            remaining = reconciled.remaining.len(),
            "resumed multipart upload"
        );

        Ok(Pending {
            plan,
            remaining: reconciled.remaining,
            known: reconciled.known.into_iter().collect(),
        })
    }

    /// Follows continuation markers until the listing is exhausted.
    async fn list_all_parts(
        &self,
        session: &UploadSession,
    ) -> Result<(Vec<RemotePartRecord>, u64), UploadError> {
        let mut records = Vec::new();
        let mut marker: Option<String> = None;
        let mut part_size = 0;
        loop {
            let page = self
                .client
                .list_parts(&session.vault, &session.upload_id, marker.as_deref())
                .await?;
            debug!(parts = page.parts.len(), more = page.marker.is_some(), "listed parts page");
            part_size = page.part_size;
            records.extend(page.parts);
            match page.marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok((records, part_size))
    }

    fn check_final(&self, local: TreeHash, remote: TreeHash) {
        if local != remote {
            warn!(
                local = %local,
                remote = %remote,
                "archive checksum differs from the vault's, the vault's record is authoritative"
            );
        }
        self.emit(UploadEvent::Finalized { local, remote });
    }

    fn transition(&self, state: &mut UploadState, to: UploadState) {
        let from = *state;
        *state = to;
        debug!(%from, %to, "upload state");
        self.emit(UploadEvent::StateChanged { from, to });
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

/// Hashes parts directly from the archive, bypassing the pool.
async fn recompute(
    archive: &Archive,
    plan: PartPlan,
    part_indices: Vec<u64>,
) -> Result<Vec<(u64, TreeHash)>, UploadError> {
    let archive = archive.clone();
    let part_size = plan.part_size().bytes();
    let hashed = tokio::task::spawn_blocking(move || {
        part_indices
            .into_iter()
            .map(|idx| -> Result<(u64, TreeHash), TransferError> {
                let offset = idx * part_size;
                let bytes = archive.read_range(offset, plan.part_len(offset))?;
                Ok((idx, part_digest(&bytes)))
            })
            .collect::<Result<Vec<_>, _>>()
    })
    .await??;
    Ok(hashed)
}

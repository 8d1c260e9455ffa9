//! Command execution.

use std::sync::Arc;

use anyhow::Context;
use glacier_archive::{
    ArchiveError, PreparedArchive, compress_inputs, human_readable_bytes, open_uncompressed,
};
use glacier_aws::GlacierClient;
use glacier_transfer::{Archive, PartSize};
use glacier_upload::{ArchiveUploader, UploadError, UploadEvent, UploadRequest, UploadStrategy};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::args::{Command, UploadArgs};
use crate::config::Config;

/// Exit status for a failed command: 2 when the inputs or options were
/// rejected before anything was sent, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let rejected = err.chain().any(|cause| {
        cause
            .downcast_ref::<UploadError>()
            .is_some_and(UploadError::is_config)
            || cause
                .downcast_ref::<ArchiveError>()
                .is_some_and(ArchiveError::is_config)
    });
    if rejected { 2 } else { 1 }
}

/// Runs one command to completion.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Upload(args) => upload(args, config).await,
        Command::Abort {
            vault,
            upload_id,
            region,
        } => {
            let uploader = connect(region.as_deref().or(config.region.as_deref())).await;
            uploader.abort(&vault, &upload_id).await?;
            println!("Aborted multipart upload {upload_id}");
            Ok(())
        }
        Command::Delete {
            vault,
            archive_id,
            region,
        } => {
            let uploader = connect(region.as_deref().or(config.region.as_deref())).await;
            uploader.delete(&vault, &archive_id).await?;
            println!("Deleted archive {archive_id}");
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

async fn connect(region: Option<&str>) -> ArchiveUploader {
    let client = GlacierClient::connect(region).await;
    ArchiveUploader::new(Arc::new(client))
}

fn build_request(args: &UploadArgs, config: &Config) -> UploadRequest {
    UploadRequest {
        vault: args.vault.clone(),
        description: args.description.clone().unwrap_or_default(),
        part_size_mib: args.part_size_mib.unwrap_or(config.part_size_mib),
        threads: args.threads.unwrap_or(config.threads),
        upload_id: args.upload_id.clone(),
        retry: config.retry_policy(),
    }
}

async fn upload(args: UploadArgs, config: Config) -> anyhow::Result<()> {
    let request = build_request(&args, &config);

    // Reject a bad part size before spending time on compression.
    PartSize::from_mib(request.part_size_mib).map_err(UploadError::from)?;
    if request.threads == 0 {
        return Err(UploadError::Config("--num-threads must be at least 1".into()).into());
    }

    let paths = args.paths.clone();
    let no_compress = args.no_compress;
    let level = config.compression_level;
    let prepared: PreparedArchive = tokio::task::spawn_blocking(move || {
        if no_compress {
            open_uncompressed(&paths)
        } else {
            compress_inputs(&paths, level)
        }
    })
    .await??;
    tracing::info!(
        input = %human_readable_bytes(prepared.input_bytes),
        size = %human_readable_bytes(prepared.archive_bytes),
        vault = %request.vault,
        "archive ready"
    );

    let region = args.region.as_deref().or(config.region.as_deref());
    let mut uploader = connect(region).await;
    let events = uploader.take_events().context("event receiver already taken")?;
    let logger = tokio::spawn(log_events(events));
    let interrupt = watch_interrupt(uploader.cancel_token());

    let archive = Archive::new(prepared.file)?;
    let result = uploader.upload(archive, &request).await;

    interrupt.abort();
    drop(uploader);
    let _ = logger.await;

    match result {
        Ok(outcome) => {
            if let UploadStrategy::Multipart { upload_id, parts, reused_parts } = &outcome.strategy
            {
                tracing::info!(upload_id = %upload_id, parts, reused_parts, "multipart upload finished");
            }
            println!("Archive ID: {}", outcome.archive_id);
            println!("Location:   {}", outcome.location);
            println!("Checksum:   {}", outcome.remote_checksum);
            if !outcome.checksum_verified() {
                println!("Warning: local checksum {} differs", outcome.local_checksum);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(id) = e.upload_id() {
                eprintln!("Upload interrupted. Resume with: --upload-id {id}");
            }
            Err(e.into())
        }
    }
}

/// Cancels `token` on Ctrl-C.
fn watch_interrupt(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight parts");
            token.cancel();
        }
    })
}

async fn log_events(mut events: mpsc::Receiver<UploadEvent>) {
    let mut total_parts = 0;
    let mut remaining = 0;
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::StateChanged { from, to } => {
                tracing::debug!(%from, %to, "state changed");
            }
            UploadEvent::SessionReady {
                upload_id,
                part_size,
                resumed,
            } => {
                tracing::info!(upload_id = %upload_id, part_size = %part_size, resumed, "session ready");
            }
            UploadEvent::Planned {
                file_size,
                parts,
                remaining: left,
            } => {
                total_parts = parts;
                remaining = left;
                tracing::info!(
                    size = %human_readable_bytes(file_size),
                    parts,
                    remaining = left,
                    "uploading parts"
                );
            }
            UploadEvent::PartRetry {
                offset,
                attempt,
                error,
            } => {
                tracing::debug!(offset, attempt, error = %error, "retrying part");
            }
            UploadEvent::PartUploaded {
                part_index,
                bytes,
                attempts,
                bytes_per_second,
                eta,
                ..
            } => {
                remaining = remaining.saturating_sub(1);
                tracing::info!(
                    part = part_index + 1,
                    of = total_parts,
                    size = %human_readable_bytes(bytes),
                    attempts,
                    speed = %format!("{}/s", human_readable_bytes(bytes_per_second as u64)),
                    remaining,
                    eta_secs = eta.map(|d| d.as_secs()),
                    "part uploaded"
                );
            }
            UploadEvent::Finalized { local, remote } => {
                tracing::debug!(local = %local, remote = %remote, "archive finalized");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn upload_args() -> UploadArgs {
        UploadArgs {
            vault: "photos".into(),
            paths: vec![PathBuf::from("dir")],
            ..UploadArgs::default()
        }
    }

    #[test]
    fn request_uses_config_defaults() {
        let config = Config {
            part_size_mib: 32,
            threads: 7,
            max_attempts: 4,
            ..Config::default()
        };
        let request = build_request(&upload_args(), &config);
        assert_eq!(request.vault, "photos");
        assert_eq!(request.description, "");
        assert_eq!(request.part_size_mib, 32);
        assert_eq!(request.threads, 7);
        assert_eq!(request.retry.max_attempts, 4);
        assert!(request.upload_id.is_none());
    }

    #[test]
    fn flags_override_config() {
        let args = UploadArgs {
            part_size_mib: Some(2),
            threads: Some(1),
            description: Some("2019 photos".into()),
            upload_id: Some("resume-me".into()),
            ..upload_args()
        };
        let request = build_request(&args, &Config::default());
        assert_eq!(request.part_size_mib, 2);
        assert_eq!(request.threads, 1);
        assert_eq!(request.description, "2019 photos");
        assert_eq!(request.upload_id.as_deref(), Some("resume-me"));
    }

    #[tokio::test]
    async fn bad_part_size_fails_before_touching_inputs() {
        let args = UploadArgs {
            part_size_mib: Some(3),
            paths: vec![PathBuf::from("/nonexistent/input")],
            ..upload_args()
        };
        let err = upload(args, Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("power of two"));
        assert_eq!(exit_code(&err), 2);
    }

    #[tokio::test]
    async fn zero_threads_is_rejected_input() {
        let args = UploadArgs {
            threads: Some(0),
            ..upload_args()
        };
        let err = upload(args, Config::default()).await.unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[tokio::test]
    async fn uncompressed_directory_is_rejected_input() {
        let dir = tempfile::tempdir().unwrap();
        let args = UploadArgs {
            no_compress: true,
            paths: vec![dir.path().to_path_buf()],
            ..upload_args()
        };
        let err = upload(args, Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("neither a regular file"));
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn runtime_failures_exit_with_one() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(exit_code(&ArchiveError::Io(missing).into()), 1);
        assert_eq!(exit_code(&UploadError::Cancelled.into()), 1);
        let resumable = UploadError::Interrupted {
            upload_id: "abc".into(),
            source: Box::new(UploadError::Cancelled),
        };
        assert_eq!(exit_code(&resumable.into()), 1);
    }
}

//! S3 Glacier client.
//!
//! Implements [`VaultClient`] with `aws-sdk-glacier`. Credentials and, unless
//! overridden, the region come from the default AWS provider chain.

use aws_config::BehaviorVersion;
use aws_sdk_glacier::Client;
use aws_sdk_glacier::config::Region;
use aws_sdk_glacier::error::{DisplayErrorContext, SdkError};
use aws_sdk_glacier::primitives::ByteStream;
use aws_sdk_glacier::types::PartListElement;
use glacier_transfer::{ByteRange, PartSize, RemotePartRecord, TreeHash};
use glacier_upload::{ArchiveReceipt, PartListing, VaultClient, VaultError, VaultFuture};
use tracing::debug;

/// Account id meaning "the account the credentials belong to".
const ACCOUNT_ID: &str = "-";

/// Vault client backed by the AWS SDK.
#[derive(Clone)]
pub struct GlacierClient {
    client: Client,
}

impl GlacierClient {
    /// Builds a client from the default provider chain.
    pub async fn connect(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        debug!(region = ?config.region(), "AWS config loaded");
        Self {
            client: Client::new(&config),
        }
    }
}

impl VaultClient for GlacierClient {
    fn initiate_multipart_upload<'a>(
        &'a self,
        vault: &'a str,
        description: &'a str,
        part_size: PartSize,
    ) -> VaultFuture<'a, String> {
        Box::pin(async move {
            let output = self
                .client
                .initiate_multipart_upload()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .archive_description(description)
                .part_size(part_size.bytes().to_string())
                .send()
                .await
                .map_err(|e| vault_error("initiate multipart upload", e))?;
            output
                .upload_id()
                .map(str::to_string)
                .ok_or_else(|| VaultError::InvalidResponse("missing upload id".into()))
        })
    }

    fn list_parts<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
        marker: Option<&'a str>,
    ) -> VaultFuture<'a, PartListing> {
        Box::pin(async move {
            let output = self
                .client
                .list_parts()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .upload_id(upload_id)
                .set_marker(marker.map(str::to_string))
                .send()
                .await
                .map_err(|e| vault_error("list parts", e))?;

            let parts = output
                .parts()
                .iter()
                .map(part_record)
                .collect::<Result<Vec<_>, _>>()?;
            let part_size = u64::try_from(output.part_size_in_bytes()).map_err(|_| {
                VaultError::InvalidResponse(format!(
                    "negative part size {}",
                    output.part_size_in_bytes()
                ))
            })?;

            Ok(PartListing {
                parts,
                part_size,
                marker: output.marker().map(str::to_string),
            })
        })
    }

    fn upload_part<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
        range: ByteRange,
        checksum: TreeHash,
        body: &'a [u8],
    ) -> VaultFuture<'a, TreeHash> {
        Box::pin(async move {
            let output = self
                .client
                .upload_multipart_part()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .upload_id(upload_id)
                .range(range.content_range())
                .checksum(checksum.to_hex())
                .body(ByteStream::from(body.to_vec()))
                .send()
                .await
                .map_err(|e| vault_error("upload part", e))?;
            parse_checksum(output.checksum())
        })
    }

    fn complete_multipart_upload<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
        archive_size: u64,
        checksum: TreeHash,
    ) -> VaultFuture<'a, ArchiveReceipt> {
        Box::pin(async move {
            let output = self
                .client
                .complete_multipart_upload()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .upload_id(upload_id)
                .archive_size(archive_size.to_string())
                .checksum(checksum.to_hex())
                .send()
                .await
                .map_err(|e| vault_error("complete multipart upload", e))?;
            receipt(output.checksum(), output.location(), output.archive_id())
        })
    }

    fn upload_archive<'a>(
        &'a self,
        vault: &'a str,
        description: &'a str,
        checksum: TreeHash,
        body: &'a [u8],
    ) -> VaultFuture<'a, ArchiveReceipt> {
        Box::pin(async move {
            let output = self
                .client
                .upload_archive()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .archive_description(description)
                .checksum(checksum.to_hex())
                .body(ByteStream::from(body.to_vec()))
                .send()
                .await
                .map_err(|e| vault_error("upload archive", e))?;
            receipt(output.checksum(), output.location(), output.archive_id())
        })
    }

    fn abort_multipart_upload<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
    ) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .abort_multipart_upload()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| vault_error("abort multipart upload", e))?;
            Ok(())
        })
    }

    fn delete_archive<'a>(&'a self, vault: &'a str, archive_id: &'a str) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .delete_archive()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .archive_id(archive_id)
                .send()
                .await
                .map_err(|e| vault_error("delete archive", e))?;
            Ok(())
        })
    }
}

/// Service-side failures and transport failures are kept apart for logging;
/// the pool retries both.
fn vault_error<E, R>(operation: &str, err: SdkError<E, R>) -> VaultError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{operation}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::ServiceError(_) => VaultError::Service(detail),
        _ => VaultError::Transport(detail),
    }
}

fn part_record(part: &PartListElement) -> Result<RemotePartRecord, VaultError> {
    parse_part(part.range_in_bytes(), part.sha256_tree_hash())
}

fn parse_part(range: Option<&str>, checksum: Option<&str>) -> Result<RemotePartRecord, VaultError> {
    let range = range
        .ok_or_else(|| VaultError::InvalidResponse("part without range".into()))?
        .parse::<ByteRange>()
        .map_err(|e| VaultError::InvalidResponse(e.to_string()))?;
    Ok(RemotePartRecord {
        range,
        checksum: parse_checksum(checksum)?,
    })
}

fn parse_checksum(checksum: Option<&str>) -> Result<TreeHash, VaultError> {
    checksum
        .ok_or_else(|| VaultError::InvalidResponse("missing checksum".into()))?
        .parse()
        .map_err(|e: glacier_transfer::TransferError| VaultError::InvalidResponse(e.to_string()))
}

fn receipt(
    checksum: Option<&str>,
    location: Option<&str>,
    archive_id: Option<&str>,
) -> Result<ArchiveReceipt, VaultError> {
    Ok(ArchiveReceipt {
        checksum: parse_checksum(checksum)?,
        location: location.unwrap_or_default().to_string(),
        archive_id: archive_id
            .ok_or_else(|| VaultError::InvalidResponse("missing archive id".into()))?
            .to_string(),
    })
}

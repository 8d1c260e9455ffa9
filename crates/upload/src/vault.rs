//! Remote vault boundary.
//!
//! `VaultClient` is implemented over the AWS SDK in `glacier-aws`. Keeping
//! it a trait keeps the engine decoupled from the SDK and testable with
//! mocks.

use std::future::Future;
use std::pin::Pin;

use glacier_transfer::{ByteRange, PartSize, RemotePartRecord, TreeHash};

use crate::error::VaultError;

/// Boxed future returned by [`VaultClient`] methods.
pub type VaultFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VaultError>> + Send + 'a>>;

/// One page of a session's part inventory.
#[derive(Debug, Clone, Default)]
pub struct PartListing {
    pub parts: Vec<RemotePartRecord>,
    /// Part size the session was initiated with, in bytes.
    pub part_size: u64,
    /// Continuation marker; `None` on the last page.
    pub marker: Option<String>,
}

/// What the vault reports once an archive is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    pub checksum: TreeHash,
    pub location: String,
    pub archive_id: String,
}

/// Abstract connection to an archival vault service.
pub trait VaultClient: Send + Sync {
    /// Opens a multipart session and returns its upload id.
    fn initiate_multipart_upload<'a>(
        &'a self,
        vault: &'a str,
        description: &'a str,
        part_size: PartSize,
    ) -> VaultFuture<'a, String>;

    /// Lists parts already received for a session, one page at a time.
    fn list_parts<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
        marker: Option<&'a str>,
    ) -> VaultFuture<'a, PartListing>;

    /// Uploads one part and returns the tree hash the service computed.
    fn upload_part<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
        range: ByteRange,
        checksum: TreeHash,
        body: &'a [u8],
    ) -> VaultFuture<'a, TreeHash>;

    /// Assembles the uploaded parts into an archive.
    fn complete_multipart_upload<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
        archive_size: u64,
        checksum: TreeHash,
    ) -> VaultFuture<'a, ArchiveReceipt>;

    /// Uploads a whole archive in one request.
    fn upload_archive<'a>(
        &'a self,
        vault: &'a str,
        description: &'a str,
        checksum: TreeHash,
        body: &'a [u8],
    ) -> VaultFuture<'a, ArchiveReceipt>;

    /// Discards a multipart session and the parts uploaded so far.
    fn abort_multipart_upload<'a>(
        &'a self,
        vault: &'a str,
        upload_id: &'a str,
    ) -> VaultFuture<'a, ()>;

    /// Deletes a stored archive.
    fn delete_archive<'a>(&'a self, vault: &'a str, archive_id: &'a str) -> VaultFuture<'a, ()>;
}

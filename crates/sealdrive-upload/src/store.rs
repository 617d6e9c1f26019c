//! Multipart storage protocol
//!
//! The remote contract: parts are uploaded independently, acknowledged with
//! an eTag, and assembled by submitting the ordered part list. Non-final
//! parts must be at least `MIN_PART_SIZE`; enforcing that is the caller's
//! job (see the orchestrator), not the store's.

use bytes::Bytes;
use std::future::Future;
use thiserror::Error;

/// Identifier of an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(pub String);

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An acknowledged part, keyed for the completion manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based, ascending, contiguous
    pub part_number: u32,
    /// Storage-assigned acknowledgment tag
    pub etag: String,
}

/// Store-level failures, split by retryability: `Network` is transient and
/// worth retrying with backoff, `Contract` is a protocol violation that
/// retrying cannot fix.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network: {0}")]
    Network(String),

    #[error("contract: {0}")]
    Contract(String),
}

/// The remote multipart upload protocol. One implementation per backend;
/// the orchestrator is generic over this trait.
pub trait MultipartStore: Send + Sync + 'static {
    /// Open a multipart upload for `object_key`.
    fn initiate_upload(
        &self,
        object_key: &str,
    ) -> impl Future<Output = Result<UploadId, StoreError>> + Send;

    /// Upload one part. Parts may be retried verbatim; the store must treat
    /// a repeated (upload_id, part_number) as a replacement, not an error.
    fn upload_part(
        &self,
        upload: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Finalize the object from the ascending part list. Returns the
    /// object's storage identifier.
    fn complete_upload(
        &self,
        upload: &UploadId,
        parts: &[CompletedPart],
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Abort the upload and discard any stored parts (provider-side cleanup
    /// of orphaned data).
    fn abort_upload(&self, upload: &UploadId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

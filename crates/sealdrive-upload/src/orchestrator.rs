//! Upload orchestration: source → cipher → accumulation → multipart parts
//!
//! State machine: Idle → Initiated → Uploading → Completing → Done, with
//! Uploading → Aborting → Aborted on cancellation or unrecoverable failure.
//!
//! The source is consumed iteratively in `DEFAULT_CHUNK_SIZE` bites with one
//! chunk of lookahead (to mark the final chunk) and at most one multipart
//! segment buffered, so memory stays bounded regardless of file size.
//! Ciphertext is never re-derived: a retried part resends the buffered
//! bytes verbatim, keeping the nonce/counter sequence intact.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use sealdrive_crypto::{ContentKey, StreamEncryptor, DEFAULT_CHUNK_SIZE};

use crate::error::{UploadError, UploadResult};
use crate::retry::RetryPolicy;
use crate::store::{CompletedPart, MultipartStore, UploadId};
use crate::{MAX_PARTS, MIN_PART_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Initiated,
    Uploading,
    Completing,
    Done,
    Aborting,
    Aborted,
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Storage identifier of the finalized object
    pub object_id: String,
    /// Acknowledged parts in manifest (ascending) order
    pub parts: Vec<CompletedPart>,
    /// Total ciphertext bytes uploaded (header included)
    pub encrypted_len: u64,
    /// Stream chunks produced
    pub chunks: u64,
}

/// Drives one file transfer. Owns the accumulation buffer and the remote
/// upload id exclusively; neither is shared across transfers.
pub struct UploadOrchestrator<'a, S: MultipartStore> {
    store: &'a S,
    retry: RetryPolicy,
    cancel: CancellationToken,
    state: UploadState,
}

impl<'a, S: MultipartStore> UploadOrchestrator<'a, S> {
    pub fn new(store: &'a S, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            store,
            retry,
            cancel,
            state: UploadState::Idle,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Encrypt `source` under `key` and upload it as `object_key`.
    ///
    /// On any fatal error the remote upload is aborted, the buffer is
    /// released, and exactly one terminal error is returned.
    pub async fn upload(
        &mut self,
        key: &ContentKey,
        object_key: &str,
        mut source: impl AsyncRead + Unpin,
    ) -> UploadResult<UploadOutcome> {
        let upload_id = self
            .retry
            .run("initiate_upload", &self.cancel, || {
                self.store.initiate_upload(object_key)
            })
            .await?;
        self.state = UploadState::Initiated;
        tracing::debug!(object_key, upload_id = %upload_id, "multipart upload opened");

        match self.run_transfer(key, &mut source, &upload_id).await {
            Ok(outcome) => {
                self.state = UploadState::Done;
                tracing::info!(
                    object_key,
                    object_id = %outcome.object_id,
                    parts = outcome.parts.len(),
                    chunks = outcome.chunks,
                    encrypted_len = outcome.encrypted_len,
                    "upload complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.state = UploadState::Aborting;
                // best-effort provider-side cleanup; the original error wins
                if let Err(abort_err) = self.store.abort_upload(&upload_id).await {
                    tracing::warn!(upload_id = %upload_id, error = %abort_err, "abort failed");
                }
                self.state = UploadState::Aborted;
                tracing::warn!(object_key, error = %err, "upload aborted");
                Err(err)
            }
        }
    }

    async fn run_transfer(
        &mut self,
        key: &ContentKey,
        source: &mut (impl AsyncRead + Unpin),
        upload_id: &UploadId,
    ) -> UploadResult<UploadOutcome> {
        self.state = UploadState::Uploading;

        let (mut encryptor, header) = StreamEncryptor::new(key);
        let mut buffer: Vec<u8> = Vec::with_capacity(MIN_PART_SIZE + DEFAULT_CHUNK_SIZE);
        buffer.extend_from_slice(&header);

        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut encrypted_len = 0u64;

        // one chunk of lookahead so the last chunk can be sealed as final
        let mut pending = read_chunk(source).await?;
        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let next = read_chunk(source).await?;
            let is_final = next.is_empty();

            let ciphertext = encryptor.push_chunk(&pending, is_final)?;
            buffer.extend_from_slice(&ciphertext);
            pending = next;

            if is_final {
                break;
            }
            if buffer.len() >= MIN_PART_SIZE {
                let part = self.flush_part(upload_id, &mut buffer, &mut parts, false).await?;
                encrypted_len += part;
            }
        }

        // final part: any size is legal, and there is always at least one
        // (an empty source still carries the header and one empty chunk)
        let part = self.flush_part(upload_id, &mut buffer, &mut parts, true).await?;
        encrypted_len += part;

        self.state = UploadState::Completing;
        let object_id = self
            .retry
            .run("complete_upload", &self.cancel, || {
                self.store.complete_upload(upload_id, &parts)
            })
            .await?;

        Ok(UploadOutcome {
            object_id,
            parts,
            encrypted_len,
            chunks: encryptor.chunks(),
        })
    }

    async fn flush_part(
        &self,
        upload_id: &UploadId,
        buffer: &mut Vec<u8>,
        parts: &mut Vec<CompletedPart>,
        is_final: bool,
    ) -> UploadResult<u64> {
        let part_number = parts.len() as u32 + 1;
        if !is_final && buffer.len() < MIN_PART_SIZE {
            return Err(UploadError::PartSize {
                part_number,
                size: buffer.len(),
                min: MIN_PART_SIZE,
            });
        }
        if part_number > MAX_PARTS {
            return Err(UploadError::Storage {
                operation: "upload_part",
                message: format!("part count exceeds provider limit of {MAX_PARTS}"),
            });
        }

        let body = Bytes::from(std::mem::take(buffer));
        let size = body.len() as u64;

        let etag = self
            .retry
            .run("upload_part", &self.cancel, || {
                // the buffered ciphertext is resent verbatim on retry;
                // Bytes clones are reference-counted, not copies
                self.store.upload_part(upload_id, part_number, body.clone())
            })
            .await?;

        tracing::debug!(part_number, size, etag = %etag, "part acknowledged");
        parts.push(CompletedPart { part_number, etag });
        Ok(size)
    }
}

/// Read up to one plaintext chunk, looping until the chunk is full or the
/// source is exhausted. Returns an empty buffer only at EOF.
async fn read_chunk(source: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut filled = 0;
    while filled < DEFAULT_CHUNK_SIZE {
        let n = source.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use sealdrive_crypto::{generate_content_key, AUTH_SIZE, HEADER_SIZE};
    use std::io::Cursor;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        }
    }

    async fn run_upload(store: &MemoryStore, data: &[u8]) -> UploadResult<UploadOutcome> {
        let key = generate_content_key();
        let mut orch = UploadOrchestrator::new(store, quick_retry(), CancellationToken::new());
        orch.upload(&key, "obj/test", Cursor::new(data.to_vec())).await
    }

    fn expected_encrypted_len(plain: usize) -> u64 {
        let chunks = if plain == 0 {
            1
        } else {
            plain.div_ceil(DEFAULT_CHUNK_SIZE)
        };
        (HEADER_SIZE + chunks * AUTH_SIZE + plain) as u64
    }

    #[tokio::test]
    async fn test_tiny_source_single_part_single_chunk() {
        let store = MemoryStore::new();
        let outcome = run_upload(&store, &[7u8; 100]).await.unwrap();

        assert_eq!(outcome.parts.len(), 1);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.encrypted_len, (HEADER_SIZE + AUTH_SIZE + 100) as u64);
        assert_eq!(
            store.read_object(&outcome.object_id).unwrap().len() as u64,
            outcome.encrypted_len
        );
    }

    #[tokio::test]
    async fn test_empty_source_uploads_header_and_empty_final_chunk() {
        let store = MemoryStore::new();
        let outcome = run_upload(&store, &[]).await.unwrap();

        assert_eq!(outcome.parts.len(), 1);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.encrypted_len, (HEADER_SIZE + AUTH_SIZE) as u64);
    }

    #[tokio::test]
    async fn test_ten_mib_source_two_parts() {
        let store = MemoryStore::new();
        let data = vec![0xABu8; 10 * 1024 * 1024];
        let outcome = run_upload(&store, &data).await.unwrap();

        assert_eq!(outcome.parts.len(), 2);
        assert_eq!(outcome.chunks, 160);
        assert_eq!(outcome.encrypted_len, expected_encrypted_len(data.len()));

        // first part over the minimum, second carries the remainder
        let stored = store.read_object(&outcome.object_id).unwrap();
        assert_eq!(stored.len() as u64, outcome.encrypted_len);
    }

    #[tokio::test]
    async fn test_part_size_law() {
        let store = MemoryStore::new();
        // enough data for several parts, not chunk-aligned
        let data = vec![0x5Au8; 12 * 1024 * 1024 + 12345];
        let outcome = run_upload(&store, &data).await.unwrap();

        let stored = store.read_object(&outcome.object_id).unwrap();
        assert_eq!(stored.len() as u64, expected_encrypted_len(data.len()));

        // part numbers contiguous ascending from 1
        for (i, part) in outcome.parts.iter().enumerate() {
            assert_eq!(part.part_number, (i + 1) as u32);
        }
    }

    #[tokio::test]
    async fn test_transient_part_failures_are_retried() {
        let store = MemoryStore::new();
        store.fail_next_parts(2);
        let outcome = run_upload(&store, &[1u8; 1000]).await.unwrap();
        assert_eq!(outcome.parts.len(), 1);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_abort_upload() {
        let store = MemoryStore::new();
        store.fail_next_parts(100);

        let key = generate_content_key();
        let mut orch = UploadOrchestrator::new(&store, quick_retry(), CancellationToken::new());
        let result = orch.upload(&key, "obj/fail", Cursor::new(vec![1u8; 1000])).await;

        assert!(matches!(result, Err(UploadError::Network { .. })));
        assert_eq!(orch.state(), UploadState::Aborted);
        assert_eq!(store.open_uploads(), 0, "no orphaned upload may remain");
        assert_eq!(store.aborted_uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_transfer_aborts() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let key = generate_content_key();
        let mut orch = UploadOrchestrator::new(&store, quick_retry(), cancel);
        let result = orch.upload(&key, "obj/c", Cursor::new(vec![1u8; 1000])).await;

        assert!(matches!(result, Err(UploadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer_aborts_remote_upload() {
        use std::sync::Arc;
        let store = Arc::new(MemoryStore::new());
        store.set_part_delay(std::time::Duration::from_millis(50));

        let cancel = CancellationToken::new();
        let key = generate_content_key();
        let data = vec![0u8; 11 * 1024 * 1024];

        let task = {
            let store = store.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut orch = UploadOrchestrator::new(&*store, quick_retry(), cancel);
                orch.upload(&key, "obj/cancel", Cursor::new(data)).await
            })
        };

        // let the first part get in flight, then cancel
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(store.open_uploads(), 0, "cancelled upload must be aborted remotely");
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let store = MemoryStore::new();
        let key = generate_content_key();
        let mut orch = UploadOrchestrator::new(&store, quick_retry(), CancellationToken::new());
        assert_eq!(orch.state(), UploadState::Idle);

        orch.upload(&key, "obj/s", Cursor::new(vec![0u8; 10])).await.unwrap();
        assert_eq!(orch.state(), UploadState::Done);
    }
}

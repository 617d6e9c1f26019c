//! In-memory multipart store
//!
//! Backs the test suite and the bridge's local mode. Enforces the same
//! contract a real provider does (unknown ids, etag checks, contiguous part
//! lists) and offers fault-injection knobs for retry and cancellation tests.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::store::{CompletedPart, MultipartStore, StoreError, UploadId};

#[derive(Default)]
struct InProgress {
    object_key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
pub struct MemoryStore {
    uploads: Mutex<HashMap<String, InProgress>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    aborted: Mutex<Vec<String>>,
    /// Part sizes of each completed object, for assertions on part layout.
    part_log: Mutex<HashMap<String, Vec<usize>>>,
    /// Fail the next N `upload_part` calls with a transient error.
    fail_next_parts: AtomicU32,
    /// Artificial latency per part upload (for cancellation tests).
    part_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject `n` transient part-upload failures.
    pub fn fail_next_parts(&self, n: u32) {
        self.fail_next_parts.store(n, Ordering::SeqCst);
    }

    /// Delay every part upload by `d`.
    pub fn set_part_delay(&self, d: Duration) {
        *self.part_delay.lock().unwrap() = Some(d);
    }

    /// Fetch a completed object's bytes.
    pub fn read_object(&self, object_id: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(object_id).cloned()
    }

    /// Store a small object directly (single-part convenience used for
    /// manifests in tests).
    pub fn put_object(&self, object_id: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(object_id.to_string(), bytes);
    }

    /// Upload ids that were aborted.
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    /// Sizes of the parts a completed object was assembled from.
    pub fn part_sizes(&self, object_id: &str) -> Vec<usize> {
        self.part_log
            .lock()
            .unwrap()
            .get(object_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Uploads still open (neither completed nor aborted). A clean run
    /// leaves zero.
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn etag(body: &[u8]) -> String {
        blake3::hash(body).to_hex().to_string()
    }
}

impl MultipartStore for MemoryStore {
    fn initiate_upload(
        &self,
        object_key: &str,
    ) -> impl std::future::Future<Output = Result<UploadId, StoreError>> + Send {
        let id = Uuid::new_v4().to_string();
        let mut uploads = self.uploads.lock().unwrap();
        uploads.insert(
            id.clone(),
            InProgress {
                object_key: object_key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        drop(uploads);
        async move { Ok(UploadId(id)) }
    }

    fn upload_part(
        &self,
        upload: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send {
        let id = upload.0.clone();
        let delay = *self.part_delay.lock().unwrap();
        async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if self
                .fail_next_parts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Network("injected part failure".into()));
            }

            let etag = Self::etag(&body);
            let mut uploads = self.uploads.lock().unwrap();
            let entry = uploads
                .get_mut(&id)
                .ok_or_else(|| StoreError::Contract(format!("unknown upload id {id}")))?;
            // repeated part number replaces the previous body (retry semantics)
            entry.parts.insert(part_number, (etag.clone(), body));
            Ok(etag)
        }
    }

    fn complete_upload(
        &self,
        upload: &UploadId,
        parts: &[CompletedPart],
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send {
        let id = upload.0.clone();
        let manifest = parts.to_vec();
        async move {
            let mut uploads = self.uploads.lock().unwrap();
            let entry = uploads
                .remove(&id)
                .ok_or_else(|| StoreError::Contract(format!("unknown upload id {id}")))?;

            let mut assembled = Vec::new();
            let mut sizes = Vec::with_capacity(manifest.len());
            for (i, part) in manifest.iter().enumerate() {
                if part.part_number != (i + 1) as u32 {
                    return Err(StoreError::Contract(format!(
                        "part list not contiguous at position {i}: part {}",
                        part.part_number
                    )));
                }
                let (etag, body) = entry.parts.get(&part.part_number).ok_or_else(|| {
                    StoreError::Contract(format!("part {} never uploaded", part.part_number))
                })?;
                if etag != &part.etag {
                    return Err(StoreError::Contract(format!(
                        "etag mismatch for part {}",
                        part.part_number
                    )));
                }
                sizes.push(body.len());
                assembled.extend_from_slice(body);
            }

            let object_id = entry.object_key.clone();
            self.objects.lock().unwrap().insert(object_id.clone(), assembled);
            self.part_log.lock().unwrap().insert(object_id.clone(), sizes);
            Ok(object_id)
        }
    }

    fn abort_upload(
        &self,
        upload: &UploadId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send {
        let id = upload.0.clone();
        async move {
            let removed = self.uploads.lock().unwrap().remove(&id);
            if removed.is_some() {
                self.aborted.lock().unwrap().push(id);
            }
            // aborting an unknown/already-finished upload is a no-op, as on S3
            Ok(())
        }
    }
}

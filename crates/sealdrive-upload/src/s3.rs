//! OpenDAL-backed store for S3-compatible endpoints
//!
//! Uses path-style addressing (the opendal default), which MinIO and
//! SeaweedFS require. One opendal `Writer` per in-flight upload carries the
//! provider's real multipart session; parts fed to it must therefore be
//! written in ascending order, which the orchestrator guarantees.

use anyhow::{Context, Result};
use bytes::Bytes;
use opendal::Operator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{CompletedPart, MultipartStore, StoreError, UploadId};

/// Minimal credentials + location needed to build an operator.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for any S3-compatible endpoint.
pub fn build_operator(cfg: &S3Config) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator from core config + credentials.
///
/// If `enforce_tls` is set and the endpoint uses HTTP, this returns an
/// error; otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &sealdrive_core::config::StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP — ciphertext is safe, credentials are not. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    build_operator(&S3Config {
        endpoint: storage.endpoint.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key.to_string(),
    })
}

struct WriterEntry {
    object_key: String,
    writer: opendal::Writer,
    next_part: u32,
}

/// `MultipartStore` over an opendal operator.
pub struct S3Store {
    op: Operator,
    // the map lock guards membership only; each entry carries its own lock
    // so a slow part write on one upload never stalls the others
    uploads: Mutex<HashMap<String, Arc<Mutex<WriterEntry>>>>,
}

impl S3Store {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Read a whole stored object (manifests, ciphertext for download).
    pub async fn read_object(&self, object_key: &str) -> Result<Vec<u8>, StoreError> {
        self.op
            .read(object_key)
            .await
            .map(|buf| buf.to_vec())
            .map_err(map_opendal_err)
    }

    /// Write a small object in one shot (manifest persistence).
    pub async fn put_object(&self, object_key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.op
            .write(object_key, bytes)
            .await
            .map(|_| ())
            .map_err(map_opendal_err)
    }
}

fn map_opendal_err(e: opendal::Error) -> StoreError {
    if e.is_temporary() {
        StoreError::Network(e.to_string())
    } else {
        StoreError::Contract(e.to_string())
    }
}

impl MultipartStore for S3Store {
    fn initiate_upload(
        &self,
        object_key: &str,
    ) -> impl std::future::Future<Output = Result<UploadId, StoreError>> + Send {
        let key = object_key.to_string();
        async move {
            let writer = self.op.writer(&key).await.map_err(map_opendal_err)?;
            let id = Uuid::new_v4().to_string();
            self.uploads.lock().await.insert(
                id.clone(),
                Arc::new(Mutex::new(WriterEntry {
                    object_key: key,
                    writer,
                    next_part: 1,
                })),
            );
            Ok(UploadId(id))
        }
    }

    fn upload_part(
        &self,
        upload: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send {
        let id = upload.0.clone();
        async move {
            let etag = blake3::hash(&body).to_hex().to_string();
            let slot = self
                .uploads
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::Contract(format!("unknown upload id {id}")))?;
            let mut entry = slot.lock().await;
            // the opendal writer streams parts in order; out-of-order feeding
            // is a protocol violation here, not a retryable condition
            if part_number != entry.next_part {
                return Err(StoreError::Contract(format!(
                    "part {part_number} fed out of order (expected {})",
                    entry.next_part
                )));
            }
            entry.writer.write(body).await.map_err(map_opendal_err)?;
            entry.next_part += 1;
            Ok(etag)
        }
    }

    fn complete_upload(
        &self,
        upload: &UploadId,
        parts: &[CompletedPart],
    ) -> impl std::future::Future<Output = Result<String, StoreError>> + Send {
        let id = upload.0.clone();
        let count = parts.len() as u32;
        async move {
            let slot = self
                .uploads
                .lock()
                .await
                .remove(&id)
                .ok_or_else(|| StoreError::Contract(format!("unknown upload id {id}")))?;
            let mut entry = slot.lock().await;
            if entry.next_part != count + 1 {
                let written = entry.next_part - 1;
                drop(entry);
                self.uploads.lock().await.insert(id.clone(), slot);
                return Err(StoreError::Contract(format!(
                    "completion lists {count} parts but {written} were written"
                )));
            }
            entry.writer.close().await.map_err(map_opendal_err)?;
            Ok(entry.object_key.clone())
        }
    }

    fn abort_upload(
        &self,
        upload: &UploadId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send {
        let id = upload.0.clone();
        async move {
            let slot = self.uploads.lock().await.remove(&id);
            if let Some(slot) = slot {
                let mut entry = slot.lock().await;
                entry.writer.abort().await.map_err(map_opendal_err)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_operator_valid() {
        let cfg = S3Config {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "test-bucket".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        };
        assert!(build_operator(&cfg).is_ok());
    }

    #[test]
    fn test_enforce_tls_rejects_http() {
        let storage = sealdrive_core::config::StorageConfig {
            endpoint: "http://insecure:9000".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_from_core_config(&storage, "key", "secret");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_https_with_enforce_tls_ok() {
        let storage = sealdrive_core::config::StorageConfig {
            endpoint: "https://s3.example.com".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, "key", "secret").is_ok());
    }

    fn memory_store() -> S3Store {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        S3Store::new(op)
    }

    /// A part write in flight on one upload must not block operations on
    /// another upload: the map lock guards membership only, each entry has
    /// its own lock.
    #[tokio::test]
    async fn test_busy_upload_does_not_block_others() {
        let store = memory_store();
        let busy = store.initiate_upload("a.bin").await.unwrap();

        // hold the busy upload's entry lock, standing in for a part write
        // that is still on the wire
        let slot = store.uploads.lock().await.get(&busy.0).cloned().unwrap();
        let _in_flight = slot.lock().await;

        let other = store.initiate_upload("b.bin").await.unwrap();
        let etag = store
            .upload_part(&other, 1, Bytes::from(vec![7u8; 64]))
            .await
            .unwrap();
        let parts = [CompletedPart {
            part_number: 1,
            etag,
        }];
        store.complete_upload(&other, &parts).await.unwrap();

        assert_eq!(store.read_object("b.bin").await.unwrap(), vec![7u8; 64]);
    }

    #[tokio::test]
    async fn test_out_of_order_part_is_contract_error() {
        let store = memory_store();
        let upload = store.initiate_upload("c.bin").await.unwrap();
        let err = store
            .upload_part(&upload, 2, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Contract(_)));
    }
}

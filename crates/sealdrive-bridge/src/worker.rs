//! The service behind the bridge: session state plus transfer execution
//!
//! One `ServiceCore` per bridge. Holds the only unwrapped key material in
//! the process (inside `VaultSession`); callers only ever see wrapped
//! bundles and ciphertext. Concurrent uploads are admitted up to a
//! configured limit, each with its own cancellation token keyed by the
//! call id so a later `Cancel` request can reach it.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use bytes::Bytes;
use secrecy::SecretString;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use sealdrive_crypto::{
    generate_content_key, ContentKey, ObjectManifest, SecretKeyBundle, StreamEncryptor,
    UserCryptoProperties, VaultSession, DEFAULT_CHUNK_SIZE,
};
use sealdrive_upload::{
    decrypt_stream, MultipartStore, RetryPolicy, UploadOrchestrator,
};

use crate::protocol::{BridgeFault, BridgeOp, BridgeReply};

pub struct ServiceCore<S: MultipartStore> {
    store: S,
    retry: RetryPolicy,
    transfers: Semaphore,
    session: Mutex<Option<VaultSession>>,
    active: Mutex<HashMap<u64, CancellationToken>>,
}

impl<S: MultipartStore> ServiceCore<S> {
    pub fn new(store: S, retry: RetryPolicy, max_concurrent_transfers: usize) -> Self {
        Self {
            store,
            retry,
            transfers: Semaphore::new(max_concurrent_transfers.max(1)),
            session: Mutex::new(None),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(&self, call_id: u64, op: BridgeOp) -> Result<BridgeReply, BridgeFault> {
        match op {
            BridgeOp::Unlock { properties, passphrase } => self.unlock(&properties, &passphrase),
            BridgeOp::Lock => {
                // dropping the session zeroizes the master key
                *self.lock_session() = None;
                tracing::debug!("vault locked");
                Ok(BridgeReply::Ack)
            }
            BridgeOp::Encrypt { plaintext } => self.encrypt(&plaintext),
            BridgeOp::Decrypt { wrapped_key, ciphertext } => {
                self.decrypt(&wrapped_key, ciphertext).await
            }
            BridgeOp::Upload { object_key, name, plaintext } => {
                self.upload(call_id, &object_key, &name, plaintext).await
            }
            BridgeOp::Cancel { target } => self.cancel(target),
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<VaultSession>> {
        // the session mutex guards only quick wrap/unwrap calls and is
        // never held across await points
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn unlock(&self, properties: &[u8], passphrase: &SecretString) -> Result<BridgeReply, BridgeFault> {
        let props = UserCryptoProperties::from_bytes(properties)?;
        let session = VaultSession::unlock(passphrase, &props)?;
        *self.lock_session() = Some(session);
        tracing::info!("vault unlocked");
        Ok(BridgeReply::Ack)
    }

    fn wrap_content_key(&self, key: &ContentKey) -> Result<SecretKeyBundle, BridgeFault> {
        let guard = self.lock_session();
        let session = guard.as_ref().ok_or(BridgeFault::Locked)?;
        Ok(session.wrap_content_key(key)?)
    }

    fn unwrap_content_key(&self, bundle: &SecretKeyBundle) -> Result<ContentKey, BridgeFault> {
        let guard = self.lock_session();
        let session = guard.as_ref().ok_or(BridgeFault::Locked)?;
        Ok(session.unwrap_content_key(bundle)?)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<BridgeReply, BridgeFault> {
        let key = generate_content_key();
        let wrapped_key = self.wrap_content_key(&key)?;

        let (mut encryptor, header) = StreamEncryptor::new(&key);
        let mut out = Vec::with_capacity(plaintext.len() + plaintext.len() / DEFAULT_CHUNK_SIZE * 32 + 64);
        out.extend_from_slice(&header);

        let mut chunks = plaintext.chunks(DEFAULT_CHUNK_SIZE).peekable();
        if plaintext.is_empty() {
            out.extend_from_slice(&encryptor.push_chunk(&[], true)?);
        } else {
            while let Some(chunk) = chunks.next() {
                let is_final = chunks.peek().is_none();
                out.extend_from_slice(&encryptor.push_chunk(chunk, is_final)?);
            }
        }

        Ok(BridgeReply::Encrypted {
            wrapped_key,
            ciphertext: Bytes::from(out),
        })
    }

    async fn decrypt(
        &self,
        wrapped_key: &SecretKeyBundle,
        ciphertext: Bytes,
    ) -> Result<BridgeReply, BridgeFault> {
        let key = self.unwrap_content_key(wrapped_key)?;
        let mut plaintext = Vec::new();
        decrypt_stream(&key, Cursor::new(ciphertext), &mut plaintext).await?;
        Ok(BridgeReply::Plaintext {
            plaintext: Bytes::from(plaintext),
        })
    }

    async fn upload(
        &self,
        call_id: u64,
        object_key: &str,
        name: &str,
        plaintext: Bytes,
    ) -> Result<BridgeReply, BridgeFault> {
        let _permit = self
            .transfers
            .acquire()
            .await
            .map_err(|_| BridgeFault::Closed)?;

        let key = generate_content_key();
        let cancel = CancellationToken::new();
        self.lock_active().insert(call_id, cancel.clone());

        let result = {
            let mut orch = UploadOrchestrator::new(&self.store, self.retry.clone(), cancel);
            orch.upload(&key, object_key, Cursor::new(plaintext)).await
        };
        self.lock_active().remove(&call_id);
        let outcome = result?;

        let manifest = {
            let guard = self.lock_session();
            let session = guard.as_ref().ok_or(BridgeFault::Locked)?;
            ObjectManifest::new(
                session,
                outcome.object_id.clone(),
                outcome.encrypted_len,
                outcome.chunks,
                &key,
                name,
            )?
        };

        Ok(BridgeReply::Uploaded {
            object_id: outcome.object_id,
            encrypted_len: outcome.encrypted_len,
            manifest: manifest.to_bytes()?,
        })
    }

    fn cancel(&self, target: u64) -> Result<BridgeReply, BridgeFault> {
        match self.lock_active().get(&target) {
            Some(token) => {
                token.cancel();
                tracing::debug!(target, "cancellation requested");
                Ok(BridgeReply::Ack)
            }
            None => Err(BridgeFault::UnknownCall(target)),
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CancellationToken>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdrive_crypto::{create_account, KdfParams};
    use sealdrive_upload::MemoryStore;
    use std::sync::Arc;

    fn fast_kdf() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
            ..KdfParams::default()
        }
    }

    fn core() -> Arc<ServiceCore<MemoryStore>> {
        Arc::new(ServiceCore::new(MemoryStore::new(), RetryPolicy::default(), 4))
    }

    async fn unlocked_core() -> Arc<ServiceCore<MemoryStore>> {
        let core = core();
        let (props, _) = create_account(&SecretString::from("pw"), &fast_kdf()).unwrap();
        core.handle(
            1,
            BridgeOp::Unlock {
                properties: props.to_bytes().unwrap(),
                passphrase: SecretString::from("pw"),
            },
        )
        .await
        .unwrap();
        core
    }

    #[tokio::test]
    async fn test_locked_core_rejects_encrypt() {
        let core = core();
        let result = core
            .handle(1, BridgeOp::Encrypt { plaintext: Bytes::from_static(b"x") })
            .await;
        assert!(matches!(result, Err(BridgeFault::Locked)));
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let core = unlocked_core().await;
        let data = Bytes::from(vec![7u8; 100_000]);

        let (wrapped_key, ciphertext) = match core
            .handle(2, BridgeOp::Encrypt { plaintext: data.clone() })
            .await
            .unwrap()
        {
            BridgeReply::Encrypted { wrapped_key, ciphertext } => (wrapped_key, ciphertext),
            other => panic!("unexpected reply: {other:?}"),
        };

        let plaintext = match core
            .handle(3, BridgeOp::Decrypt { wrapped_key, ciphertext })
            .await
            .unwrap()
        {
            BridgeReply::Plaintext { plaintext } => plaintext,
            other => panic!("unexpected reply: {other:?}"),
        };
        assert_eq!(plaintext, data);
    }

    #[tokio::test]
    async fn test_lock_drops_session() {
        let core = unlocked_core().await;
        core.handle(2, BridgeOp::Lock).await.unwrap();
        let result = core
            .handle(3, BridgeOp::Encrypt { plaintext: Bytes::from_static(b"x") })
            .await;
        assert!(matches!(result, Err(BridgeFault::Locked)));
    }

    #[tokio::test]
    async fn test_upload_produces_decryptable_manifest() {
        let core = unlocked_core().await;
        let data = Bytes::from(vec![9u8; 200_000]);

        let manifest_bytes = match core
            .handle(
                2,
                BridgeOp::Upload {
                    object_key: "files/a.bin".into(),
                    name: "a.bin".into(),
                    plaintext: data.clone(),
                },
            )
            .await
            .unwrap()
        {
            BridgeReply::Uploaded { manifest, .. } => manifest,
            other => panic!("unexpected reply: {other:?}"),
        };

        let manifest = ObjectManifest::from_bytes(&manifest_bytes).unwrap();
        let wrapped_key = manifest.wrapped_content_key.clone();
        let ciphertext = Bytes::from(core.store.read_object(&manifest.object_id).unwrap());

        let plaintext = match core
            .handle(3, BridgeOp::Decrypt { wrapped_key, ciphertext })
            .await
            .unwrap()
        {
            BridgeReply::Plaintext { plaintext } => plaintext,
            other => panic!("unexpected reply: {other:?}"),
        };
        assert_eq!(plaintext, data);
    }

    #[tokio::test]
    async fn test_transfer_limit_bounds_concurrency() {
        let store = MemoryStore::new();
        store.set_part_delay(std::time::Duration::from_millis(30));
        let core = Arc::new(ServiceCore::new(store, RetryPolicy::default(), 1));

        let (props, _) = create_account(&SecretString::from("pw"), &fast_kdf()).unwrap();
        core.handle(
            1,
            BridgeOp::Unlock {
                properties: props.to_bytes().unwrap(),
                passphrase: SecretString::from("pw"),
            },
        )
        .await
        .unwrap();

        let data = Bytes::from(vec![1u8; 100_000]);
        let mut tasks = Vec::new();
        for i in 0..2u64 {
            let core = core.clone();
            let data = data.clone();
            tasks.push(tokio::spawn(async move {
                core.handle(
                    10 + i,
                    BridgeOp::Upload {
                        object_key: format!("files/{i}.bin"),
                        name: format!("{i}.bin"),
                        plaintext: data,
                    },
                )
                .await
            }));
        }

        // sample how many multipart sessions the store sees open at once
        let watcher = {
            let core = core.clone();
            tokio::spawn(async move {
                let mut max_open = 0;
                for _ in 0..40 {
                    max_open = max_open.max(core.store.open_uploads());
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
                max_open
            })
        };

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(watcher.await.unwrap() <= 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_call() {
        let core = core();
        let result = core.handle(1, BridgeOp::Cancel { target: 99 }).await;
        assert!(matches!(result, Err(BridgeFault::UnknownCall(99))));
    }
}

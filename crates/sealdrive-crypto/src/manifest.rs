//! Object manifest: what the client needs to decrypt a stored object
//!
//! Stored next to the ciphertext. Contains no plaintext beyond sizes: the
//! content key is wrapped by the master key, the name by the metadata key.

use serde::{Deserialize, Serialize};

use crate::bundle::{MetadataBundle, SecretKeyBundle};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::ContentKey;
use crate::vault::VaultSession;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectManifest {
    /// Manifest format version
    pub version: u32,
    /// Storage identifier returned by the multipart completion
    pub object_id: String,
    /// Total ciphertext length (header + all chunks)
    pub encrypted_size: u64,
    /// Number of stream chunks
    pub chunks: u64,
    /// The per-file content key, wrapped by the master key
    pub wrapped_content_key: SecretKeyBundle,
    /// The object's name, encrypted under the metadata key
    pub encrypted_name: MetadataBundle,
}

impl ObjectManifest {
    pub fn new(
        session: &VaultSession,
        object_id: String,
        encrypted_size: u64,
        chunks: u64,
        content_key: &ContentKey,
        name: &str,
    ) -> CryptoResult<Self> {
        Ok(Self {
            version: 1,
            object_id,
            encrypted_size,
            chunks,
            wrapped_content_key: session.wrap_content_key(content_key)?,
            encrypted_name: session.wrap_metadata(name.as_bytes())?,
        })
    }

    /// Recover the content key for download/decryption.
    pub fn unwrap_content_key(&self, session: &VaultSession) -> CryptoResult<ContentKey> {
        session.unwrap_content_key(&self.wrapped_content_key)
    }

    /// Recover the object's plaintext name.
    pub fn unwrap_name(&self, session: &VaultSession) -> CryptoResult<String> {
        let bytes = session.unwrap_metadata(&self.encrypted_name)?;
        String::from_utf8(bytes).map_err(|e| CryptoError::format("object name", 0, e.as_bytes().len()))
    }

    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::encoding("object manifest", e))
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(data).map_err(|e| CryptoError::encoding("object manifest", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::test_params;
    use crate::keys::generate_content_key;
    use crate::vault::create_account;
    use secrecy::SecretString;

    #[test]
    fn test_manifest_roundtrip() {
        let (props, _) = create_account(&SecretString::from("pw"), &test_params()).unwrap();
        let session = VaultSession::unlock(&SecretString::from("pw"), &props).unwrap();
        let key = generate_content_key();

        let manifest = ObjectManifest::new(
            &session,
            "obj-42".into(),
            10_488_464,
            160,
            &key,
            "big-archive.tar",
        )
        .unwrap();

        let bytes = manifest.to_bytes().unwrap();
        let restored = ObjectManifest::from_bytes(&bytes).unwrap();

        assert_eq!(restored.version, 1);
        assert_eq!(restored.object_id, "obj-42");
        assert_eq!(restored.chunks, 160);
        assert_eq!(
            restored.unwrap_content_key(&session).unwrap().as_bytes(),
            key.as_bytes()
        );
        assert_eq!(restored.unwrap_name(&session).unwrap(), "big-archive.tar");
    }

    #[test]
    fn test_manifest_wrong_session_fails() {
        let (props_a, _) = create_account(&SecretString::from("a"), &test_params()).unwrap();
        let (props_b, _) = create_account(&SecretString::from("b"), &test_params()).unwrap();
        let session_a = VaultSession::unlock(&SecretString::from("a"), &props_a).unwrap();
        let session_b = VaultSession::unlock(&SecretString::from("b"), &props_b).unwrap();

        let manifest = ObjectManifest::new(
            &session_a,
            "obj".into(),
            100,
            1,
            &generate_content_key(),
            "f",
        )
        .unwrap();

        assert!(manifest.unwrap_content_key(&session_b).is_err());
        assert!(manifest.unwrap_name(&session_b).is_err());
    }

    #[test]
    fn test_malformed_manifest_reports_parse_detail() {
        let err = ObjectManifest::from_bytes(b"{not json").unwrap_err();
        match err {
            CryptoError::Encoding { what, detail } => {
                assert_eq!(what, "object manifest");
                assert!(!detail.is_empty());
            }
            other => panic!("expected Encoding, got {other:?}"),
        }
    }
}

//! Content keys and HKDF subkey derivation

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// A per-file 256-bit encryption key. Zeroized on drop.
///
/// Content keys are generated fresh for every upload and only ever leave the
/// vault in wrapped form (see `VaultSession::wrap_content_key`).
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random per-file content key.
pub fn generate_content_key() -> ContentKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ContentKey::from_bytes(bytes)
}

/// Derive the metadata (filename) encryption key from the master key.
pub fn derive_metadata_key(master: &MasterKey) -> CryptoResult<[u8; KEY_SIZE]> {
    hkdf_derive(master.as_bytes(), b"sealdrive-metadata")
}

/// HKDF-SHA256 key derivation with a domain-separation info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> CryptoResult<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

//! Key derivation: Argon2id passphrase → wrapping key
//!
//! The derived key never encrypts file data directly; it only wraps the
//! random master key, so a passphrase change does not force re-encryption.

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit symmetric root key. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Current KDF parameter version. Bump when the cost profile changes; old
/// properties keep decrypting because the version travels with the salt.
pub const KDF_VERSION: u32 = 1;

/// Argon2id cost parameters, persisted inside `UserCryptoProperties` so
/// verification always re-runs with the exact parameters used at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    /// Parameter set version (only `KDF_VERSION` is currently supported)
    pub version: u32,
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            version: KDF_VERSION,
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit wrapping key from a passphrase and salt using Argon2id.
///
/// The salt is 16 bytes, randomly generated at account creation and stored
/// in clear alongside the wrapped bundles. Deterministic: same passphrase,
/// salt, and params always yield the same key.
///
/// This is intentionally slow; callers must keep it off latency-sensitive
/// paths (the worker bridge runs it on its own runtime).
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    if params.version != KDF_VERSION {
        return Err(CryptoError::KeyDerivation(format!(
            "unsupported KDF parameter version {}",
            params.version
        )));
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2id KDF failed: {e}")))?;

    Ok(MasterKey::from_bytes(key))
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        version: KDF_VERSION,
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_master_key(&passphrase, &salt, &test_params()).unwrap();
        let key2 = derive_master_key(&passphrase, &salt, &test_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; SALT_SIZE];

        let key1 =
            derive_master_key(&SecretString::from("passphrase-a"), &salt, &test_params()).unwrap();
        let key2 =
            derive_master_key(&SecretString::from("passphrase-b"), &salt, &test_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");

        let key1 = derive_master_key(&passphrase, &[1u8; SALT_SIZE], &test_params()).unwrap();
        let key2 = derive_master_key(&passphrase, &[2u8; SALT_SIZE], &test_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_bad_salt_length() {
        let result = derive_master_key(&SecretString::from("p"), &[0u8; 8], &test_params());
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_kdf_unsupported_version() {
        let params = KdfParams {
            version: 99,
            ..test_params()
        };
        let result = derive_master_key(&SecretString::from("p"), &[0u8; SALT_SIZE], &params);
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }
}

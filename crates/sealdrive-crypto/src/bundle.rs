//! Wrapped key/metadata bundles and their persistence encoding
//!
//! A bundle is `{ nonce, ciphertext }` with both halves base64-encoded for
//! storage and transport. Bundles are immutable: rotation replaces them,
//! nothing mutates one in place. Every wrap draws a fresh random nonce, so
//! nonces are never reused under the same wrapping key.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A symmetric key encrypted under some wrapping key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretKeyBundle {
    /// base64, 24 bytes decoded
    pub nonce: String,
    /// base64, key + tag
    pub encrypted_key: String,
}

/// An asymmetric keypair whose private half is wrapped; the public half is
/// stored in clear. Invariant: `public_key` always corresponds to the
/// plaintext recovered by unwrapping `encrypted_private_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPairBundle {
    pub nonce: String,
    /// base64, 32 bytes decoded
    pub public_key: String,
    pub encrypted_private_key: String,
}

/// Arbitrary encrypted metadata (e.g. a file name) attached to a stored
/// object, wrapped the same way as keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataBundle {
    pub nonce: String,
    pub encrypted_metadata: String,
}

/// Authenticated wrap of `plaintext` under `wrapping_key` with a fresh nonce.
pub(crate) fn seal(wrapping_key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CryptoResult<(String, String)> {
    let cipher = XChaCha20Poly1305::new(wrapping_key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Authentication)?;

    Ok((b64_encode(&nonce_bytes), b64_encode(&ciphertext)))
}

/// Authenticated unwrap. Fails with `Authentication` on tag mismatch and
/// `Format` on malformed encoding; a wrong wrapping key and a corrupted
/// bundle are indistinguishable.
pub(crate) fn open(
    wrapping_key: &[u8; KEY_SIZE],
    nonce_b64: &str,
    ciphertext_b64: &str,
) -> CryptoResult<Vec<u8>> {
    let nonce_bytes = b64_decode("bundle nonce", nonce_b64)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::format("bundle nonce", NONCE_SIZE, nonce_bytes.len()));
    }
    let ciphertext = b64_decode("bundle ciphertext", ciphertext_b64)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::format("bundle ciphertext", TAG_SIZE, ciphertext.len()));
    }

    let cipher = XChaCha20Poly1305::new(wrapping_key.into());
    cipher
        .decrypt(XNonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| CryptoError::Authentication)
}

impl SecretKeyBundle {
    /// Wrap a 32-byte key under `wrapping_key`.
    pub fn wrap(wrapping_key: &[u8; KEY_SIZE], key: &[u8; KEY_SIZE]) -> CryptoResult<Self> {
        let (nonce, encrypted_key) = seal(wrapping_key, key)?;
        Ok(Self { nonce, encrypted_key })
    }

    /// Unwrap back to the 32-byte key.
    pub fn unwrap_key(&self, wrapping_key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; KEY_SIZE]> {
        let mut plaintext = open(wrapping_key, &self.nonce, &self.encrypted_key)?;
        if plaintext.len() != KEY_SIZE {
            plaintext.zeroize();
            return Err(CryptoError::format("wrapped key", KEY_SIZE, plaintext.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(key)
    }
}

impl MetadataBundle {
    pub fn wrap(wrapping_key: &[u8; KEY_SIZE], metadata: &[u8]) -> CryptoResult<Self> {
        let (nonce, encrypted_metadata) = seal(wrapping_key, metadata)?;
        Ok(Self { nonce, encrypted_metadata })
    }

    pub fn unwrap_metadata(&self, wrapping_key: &[u8; KEY_SIZE]) -> CryptoResult<Vec<u8>> {
        open(wrapping_key, &self.nonce, &self.encrypted_metadata)
    }
}

impl KeyPairBundle {
    /// Wrap a keypair: private half encrypted, public half in clear.
    pub fn wrap(
        wrapping_key: &[u8; KEY_SIZE],
        public_key: &[u8; KEY_SIZE],
        private_key: &[u8; KEY_SIZE],
    ) -> CryptoResult<Self> {
        let (nonce, encrypted_private_key) = seal(wrapping_key, private_key)?;
        Ok(Self {
            nonce,
            public_key: b64_encode(public_key),
            encrypted_private_key,
        })
    }

    pub fn public_key_bytes(&self) -> CryptoResult<[u8; KEY_SIZE]> {
        let bytes = b64_decode("public key", &self.public_key)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::format("public key", KEY_SIZE, bytes.len()))
    }

    pub fn unwrap_private_key(&self, wrapping_key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; KEY_SIZE]> {
        let mut plaintext = open(wrapping_key, &self.nonce, &self.encrypted_private_key)?;
        if plaintext.len() != KEY_SIZE {
            plaintext.zeroize();
            return Err(CryptoError::format("wrapped private key", KEY_SIZE, plaintext.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(key)
    }
}

pub(crate) fn b64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub(crate) fn b64_decode(what: &'static str, s: &str) -> CryptoResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|_| CryptoError::format(what, 0, s.len()))
}

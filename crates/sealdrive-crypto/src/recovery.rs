//! BIP-39 recovery key
//!
//! Account creation mints a 256-bit recovery key, surfaced to the user as a
//! 24-word mnemonic to write down. It can unwrap the same master key as the
//! passphrase path, so a lost passphrase is survivable. The phrase is never
//! stored digitally.

use bip39::Mnemonic;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// A 256-bit recovery root key. Zeroized on drop.
pub struct RecoveryKey {
    bytes: [u8; KEY_SIZE],
}

impl RecoveryKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for RecoveryKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for RecoveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh recovery key and its 24-word mnemonic form.
///
/// The phrase should be displayed once and never persisted.
pub fn generate_recovery_key() -> CryptoResult<(String, RecoveryKey)> {
    let mut entropy = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| CryptoError::KeyDerivation(format!("mnemonic generation failed: {e}")))?;
    let words = mnemonic.to_string();
    let key = RecoveryKey::from_bytes(entropy);

    Ok((words, key))
}

/// Reconstruct the recovery key from its 24-word mnemonic.
pub fn recovery_key_from_phrase(words: &str) -> CryptoResult<RecoveryKey> {
    let mnemonic: Mnemonic = words
        .parse()
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid recovery phrase: {e}")))?;

    let entropy = mnemonic.to_entropy();
    if entropy.len() != KEY_SIZE {
        return Err(CryptoError::KeyDerivation(format!(
            "recovery phrase must encode {KEY_SIZE} bytes (24 words), got {}",
            entropy.len()
        )));
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&entropy);
    Ok(RecoveryKey::from_bytes(bytes))
}

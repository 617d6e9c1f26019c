//! sealdrive-crypto: client-side zero-knowledge encryption core
//!
//! Everything here operates on bytes the server never sees in clear.
//!
//! Key hierarchy:
//! ```text
//! Passphrase ──Argon2id(salt, versioned params)──▶ Wrapping Key
//! Recovery phrase (BIP-39, 24 words) ────────────▶ Recovery Key
//!
//! Master Key (256-bit random)
//!   ├── wrapped under Wrapping Key   → master_key_bundle
//!   ├── wrapped under Recovery Key   → recovery_master_key_bundle
//!   ├── Content Key (per-file, 256-bit random, wrapped by master key)
//!   │   └── chunk stream AEAD: XChaCha20-Poly1305
//!   ├── Metadata Key (HKDF-SHA256, domain="sealdrive-metadata")
//!   ├── X25519 keypair (private half wrapped by master key)
//!   └── Ed25519 keypair (private half wrapped by master key)
//! ```
//!
//! Encrypted stream wire format:
//! ```text
//! [24-byte header = stream base nonce][chunk]...[final chunk]
//! chunk = XChaCha20-Poly1305(plaintext ‖ finality marker), AAD = chunk index
//! full chunk  = 65536 plaintext + 17 overhead = 65553 ciphertext bytes
//! final chunk = shorter plaintext, same 17-byte overhead
//! ```

pub mod bundle;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod manifest;
pub mod recovery;
pub mod stream;
pub mod vault;

pub use bundle::{KeyPairBundle, MetadataBundle, SecretKeyBundle};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_master_key, KdfParams, MasterKey};
pub use keys::{generate_content_key, ContentKey};
pub use manifest::ObjectManifest;
pub use recovery::{generate_recovery_key, recovery_key_from_phrase, RecoveryKey};
pub use stream::{StreamDecryptor, StreamEncryptor};
pub use vault::{create_account, unwrap_master_key, unwrap_with_recovery_key, UserCryptoProperties, VaultSession};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the passphrase KDF salt
pub const SALT_SIZE: usize = 16;

/// Size of the encrypted stream header (the stream's base nonce)
pub const HEADER_SIZE: usize = 24;

/// Per-chunk ciphertext overhead: Poly1305 tag + finality marker byte
pub const AUTH_SIZE: usize = TAG_SIZE + 1;

/// Maximum plaintext bytes per stream chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Ciphertext size of a full chunk
pub const ENCRYPTED_CHUNK_SIZE: usize = DEFAULT_CHUNK_SIZE + AUTH_SIZE;

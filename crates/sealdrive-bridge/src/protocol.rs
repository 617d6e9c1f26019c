//! Call/reply protocol between the caller and the worker service
//!
//! Every request carries a `call_id` and is answered by exactly one reply
//! with the same id. Replies may arrive out of request order when calls
//! run concurrently. Payloads ride in `Bytes`, so handing a buffer across
//! the boundary bumps a refcount instead of copying it.

use bytes::Bytes;
use secrecy::SecretString;
use thiserror::Error;

use sealdrive_crypto::{CryptoError, SecretKeyBundle};
use sealdrive_upload::UploadError;

#[derive(Debug)]
pub struct BridgeRequest {
    pub call_id: u64,
    pub op: BridgeOp,
}

#[derive(Debug)]
pub enum BridgeOp {
    /// Derive the wrapping key and open a vault session. Slow (Argon2id),
    /// which is the whole reason the service runs off-thread.
    Unlock {
        properties: Vec<u8>,
        passphrase: SecretString,
    },
    /// Drop the session; key material is zeroized.
    Lock,
    /// Encrypt a buffer under a fresh content key, returning the wrapped
    /// key alongside the ciphertext stream.
    Encrypt { plaintext: Bytes },
    /// Decrypt a full ciphertext stream with the given wrapped key.
    Decrypt {
        wrapped_key: SecretKeyBundle,
        ciphertext: Bytes,
    },
    /// Encrypt and multipart-upload a buffer, returning the serialized
    /// object manifest.
    Upload {
        object_key: String,
        name: String,
        plaintext: Bytes,
    },
    /// Cancel an in-flight `Upload` by its call id.
    Cancel { target: u64 },
}

#[derive(Debug)]
pub struct BridgeResponse {
    pub call_id: u64,
    pub result: Result<BridgeReply, BridgeFault>,
}

#[derive(Debug)]
pub enum BridgeReply {
    Ack,
    Encrypted {
        wrapped_key: SecretKeyBundle,
        ciphertext: Bytes,
    },
    Plaintext { plaintext: Bytes },
    Uploaded {
        object_id: String,
        encrypted_len: u64,
        manifest: Vec<u8>,
    },
}

/// Failure side of a reply. Flattened to kind + message so it crosses the
/// boundary without dragging the source error types along.
#[derive(Debug, Clone, Error)]
pub enum BridgeFault {
    #[error("vault is locked")]
    Locked,

    #[error("bridge is closed")]
    Closed,

    #[error("no in-flight call with id {0}")]
    UnknownCall(u64),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("transfer failure: {0}")]
    Transfer(String),
}

impl From<CryptoError> for BridgeFault {
    fn from(err: CryptoError) -> Self {
        BridgeFault::Crypto(err.to_string())
    }
}

impl From<UploadError> for BridgeFault {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Cancelled => BridgeFault::Cancelled,
            UploadError::Crypto(e) => BridgeFault::Crypto(e.to_string()),
            other => BridgeFault::Transfer(other.to_string()),
        }
    }
}

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Crypto failure kinds. The variants are deliberately non-overlapping:
/// callers match on the kind to decide whether an operation is retryable
/// (none of these are) and what to tell the user.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Bad salt length or unsupported KDF parameter version.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD tag mismatch. Wrong key/passphrase and corrupted ciphertext are
    /// intentionally indistinguishable here; the message never says which.
    #[error("authentication failed")]
    Authentication,

    /// Malformed header, bundle, or chunk shape.
    #[error("malformed {what}: expected {expected} bytes, got {actual}")]
    Format {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A chunk arrived outside the expected stream sequence, or the stream
    /// ended without its final chunk. The whole stream must be restarted.
    #[error("stream order violated: {0}")]
    StreamOrder(String),

    /// A persisted JSON blob (crypto properties, object manifest) failed to
    /// encode or parse.
    #[error("invalid {what}: {detail}")]
    Encoding { what: &'static str, detail: String },
}

impl CryptoError {
    pub(crate) fn format(what: &'static str, expected: usize, actual: usize) -> Self {
        CryptoError::Format {
            what,
            expected,
            actual,
        }
    }

    pub(crate) fn encoding(what: &'static str, err: impl std::fmt::Display) -> Self {
        CryptoError::Encoding {
            what,
            detail: err.to_string(),
        }
    }
}

use sealdrive_crypto::CryptoError;
use thiserror::Error;

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum UploadError {
    /// Internal invariant violation: a non-final part below the provider
    /// minimum was about to be issued. Indicates a bug in the accumulation
    /// logic, not a storage condition.
    #[error("part {part_number} below minimum size: {size} < {min} bytes")]
    PartSize {
        part_number: u32,
        size: usize,
        min: usize,
    },

    /// Transient network/storage failure that survived the retry budget.
    #[error("{operation} failed after {attempts} attempts: {message}")]
    Network {
        operation: &'static str,
        attempts: u32,
        message: String,
    },

    /// Non-retryable storage protocol violation (unknown upload id, part
    /// list rejected, ...).
    #[error("storage contract violation during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    /// Transfer cancelled by the caller; the remote upload has been aborted.
    #[error("transfer cancelled")]
    Cancelled,

    /// Cryptographic failure. Never retried: re-running the same operation
    /// against the same bytes cannot succeed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Failure reading the plaintext source or writing the decrypted sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! sealdrive-upload: encrypted multipart upload pipeline
//!
//! Plaintext → StreamEncryptor → accumulation buffer → multipart parts.
//! The orchestrator buffers ciphertext until a part reaches the provider's
//! 5 MiB minimum, so every non-final part is legal by construction.

pub mod download;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod retry;
pub mod s3;
pub mod store;

pub use download::decrypt_stream;
pub use error::{UploadError, UploadResult};
pub use memory::MemoryStore;
pub use orchestrator::{UploadOrchestrator, UploadOutcome, UploadState};
pub use retry::RetryPolicy;
pub use s3::S3Store;
pub use store::{CompletedPart, MultipartStore, StoreError, UploadId};

/// Minimum size of a non-final multipart part (S3 protocol constraint).
/// Undersized non-final parts are a caller-side contract error; the
/// accumulation logic must prevent them, the store never sees them.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum number of parts per multipart upload (S3 limit).
pub const MAX_PARTS: u32 = 10_000;

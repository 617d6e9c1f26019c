//! Streaming authenticated encryption: ordered, truncation-proof chunks
//!
//! The 24-byte stream header is the random base nonce. Chunk `i` is sealed
//! with nonce = base nonce XOR i (trailing 8 bytes) and AAD = i, so a chunk
//! only ever authenticates at its own position. A finality marker byte is
//! appended to the plaintext before sealing; a stream that ends without a
//! marked final chunk is detectably truncated.
//!
//! Both directions are pure byte transforms with no I/O awareness. Within a
//! stream, chunk i requires chunk i-1 first — the counter is internal state.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::ContentKey;
use crate::{AUTH_SIZE, DEFAULT_CHUNK_SIZE, HEADER_SIZE};

const MARKER_MESSAGE: u8 = 0x00;
const MARKER_FINAL: u8 = 0x01;

/// How far around the expected index the decryptor probes to classify an
/// authentication failure as a reordered chunk rather than tampering.
const REORDER_PROBE_WINDOW: u64 = 8;

fn chunk_nonce(base: &[u8; HEADER_SIZE], index: u64) -> XNonce {
    let mut nonce = *base;
    let idx = index.to_be_bytes();
    for (i, b) in idx.iter().enumerate() {
        nonce[HEADER_SIZE - 8 + i] ^= b;
    }
    XNonce::from(nonce)
}

/// Encrypt side of the chunk stream.
pub struct StreamEncryptor {
    cipher: XChaCha20Poly1305,
    base_nonce: [u8; HEADER_SIZE],
    counter: u64,
    finished: bool,
}

impl StreamEncryptor {
    /// Open an encrypt stream. Returns the encryptor and the header that
    /// must be written as the first `HEADER_SIZE` bytes of the output.
    pub fn new(key: &ContentKey) -> (Self, [u8; HEADER_SIZE]) {
        let mut base_nonce = [0u8; HEADER_SIZE];
        rand::thread_rng().fill_bytes(&mut base_nonce);

        let enc = Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
            base_nonce,
            counter: 0,
            finished: false,
        };
        (enc, base_nonce)
    }

    /// Encrypt the next sequential chunk. `plaintext` may be at most
    /// `DEFAULT_CHUNK_SIZE` bytes; the final chunk may be shorter (or empty).
    pub fn push_chunk(&mut self, plaintext: &[u8], is_final: bool) -> CryptoResult<Vec<u8>> {
        if self.finished {
            return Err(CryptoError::StreamOrder(
                "push after final chunk".to_string(),
            ));
        }
        if plaintext.len() > DEFAULT_CHUNK_SIZE {
            return Err(CryptoError::format(
                "plaintext chunk",
                DEFAULT_CHUNK_SIZE,
                plaintext.len(),
            ));
        }

        let mut buf = Vec::with_capacity(plaintext.len() + 1);
        buf.extend_from_slice(plaintext);
        buf.push(if is_final { MARKER_FINAL } else { MARKER_MESSAGE });

        let aad = self.counter.to_be_bytes();
        let ciphertext = self
            .cipher
            .encrypt(
                &chunk_nonce(&self.base_nonce, self.counter),
                Payload {
                    msg: &buf,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Authentication)?;
        buf.zeroize();

        self.counter += 1;
        if is_final {
            self.finished = true;
        }
        Ok(ciphertext)
    }

    /// Number of chunks pushed so far.
    pub fn chunks(&self) -> u64 {
        self.counter
    }

    /// True once the final chunk has been pushed.
    pub fn finished(&self) -> bool {
        self.finished
    }
}

/// Decrypt side of the chunk stream.
pub struct StreamDecryptor {
    cipher: XChaCha20Poly1305,
    base_nonce: [u8; HEADER_SIZE],
    counter: u64,
    finished: bool,
}

impl StreamDecryptor {
    /// Open a decrypt stream from the key and the stream header.
    pub fn new(key: &ContentKey, header: &[u8]) -> CryptoResult<Self> {
        if header.len() != HEADER_SIZE {
            return Err(CryptoError::format("stream header", HEADER_SIZE, header.len()));
        }
        let mut base_nonce = [0u8; HEADER_SIZE];
        base_nonce.copy_from_slice(header);

        Ok(Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
            base_nonce,
            counter: 0,
            finished: false,
        })
    }

    /// Decrypt the next sequential chunk. Returns the plaintext and whether
    /// this was the stream's final chunk.
    ///
    /// Failure kinds are distinct and non-overlapping: `Authentication` for
    /// a tag mismatch (tampering/corruption), `StreamOrder` for a chunk
    /// outside the expected sequence. Neither is retryable.
    pub fn pull_chunk(&mut self, ciphertext: &[u8]) -> CryptoResult<(Vec<u8>, bool)> {
        if self.finished {
            return Err(CryptoError::StreamOrder(
                "chunk received after final chunk".to_string(),
            ));
        }
        if ciphertext.len() < AUTH_SIZE {
            return Err(CryptoError::format("ciphertext chunk", AUTH_SIZE, ciphertext.len()));
        }

        let mut plaintext = match self.try_open(ciphertext, self.counter) {
            Ok(pt) => pt,
            Err(()) => return Err(self.classify_failure(ciphertext)),
        };

        // The marker byte is authenticated; anything but 0/1 means an
        // incompatible producer, not tampering.
        let marker = plaintext.pop().ok_or(CryptoError::format(
            "decrypted chunk",
            1,
            0,
        ))?;
        let is_final = match marker {
            MARKER_MESSAGE => false,
            MARKER_FINAL => true,
            _ => {
                plaintext.zeroize();
                return Err(CryptoError::format("finality marker", 1, marker as usize));
            }
        };

        self.counter += 1;
        if is_final {
            self.finished = true;
        }
        Ok((plaintext, is_final))
    }

    /// Must be called once the input is exhausted: a stream whose final
    /// chunk never arrived was truncated in transit.
    pub fn finish(self) -> CryptoResult<()> {
        if self.finished {
            Ok(())
        } else {
            Err(CryptoError::StreamOrder(format!(
                "stream truncated after {} chunks (final chunk missing)",
                self.counter
            )))
        }
    }

    /// True once the final chunk has been pulled.
    pub fn finished(&self) -> bool {
        self.finished
    }

    fn try_open(&self, ciphertext: &[u8], index: u64) -> Result<Vec<u8>, ()> {
        let aad = index.to_be_bytes();
        self.cipher
            .decrypt(
                &chunk_nonce(&self.base_nonce, index),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| ())
    }

    /// A chunk that fails at the expected index but authenticates at a
    /// nearby one was reordered, not tampered with. The probe is bounded;
    /// reorders beyond the window report as authentication failures, which
    /// is still fatal for the stream.
    fn classify_failure(&self, ciphertext: &[u8]) -> CryptoError {
        let lo = self.counter.saturating_sub(REORDER_PROBE_WINDOW);
        let hi = self.counter.saturating_add(REORDER_PROBE_WINDOW);
        for index in lo..=hi {
            if index == self.counter {
                continue;
            }
            if let Ok(mut pt) = self.try_open(ciphertext, index) {
                pt.zeroize();
                return CryptoError::StreamOrder(format!(
                    "chunk for index {index} received at index {}",
                    self.counter
                ));
            }
        }
        CryptoError::Authentication
    }
}

//! Streaming decryption of a stored object
//!
//! Mirrors the upload side: the ciphertext is consumed in
//! `ENCRYPTED_CHUNK_SIZE` bites after the header, so memory stays bounded
//! regardless of object size. Truncated streams fail when the final
//! chunk marker never arrives.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use sealdrive_crypto::{ContentKey, CryptoError, StreamDecryptor, ENCRYPTED_CHUNK_SIZE, HEADER_SIZE};

use crate::error::{UploadError, UploadResult};

/// Decrypt `source` under `key`, writing plaintext to `sink`.
///
/// Returns the number of plaintext bytes written. Fails on tampering,
/// reordering, truncation, or trailing garbage after the final chunk.
pub async fn decrypt_stream(
    key: &ContentKey,
    mut source: impl AsyncRead + Unpin,
    mut sink: impl AsyncWrite + Unpin,
) -> UploadResult<u64> {
    let mut header = [0u8; HEADER_SIZE];
    source.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            UploadError::Crypto(CryptoError::Format {
                what: "stream header",
                expected: HEADER_SIZE,
                actual: 0,
            })
        } else {
            UploadError::Io(e)
        }
    })?;

    let mut decryptor = StreamDecryptor::new(key, &header)?;
    let mut written = 0u64;
    let mut saw_final = false;

    loop {
        let chunk = read_sealed_chunk(&mut source).await?;
        if chunk.is_empty() {
            break;
        }
        if saw_final {
            return Err(CryptoError::StreamOrder(
                "data after final chunk".to_string(),
            )
            .into());
        }

        let (plaintext, is_final) = decryptor.pull_chunk(&chunk)?;
        sink.write_all(&plaintext).await?;
        written += plaintext.len() as u64;
        saw_final = is_final;
    }

    decryptor.finish()?;
    sink.flush().await?;
    Ok(written)
}

/// Read up to one sealed chunk. A short read is legal only for the final
/// chunk; the cipher layer rejects anything too short to authenticate.
async fn read_sealed_chunk(source: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; ENCRYPTED_CHUNK_SIZE];
    let mut filled = 0;
    while filled < ENCRYPTED_CHUNK_SIZE {
        let n = source.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

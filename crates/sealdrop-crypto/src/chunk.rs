//! Chunked AES-256-GCM file encryption
//!
//! A file is split into fixed 5 MiB chunks (the last may be shorter). Every
//! chunk is sealed independently under the same session key and the same
//! per-file 96-bit IV:
//!
//! ```text
//! ciphertext[i] = AES-256-GCM(key, iv, aad = "chunk-<i>", plaintext[i])
//!               = [len(plaintext[i]) bytes ciphertext][16 bytes tag]
//! ```
//!
//! The IV is shared across chunks on purpose; position binding comes from the
//! AAD. Decrypting chunk `i`'s ciphertext at any index other than `i` fails
//! authentication, so reordering, substitution and drops are all detected.
//!
//! A zero-length file still produces exactly one (empty) chunk.

use tracing::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::progress::ProgressReporter;
use crate::provider::CryptoProvider;
use crate::session::SessionKey;
use crate::{Iv, CHUNK_SIZE, IV_SIZE};

/// Number of chunks for a file of `file_size` bytes (at least one).
pub fn chunk_count(file_size: u64) -> u64 {
    if file_size == 0 {
        1
    } else {
        file_size.div_ceil(CHUNK_SIZE as u64)
    }
}

/// Expected plaintext length of chunk `index`.
pub fn chunk_len(file_size: u64, index: u64) -> usize {
    let start = index.saturating_mul(CHUNK_SIZE as u64);
    file_size.saturating_sub(start).min(CHUNK_SIZE as u64) as usize
}

/// Additional authenticated data for chunk `index`: UTF-8 `"chunk-<index>"`.
pub fn chunk_aad(index: u64) -> Vec<u8> {
    format!("chunk-{index}").into_bytes()
}

/// Encrypt side of the per-transfer state machine.
///
/// `init` → `encrypt_chunk(0)` … `encrypt_chunk(n-1)` → `finalize`.
pub struct ChunkEncryptor<'a> {
    provider: &'a dyn CryptoProvider,
    key: &'a SessionKey,
    iv: Iv,
    file_size: u64,
    total: u64,
    next: u64,
    progress: ProgressReporter,
}

impl<'a> ChunkEncryptor<'a> {
    /// Start a transfer of `file_size` bytes, drawing the file's IV.
    pub fn init(
        provider: &'a dyn CryptoProvider,
        key: &'a SessionKey,
        file_size: u64,
    ) -> CryptoResult<Self> {
        let mut iv = [0u8; IV_SIZE];
        provider.secure_random_bytes(&mut iv)?;
        let total = chunk_count(file_size);

        Ok(Self {
            provider,
            key,
            iv,
            file_size,
            total,
            next: 0,
            progress: ProgressReporter::new(total),
        })
    }

    pub fn iv(&self) -> Iv {
        self.iv
    }

    pub fn chunk_count(&self) -> u64 {
        self.total
    }

    pub fn progress_mut(&mut self) -> &mut ProgressReporter {
        &mut self.progress
    }

    /// Seal the next chunk. Indices must arrive strictly ascending from 0.
    pub fn encrypt_chunk(&mut self, index: u64, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        if index != self.next || index >= self.total {
            return Err(CryptoError::ChunkOrder {
                expected: self.next,
                actual: index,
            });
        }

        let expected = chunk_len(self.file_size, index);
        if plaintext.len() != expected {
            return Err(CryptoError::ChunkLength {
                index,
                expected,
                actual: plaintext.len(),
            });
        }

        let ciphertext = self
            .provider
            .aead_encrypt(self.key, &self.iv, &chunk_aad(index), plaintext)
            .map_err(|_| CryptoError::ChunkEncrypt { index })?;

        self.next += 1;
        debug!(index, total = self.total, bytes = plaintext.len(), "chunk encrypted");
        self.progress.complete_chunk();
        Ok(ciphertext)
    }

    /// Close the transfer, returning the IV and chunk count for the envelope.
    pub fn finalize(self) -> CryptoResult<(Iv, u64)> {
        if self.next != self.total {
            return Err(CryptoError::Incomplete {
                expected: self.total,
                actual: self.next,
            });
        }
        Ok((self.iv, self.total))
    }
}

/// Decrypt side: `decrypt_chunk(0)` … `decrypt_chunk(n-1)` → `finish`.
pub struct ChunkDecryptor<'a> {
    provider: &'a dyn CryptoProvider,
    key: &'a SessionKey,
    iv: Iv,
    total: u64,
    next: u64,
    progress: ProgressReporter,
}

impl<'a> ChunkDecryptor<'a> {
    pub fn new(
        provider: &'a dyn CryptoProvider,
        key: &'a SessionKey,
        iv: Iv,
        chunk_count: u64,
    ) -> Self {
        Self {
            provider,
            key,
            iv,
            total: chunk_count,
            next: 0,
            progress: ProgressReporter::new(chunk_count),
        }
    }

    pub fn progress_mut(&mut self) -> &mut ProgressReporter {
        &mut self.progress
    }

    /// Open the next chunk. Any authentication failure is reported with the
    /// failing index.
    pub fn decrypt_chunk(&mut self, index: u64, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if index != self.next || index >= self.total {
            return Err(CryptoError::ChunkOrder {
                expected: self.next,
                actual: index,
            });
        }

        let plaintext = self
            .provider
            .aead_decrypt(self.key, &self.iv, &chunk_aad(index), ciphertext)
            .map_err(|_| CryptoError::ChunkDecrypt { index })?;

        self.next += 1;
        debug!(index, total = self.total, bytes = plaintext.len(), "chunk decrypted");
        self.progress.complete_chunk();
        Ok(plaintext)
    }

    /// Confirm every chunk was consumed; returns the chunk count.
    pub fn finish(self) -> CryptoResult<u64> {
        if self.total == 0 || self.next != self.total {
            return Err(CryptoError::Incomplete {
                expected: self.total.max(1),
                actual: self.next,
            });
        }
        Ok(self.total)
    }
}

/// Encrypt an in-memory buffer. Returns the IV, the chunk count recorded by
/// `finalize`, and the ordered chunk ciphertexts.
pub fn encrypt_all(
    provider: &dyn CryptoProvider,
    key: &SessionKey,
    data: &[u8],
    progress: Option<crate::progress::ProgressFn>,
) -> CryptoResult<(Iv, u64, Vec<Vec<u8>>)> {
    let mut encryptor = ChunkEncryptor::init(provider, key, data.len() as u64)?;
    if let Some(observer) = progress {
        encryptor.progress_mut().subscribe_boxed(observer);
    }

    let mut chunks = Vec::with_capacity(encryptor.chunk_count() as usize);
    if data.is_empty() {
        chunks.push(encryptor.encrypt_chunk(0, &[])?);
    } else {
        for (i, piece) in data.chunks(CHUNK_SIZE).enumerate() {
            chunks.push(encryptor.encrypt_chunk(i as u64, piece)?);
        }
    }

    let (iv, count) = encryptor.finalize()?;
    Ok((iv, count, chunks))
}

/// Decrypt ordered chunk ciphertexts and concatenate them.
///
/// `chunk_count` is the count the sender's encryptor finalized with; a chunk
/// list of any other length is rejected before anything is decrypted.
/// All-or-nothing: the first failing chunk aborts with
/// [`CryptoError::ChunkDecrypt`] and no plaintext is returned.
pub fn decrypt_all(
    provider: &dyn CryptoProvider,
    key: &SessionKey,
    iv: Iv,
    chunk_count: u64,
    chunks: &[Vec<u8>],
    progress: Option<crate::progress::ProgressFn>,
) -> CryptoResult<Vec<u8>> {
    // Every transfer has at least one chunk, even an empty file
    if chunk_count == 0 || chunks.len() as u64 != chunk_count {
        return Err(CryptoError::Incomplete {
            expected: chunk_count.max(1),
            actual: chunks.len() as u64,
        });
    }

    let mut decryptor = ChunkDecryptor::new(provider, key, iv, chunk_count);
    if let Some(observer) = progress {
        decryptor.progress_mut().subscribe_boxed(observer);
    }

    let capacity = chunks
        .iter()
        .map(|c| c.len().saturating_sub(crate::TAG_SIZE))
        .sum();
    let mut out = Vec::with_capacity(capacity);
    for (i, chunk) in chunks.iter().enumerate() {
        out.extend_from_slice(&decryptor.decrypt_chunk(i as u64, chunk)?);
    }
    decryptor.finish()?;
    Ok(out)
}

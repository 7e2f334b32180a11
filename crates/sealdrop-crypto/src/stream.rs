//! File-to-envelope pipeline
//!
//! Streams a file through the chunk cipher one 5 MiB chunk at a time, so
//! memory stays bounded by a single plaintext chunk plus its ciphertext.
//!
//! Both directions write to `<dst>.partial` and rename over `dst` only on
//! success. Decryption additionally requires every chunk to authenticate and
//! the byte count to match the header. On any failure the partial file is
//! removed, so tampered or truncated plaintext never looks like a finished file.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::asymmetric::{PrivateKey, PublicKey};
use crate::chunk::{chunk_len, ChunkDecryptor, ChunkEncryptor};
use crate::envelope::{self, EnvelopeHeader};
use crate::error::{CryptoError, CryptoResult};
use crate::progress::ProgressFn;
use crate::provider::CryptoProvider;
use crate::session::{generate_session_key, unwrap_session_key, wrap_session_key};
use crate::{Iv, CHUNK_SIZE};

#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Reject plaintext larger than this many bytes (no limit when `None`)
    pub max_file_size: Option<u64>,
    /// Name recorded in the envelope (defaults to the source file name)
    pub file_name: Option<String>,
}

/// Result of encrypting a single file
#[derive(Debug)]
pub struct EncryptSummary {
    pub chunks: u64,
    pub bytes: u64,
    pub iv: Iv,
}

/// Result of decrypting a single envelope
#[derive(Debug)]
pub struct DecryptSummary {
    pub chunks: u64,
    pub bytes: u64,
    pub file_name: Option<String>,
}

/// Encrypt `src` for `recipient`, writing an envelope to `dst`.
pub async fn encrypt_file(
    provider: &dyn CryptoProvider,
    recipient: &PublicKey,
    src: &Path,
    dst: &Path,
    options: &EncryptOptions,
    progress: Option<ProgressFn>,
) -> CryptoResult<EncryptSummary> {
    let partial = partial_path(dst);
    match encrypt_file_inner(provider, recipient, src, &partial, options, progress).await {
        Ok(summary) => {
            tokio::fs::rename(&partial, dst).await?;
            info!(
                src = %src.display(),
                dst = %dst.display(),
                chunks = summary.chunks,
                bytes = summary.bytes,
                "encrypted"
            );
            Ok(summary)
        }
        Err(e) => {
            remove_quietly(&partial).await;
            Err(e)
        }
    }
}

async fn encrypt_file_inner(
    provider: &dyn CryptoProvider,
    recipient: &PublicKey,
    src: &Path,
    out: &Path,
    options: &EncryptOptions,
    progress: Option<ProgressFn>,
) -> CryptoResult<EncryptSummary> {
    let input = File::open(src).await?;
    let file_size = input.metadata().await?.len();

    if let Some(limit) = options.max_file_size {
        if file_size > limit {
            return Err(CryptoError::FileTooLarge {
                size: file_size,
                limit,
            });
        }
    }

    let file_name = options.file_name.clone().or_else(|| {
        src.file_name()
            .map(|n| n.to_string_lossy().to_string())
    });

    let session_key = generate_session_key(provider)?;
    let wrapped = wrap_session_key(provider, &session_key, recipient)?;
    let mut encryptor = ChunkEncryptor::init(provider, &session_key, file_size)?;
    if let Some(observer) = progress {
        encryptor.progress_mut().subscribe_boxed(observer);
    }

    let header = EnvelopeHeader::new(&wrapped, &encryptor.iv(), file_size, file_name);
    let mut writer = BufWriter::new(File::create(out).await?);
    envelope::write_header(&mut writer, &header).await?;

    let mut reader = BufReader::new(input);
    let mut buf = vec![0u8; CHUNK_SIZE];
    for index in 0..encryptor.chunk_count() {
        let want = chunk_len(file_size, index);
        let got = read_up_to(&mut reader, &mut buf[..want]).await?;
        let ciphertext = encryptor.encrypt_chunk(index, &buf[..got])?;
        envelope::write_chunk(&mut writer, &ciphertext).await?;
    }

    // The source must not have grown underneath us
    if reader.read(&mut [0u8; 1]).await? != 0 {
        return Err(CryptoError::ChunkLength {
            index: encryptor.chunk_count(),
            expected: 0,
            actual: 1,
        });
    }

    let (iv, chunks) = encryptor.finalize()?;
    writer.flush().await?;
    writer.get_mut().sync_all().await?;

    Ok(EncryptSummary {
        chunks,
        bytes: file_size,
        iv,
    })
}

/// Decrypt the envelope at `src` with `private_key`, writing plaintext to `dst`.
pub async fn decrypt_file(
    provider: &dyn CryptoProvider,
    private_key: &PrivateKey,
    src: &Path,
    dst: &Path,
    progress: Option<ProgressFn>,
) -> CryptoResult<DecryptSummary> {
    let partial = partial_path(dst);
    let result = decrypt_file_inner(provider, private_key, src, &partial, progress).await;

    match result {
        Ok(summary) => {
            tokio::fs::rename(&partial, dst).await?;
            info!(
                src = %src.display(),
                dst = %dst.display(),
                chunks = summary.chunks,
                bytes = summary.bytes,
                "decrypted"
            );
            Ok(summary)
        }
        Err(e) => {
            warn!(src = %src.display(), "decryption failed, discarding partial output: {e}");
            remove_quietly(&partial).await;
            Err(e)
        }
    }
}

async fn decrypt_file_inner(
    provider: &dyn CryptoProvider,
    private_key: &PrivateKey,
    src: &Path,
    partial: &Path,
    progress: Option<ProgressFn>,
) -> CryptoResult<DecryptSummary> {
    let mut reader = BufReader::new(File::open(src).await?);
    let header = envelope::read_header(&mut reader).await?;

    let session_key = unwrap_session_key(provider, &header.wrapped_key_bytes()?, private_key)?;
    let mut decryptor =
        ChunkDecryptor::new(provider, &session_key, header.iv_bytes()?, header.chunk_count);
    if let Some(observer) = progress {
        decryptor.progress_mut().subscribe_boxed(observer);
    }

    let mut writer = BufWriter::new(File::create(partial).await?);
    let mut written = 0u64;
    for index in 0..header.chunk_count {
        let ciphertext = envelope::read_chunk(&mut reader, index).await?;
        let plaintext = decryptor.decrypt_chunk(index, &ciphertext)?;

        let expected = chunk_len(header.original_size, index);
        if plaintext.len() != expected {
            return Err(CryptoError::ChunkLength {
                index,
                expected,
                actual: plaintext.len(),
            });
        }
        writer.write_all(&plaintext).await?;
        written += plaintext.len() as u64;
    }
    envelope::expect_eof(&mut reader).await?;
    let chunks = decryptor.finish()?;

    if written != header.original_size {
        return Err(CryptoError::Envelope(format!(
            "decrypted {written} bytes, header declares {}",
            header.original_size
        )));
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;

    Ok(DecryptSummary {
        chunks,
        bytes: written,
        file_name: header.safe_file_name(),
    })
}

/// Read only the envelope header (no key required).
pub async fn inspect_file(src: &Path) -> CryptoResult<EnvelopeHeader> {
    let mut reader = BufReader::new(File::open(src).await?);
    envelope::read_header(&mut reader).await
}

/// Fill `buf` from `reader`, stopping early only at end of input.
async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> CryptoResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "sealdrop-output".into());
    name.push(".partial");
    dst.with_file_name(name)
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed incomplete output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove incomplete output: {e}"),
    }
}

//! Envelope container for an encrypted transfer
//!
//! Binary format:
//! ```text
//! [4 bytes: magic "SDRP"][1 byte: format version]
//! [4 bytes: header length, u32 BE][N bytes: header JSON]
//! chunk_count × ([4 bytes: ciphertext length, u32 BE][ciphertext || 16-byte tag])
//! ```
//!
//! The JSON header carries the wrapped session key and IV (base64) plus the
//! layout needed to stream chunks back out without buffering the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::asymmetric::{PrivateKey, PublicKey};
use crate::chunk::{chunk_count, decrypt_all, encrypt_all};
use crate::codec::{bytes_to_text, text_to_bytes};
use crate::error::{CryptoError, CryptoResult};
use crate::progress::ProgressFn;
use crate::provider::CryptoProvider;
use crate::session::{generate_session_key, unwrap_session_key, wrap_session_key};
use crate::{Iv, CHUNK_SIZE, IV_SIZE, TAG_SIZE};

pub const MAGIC: &[u8; 4] = b"SDRP";
pub const FORMAT_VERSION: u8 = 1;

/// Headers are a few hundred bytes; anything past this is corrupt input
pub const MAX_HEADER_LEN: u32 = 64 * 1024;

/// Largest legal chunk frame
pub const MAX_CHUNK_FRAME: u32 = (CHUNK_SIZE + TAG_SIZE) as u32;

/// Envelope metadata, stored as JSON ahead of the chunk frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Header format version
    pub version: u32,
    /// Session key wrapped under the recipient public key (base64)
    pub wrapped_session_key: String,
    /// Per-file AES-GCM IV (base64, 12 bytes)
    pub iv: String,
    /// Plaintext chunk size in bytes
    pub chunk_size: u64,
    /// Number of chunk frames that follow
    pub chunk_count: u64,
    /// Original plaintext size in bytes
    pub original_size: u64,
    /// Original file name as supplied by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl EnvelopeHeader {
    pub fn new(
        wrapped_session_key: &[u8],
        iv: &Iv,
        original_size: u64,
        file_name: Option<String>,
    ) -> Self {
        Self {
            version: FORMAT_VERSION as u32,
            wrapped_session_key: bytes_to_text(wrapped_session_key),
            iv: bytes_to_text(iv),
            chunk_size: CHUNK_SIZE as u64,
            chunk_count: chunk_count(original_size),
            original_size,
            file_name,
        }
    }

    pub fn wrapped_key_bytes(&self) -> CryptoResult<Vec<u8>> {
        text_to_bytes(&self.wrapped_session_key)
    }

    pub fn iv_bytes(&self) -> CryptoResult<Iv> {
        let raw = text_to_bytes(&self.iv)?;
        raw.as_slice().try_into().map_err(|_| {
            CryptoError::Envelope(format!("IV is {} bytes, expected {IV_SIZE}", raw.len()))
        })
    }

    /// File name reduced to its final component, safe to join onto a directory.
    pub fn safe_file_name(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let base = Path::new(name).file_name()?.to_string_lossy().to_string();
        if base.is_empty() || base == "." || base == ".." {
            None
        } else {
            Some(base)
        }
    }

    fn validate(&self) -> CryptoResult<()> {
        if self.version != FORMAT_VERSION as u32 {
            return Err(CryptoError::Envelope(format!(
                "unsupported header version {}",
                self.version
            )));
        }
        if self.chunk_size != CHUNK_SIZE as u64 {
            return Err(CryptoError::Envelope(format!(
                "chunk size {} not supported (expected {CHUNK_SIZE})",
                self.chunk_size
            )));
        }
        let expected = chunk_count(self.original_size);
        if self.chunk_count != expected {
            return Err(CryptoError::Envelope(format!(
                "chunk count {} does not match original size {} (expected {expected})",
                self.chunk_count, self.original_size
            )));
        }
        Ok(())
    }
}

/// Everything the receiver needs, produced by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub wrapped_session_key: Vec<u8>,
    pub iv: Iv,
    /// Chunk count the sender finalized with; never zero
    pub chunk_count: u64,
    pub chunks: Vec<Vec<u8>>,
}

impl EncryptedPayload {
    /// Plaintext size implied by the chunk ciphertext lengths.
    pub fn plaintext_len(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.len().saturating_sub(TAG_SIZE) as u64)
            .sum()
    }

    /// Frame the payload as a complete envelope.
    pub fn to_bytes(&self, file_name: Option<String>) -> CryptoResult<Vec<u8>> {
        self.check_layout()?;
        let header = EnvelopeHeader::new(
            &self.wrapped_session_key,
            &self.iv,
            self.plaintext_len(),
            file_name,
        );
        if header.chunk_count != self.chunks.len() as u64 {
            return Err(CryptoError::Envelope(format!(
                "payload has {} chunks, layout requires {}",
                self.chunks.len(),
                header.chunk_count
            )));
        }

        let mut out = encode_header(&header)?;
        for chunk in &self.chunks {
            out.extend_from_slice(&frame_len(chunk.len())?.to_be_bytes());
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }

    /// Chunk list must match the recorded count, with every chunk but the
    /// last carrying a full `CHUNK_SIZE` of plaintext.
    fn check_layout(&self) -> CryptoResult<()> {
        if self.chunk_count == 0 || self.chunks.len() as u64 != self.chunk_count {
            return Err(CryptoError::Envelope(format!(
                "payload has {} chunks, sender recorded {}",
                self.chunks.len(),
                self.chunk_count
            )));
        }
        let last = self.chunks.len() - 1;
        for (index, chunk) in self.chunks.iter().enumerate() {
            let ok = if index == last {
                (TAG_SIZE..=CHUNK_SIZE + TAG_SIZE).contains(&chunk.len())
            } else {
                chunk.len() == CHUNK_SIZE + TAG_SIZE
            };
            if !ok {
                return Err(CryptoError::Envelope(format!(
                    "chunk {index} has invalid ciphertext length {}",
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    /// Parse a complete envelope held in memory.
    pub fn from_bytes(data: &[u8]) -> CryptoResult<(EnvelopeHeader, Self)> {
        let mut reader = data;
        let header = read_header_sync(&mut reader)?;

        let mut chunks = Vec::with_capacity(header.chunk_count.min(1024) as usize);
        for index in 0..header.chunk_count {
            let len = read_u32_sync(&mut reader)
                .map_err(|_| truncated(format!("chunk {index} length")))?;
            check_frame_len(len)?;
            if reader.len() < len as usize {
                return Err(truncated(format!("chunk {index} body")));
            }
            let (body, rest) = reader.split_at(len as usize);
            chunks.push(body.to_vec());
            reader = rest;
        }
        if !reader.is_empty() {
            return Err(CryptoError::Envelope(format!(
                "{} trailing bytes after last chunk",
                reader.len()
            )));
        }

        let payload = Self {
            wrapped_session_key: header.wrapped_key_bytes()?,
            iv: header.iv_bytes()?,
            chunk_count: header.chunk_count,
            chunks,
        };
        Ok((header, payload))
    }
}

/// Sender side, in memory: fresh session key, chunk encryption, key wrap.
pub fn seal(
    provider: &dyn CryptoProvider,
    recipient: &PublicKey,
    plaintext: &[u8],
    progress: Option<ProgressFn>,
) -> CryptoResult<EncryptedPayload> {
    let session_key = generate_session_key(provider)?;
    let (iv, chunk_count, chunks) = encrypt_all(provider, &session_key, plaintext, progress)?;
    let wrapped_session_key = wrap_session_key(provider, &session_key, recipient)?;

    Ok(EncryptedPayload {
        wrapped_session_key,
        iv,
        chunk_count,
        chunks,
    })
}

/// Receiver side, in memory: unwrap the session key and decrypt every chunk.
pub fn open(
    provider: &dyn CryptoProvider,
    private_key: &PrivateKey,
    payload: &EncryptedPayload,
    progress: Option<ProgressFn>,
) -> CryptoResult<Vec<u8>> {
    let session_key = unwrap_session_key(provider, &payload.wrapped_session_key, private_key)?;
    decrypt_all(
        provider,
        &session_key,
        payload.iv,
        payload.chunk_count,
        &payload.chunks,
        progress,
    )
}

/// Magic, version, length-prefixed header JSON.
pub fn encode_header(header: &EnvelopeHeader) -> CryptoResult<Vec<u8>> {
    let json = serde_json::to_vec(header)
        .map_err(|e| CryptoError::Envelope(format!("header serialization: {e}")))?;
    let len = u32::try_from(json.len())
        .ok()
        .filter(|l| *l <= MAX_HEADER_LEN)
        .ok_or_else(|| CryptoError::Envelope(format!("header too large: {} bytes", json.len())))?;

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + 4 + json.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

pub async fn write_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &EnvelopeHeader,
) -> CryptoResult<()> {
    writer.write_all(&encode_header(header)?).await?;
    Ok(())
}

pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> CryptoResult<EnvelopeHeader> {
    let mut prefix = [0u8; 9];
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(|_| truncated("envelope prefix".into()))?;
    let len = check_prefix(&prefix)?;

    let mut json = vec![0u8; len as usize];
    reader
        .read_exact(&mut json)
        .await
        .map_err(|_| truncated("header".into()))?;
    parse_header(&json)
}

pub async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> CryptoResult<()> {
    writer.write_all(&frame_len(chunk.len())?.to_be_bytes()).await?;
    writer.write_all(chunk).await?;
    Ok(())
}

pub async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, index: u64) -> CryptoResult<Vec<u8>> {
    let len = reader
        .read_u32()
        .await
        .map_err(|_| truncated(format!("chunk {index} length")))?;
    check_frame_len(len)?;

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| truncated(format!("chunk {index} body")))?;
    Ok(body)
}

/// Fails unless the reader is at end of input.
pub async fn expect_eof<R: AsyncRead + Unpin>(reader: &mut R) -> CryptoResult<()> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await? {
        0 => Ok(()),
        _ => Err(CryptoError::Envelope(
            "trailing bytes after last chunk".into(),
        )),
    }
}

fn read_header_sync(reader: &mut &[u8]) -> CryptoResult<EnvelopeHeader> {
    let mut prefix = [0u8; 9];
    std::io::Read::read_exact(reader, &mut prefix)
        .map_err(|_| truncated("envelope prefix".into()))?;
    let len = check_prefix(&prefix)? as usize;

    if reader.len() < len {
        return Err(truncated("header".into()));
    }
    let (json, rest) = reader.split_at(len);
    *reader = rest;
    parse_header(json)
}

fn read_u32_sync(reader: &mut &[u8]) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    std::io::Read::read_exact(reader, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Validate magic + version; returns the header length.
fn check_prefix(prefix: &[u8; 9]) -> CryptoResult<u32> {
    if &prefix[..4] != MAGIC {
        return Err(CryptoError::Envelope("not a sealdrop envelope (bad magic)".into()));
    }
    if prefix[4] != FORMAT_VERSION {
        return Err(CryptoError::Envelope(format!(
            "unsupported format version {}",
            prefix[4]
        )));
    }
    let len = u32::from_be_bytes([prefix[5], prefix[6], prefix[7], prefix[8]]);
    if len > MAX_HEADER_LEN {
        return Err(CryptoError::Envelope(format!("header length {len} exceeds limit")));
    }
    Ok(len)
}

fn parse_header(json: &[u8]) -> CryptoResult<EnvelopeHeader> {
    let header: EnvelopeHeader = serde_json::from_slice(json)
        .map_err(|e| CryptoError::Envelope(format!("header deserialization: {e}")))?;
    header.validate()?;
    Ok(header)
}

fn frame_len(len: usize) -> CryptoResult<u32> {
    u32::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_CHUNK_FRAME)
        .ok_or_else(|| CryptoError::Envelope(format!("chunk of {len} bytes exceeds frame limit")))
}

fn check_frame_len(len: u32) -> CryptoResult<()> {
    if len < TAG_SIZE as u32 || len > MAX_CHUNK_FRAME {
        return Err(CryptoError::Envelope(format!("invalid chunk frame length {len}")));
    }
    Ok(())
}

fn truncated(what: String) -> CryptoError {
    CryptoError::Envelope(format!("truncated envelope: missing {what}"))
}

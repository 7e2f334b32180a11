use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGen(String),

    #[error("key import failed: {0}")]
    KeyImport(String),

    #[error("key export failed: {0}")]
    KeyExport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("session key wrap failed: {0}")]
    Wrap(String),

    #[error("session key unwrap failed: {0}")]
    Unwrap(String),

    #[error("chunk {index} encryption failed")]
    ChunkEncrypt { index: u64 },

    #[error("chunk {index} failed authentication: wrong key, corrupted, or reordered data")]
    ChunkDecrypt { index: u64 },

    #[error("chunk out of order: expected index {expected}, got {actual}")]
    ChunkOrder { expected: u64, actual: u64 },

    #[error("chunk {index} is {actual} bytes, expected {expected}")]
    ChunkLength {
        index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("incomplete transfer: {actual} of {expected} chunks processed")]
    Incomplete { expected: u64, actual: u64 },

    #[error("file is {size} bytes, exceeds limit of {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("envelope error: {0}")]
    Envelope(String),

    #[error("crypto primitive failed: {0}")]
    Primitive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

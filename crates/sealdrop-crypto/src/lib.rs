//! sealdrop-crypto: client-side hybrid encryption for Sealdrop
//!
//! Architecture: RSA-OAEP key transport + chunked AES-256-GCM
//!
//! Pipeline: plaintext → 5 MiB chunks → AES-GCM (shared IV, AAD="chunk-<i>") → envelope
//!
//! Key hierarchy:
//! ```text
//! Recipient RSA-4096 key pair (SPKI / PKCS#8 PEM)
//!   └── Session Key (per-file, 256-bit random, wrapped with RSA-OAEP-SHA256 → 512 bytes)
//!       └── Chunk AEAD: AES-256-GCM (key=session_key, iv=per-file 96-bit, AAD="chunk-" || index)
//! ```
//!
//! All primitives are reached through [`CryptoProvider`], so callers can swap
//! the backend without touching the chunk or envelope logic.

pub mod asymmetric;
pub mod chunk;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod progress;
pub mod provider;
pub mod session;
pub mod stream;

pub use asymmetric::{
    export_private, export_public, generate_key_pair, import_private, import_public, KeyPair,
    KeySink, PrivateKey, PublicKey, RSA_KEY_BITS, WRAPPED_KEY_SIZE,
};
pub use chunk::{chunk_count, decrypt_all, encrypt_all, ChunkDecryptor, ChunkEncryptor};
pub use codec::{bytes_to_text, pem_decode, pem_encode, text_to_bytes};
pub use envelope::{open, seal, EncryptedPayload, EnvelopeHeader};
pub use error::{CryptoError, CryptoResult};
pub use progress::{ProgressFn, ProgressReporter};
pub use provider::{CryptoProvider, RustCrypto};
pub use session::{generate_session_key, unwrap_session_key, wrap_session_key, SessionKey};
pub use stream::{
    decrypt_file, encrypt_file, inspect_file, DecryptSummary, EncryptOptions, EncryptSummary,
};

/// Size of a session key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Plaintext bytes per chunk (5 MiB)
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Per-file AES-GCM IV
pub type Iv = [u8; IV_SIZE];

#[cfg(test)]
pub(crate) mod testutil {
    //! RSA-4096 generation takes seconds; share two key pairs across tests.

    use std::sync::OnceLock;

    use crate::asymmetric::{generate_key_pair, KeyPair};
    use crate::provider::RustCrypto;

    static PRIMARY: OnceLock<KeyPair> = OnceLock::new();
    static SECONDARY: OnceLock<KeyPair> = OnceLock::new();

    pub fn test_key_pair() -> &'static KeyPair {
        PRIMARY.get_or_init(|| generate_key_pair(&RustCrypto).expect("keygen"))
    }

    pub fn other_key_pair() -> &'static KeyPair {
        SECONDARY.get_or_init(|| generate_key_pair(&RustCrypto).expect("keygen"))
    }
}

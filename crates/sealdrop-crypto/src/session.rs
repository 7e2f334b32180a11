//! Per-transfer session keys and their RSA-OAEP wrapping
//!
//! A session key is 256 bits of fresh randomness, used for exactly one file.
//! It only leaves volatile memory wrapped under the recipient's public key;
//! for a 4096-bit recipient key the wrapped form is always 512 bytes.

use zeroize::Zeroize;

use crate::asymmetric::{PrivateKey, PublicKey};
use crate::error::{CryptoError, CryptoResult};
use crate::provider::CryptoProvider;
use crate::KEY_SIZE;

/// A per-transfer 256-bit AES key. Zeroized on drop.
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh session key for one transfer.
pub fn generate_session_key(provider: &dyn CryptoProvider) -> CryptoResult<SessionKey> {
    provider
        .generate_symmetric_key()
        .map_err(|e| CryptoError::KeyGen(e.to_string()))
}

/// Wrap (encrypt) the raw session key bytes under the recipient's public key.
///
/// Output length equals the recipient modulus size in bytes.
pub fn wrap_session_key(
    provider: &dyn CryptoProvider,
    session_key: &SessionKey,
    recipient: &PublicKey,
) -> CryptoResult<Vec<u8>> {
    provider
        .asymmetric_encrypt(recipient.as_rsa(), session_key.as_bytes())
        .map_err(|e| CryptoError::Wrap(e.to_string()))
}

/// Unwrap (decrypt) a session key with the recipient's private key.
///
/// Fails with [`CryptoError::Unwrap`] on a wrong key, corrupted input, or a
/// recovered key of the wrong length.
pub fn unwrap_session_key(
    provider: &dyn CryptoProvider,
    wrapped: &[u8],
    private_key: &PrivateKey,
) -> CryptoResult<SessionKey> {
    let expected = private_key.modulus_len();
    if wrapped.len() != expected {
        return Err(CryptoError::Unwrap(format!(
            "wrapped key is {} bytes (expected {expected})",
            wrapped.len()
        )));
    }

    let plaintext = provider
        .asymmetric_decrypt(private_key.as_rsa(), wrapped)
        .map_err(|_| {
            CryptoError::Unwrap("invalid private key or corrupted wrapped key".into())
        })?;

    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::Unwrap(format!(
            "unwrapped key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    Ok(SessionKey::from_bytes(key_bytes))
}

//! Primitive capability seam
//!
//! Everything above this module (key managers, chunk cipher, file pipeline)
//! reaches RSA, AES-GCM and the CSPRNG only through [`CryptoProvider`], so a
//! host can substitute its own audited backend (HSM, platform keystore, test
//! double) without touching the protocol code.
//!
//! [`RustCrypto`] is the default backend:
//! - RSA-OAEP with SHA-256 (`rsa`, `sha2`)
//! - AES-256-GCM, 96-bit nonce, 128-bit tag (`aes-gcm`)
//! - OS entropy (`rand::rngs::OsRng`)

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::session::SessionKey;
use crate::{Iv, KEY_SIZE};

pub trait CryptoProvider: Send + Sync {
    /// Fill `buf` from a cryptographically secure source.
    fn secure_random_bytes(&self, buf: &mut [u8]) -> CryptoResult<()>;

    /// Generate an RSA private key with a `bits`-bit modulus.
    fn generate_asymmetric_key_pair(&self, bits: usize) -> CryptoResult<RsaPrivateKey>;

    /// RSA-OAEP (SHA-256) encryption.
    fn asymmetric_encrypt(&self, key: &RsaPublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    /// RSA-OAEP (SHA-256) decryption.
    fn asymmetric_decrypt(
        &self,
        key: &RsaPrivateKey,
        ciphertext: &[u8],
    ) -> CryptoResult<Zeroizing<Vec<u8>>>;

    /// Fresh 256-bit symmetric key.
    fn generate_symmetric_key(&self) -> CryptoResult<SessionKey> {
        let mut bytes = [0u8; KEY_SIZE];
        self.secure_random_bytes(&mut bytes)?;
        Ok(SessionKey::from_bytes(bytes))
    }

    /// AES-256-GCM encryption. Output is `ciphertext || 16-byte tag`.
    fn aead_encrypt(
        &self,
        key: &SessionKey,
        iv: &Iv,
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    /// AES-256-GCM decryption of `ciphertext || tag`.
    fn aead_decrypt(
        &self,
        key: &SessionKey,
        iv: &Iv,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>>;
}

/// Default provider backed by the RustCrypto crates and OS entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCrypto;

impl CryptoProvider for RustCrypto {
    fn secure_random_bytes(&self, buf: &mut [u8]) -> CryptoResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| CryptoError::Primitive(format!("OS entropy unavailable: {e}")))
    }

    fn generate_asymmetric_key_pair(&self, bits: usize) -> CryptoResult<RsaPrivateKey> {
        RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::Primitive(format!("RSA-{bits} generation: {e}")))
    }

    fn asymmetric_encrypt(&self, key: &RsaPublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::Primitive(format!("RSA-OAEP encrypt: {e}")))
    }

    fn asymmetric_decrypt(
        &self,
        key: &RsaPrivateKey,
        ciphertext: &[u8],
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        key.decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::Primitive(format!("RSA-OAEP decrypt: {e}")))
    }

    fn aead_encrypt(
        &self,
        key: &SessionKey,
        iv: &Iv,
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        cipher
            .encrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::Primitive(format!("AES-GCM encrypt: {e}")))
    }

    fn aead_decrypt(
        &self,
        key: &SessionKey,
        iv: &Iv,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Primitive("AES-GCM authentication failed".into()))
    }
}

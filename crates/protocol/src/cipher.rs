//! Symmetric session cipher.
//!
//! The session key negotiated during the handshake is a 16-byte AES-128-GCM
//! key. All post-handshake application traffic is encrypted with it; payloads
//! cross the wire as `base64(nonce || ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{ProtocolError, Result};

/// Length of a session key in bytes (AES-128).
pub const SESSION_KEY_LENGTH: usize = 16;

/// Length of the AES-GCM nonce in bytes.
pub const SYMMETRIC_NONCE_LENGTH: usize = 12;

/// The symmetric key protecting a single session.
///
/// Once adopted during the handshake the key is immutable for the remainder
/// of the connection; a new key requires a new session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LENGTH]);

impl SessionKey {
    /// Generates a fresh random session key using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a session key from raw bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Creates a session key from a byte slice, checking the length.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SESSION_KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::InvalidKeyLength {
                    expected: SESSION_KEY_LENGTH,
                    got: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.0
    }

    /// Encrypts a plaintext, producing `base64(nonce || ciphertext)`.
    ///
    /// A random 96-bit nonce is generated per call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes128Gcm::new_from_slice(&self.0)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

        let mut nonce_bytes = [0u8; SYMMETRIC_NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ProtocolError::Encryption("AES-GCM encryption failed".to_string()))?;

        let mut combined = Vec::with_capacity(SYMMETRIC_NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypts a `base64(nonce || ciphertext)` payload.
    ///
    /// Fails with [`ProtocolError::Decryption`] if the payload is truncated,
    /// tampered with, or encrypted under a different key; a wrong key never
    /// yields garbage plaintext.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let data = BASE64.decode(encoded)?;
        if data.len() < SYMMETRIC_NONCE_LENGTH {
            return Err(ProtocolError::Decryption(
                "ciphertext too short".to_string(),
            ));
        }

        let cipher = Aes128Gcm::new_from_slice(&self.0)
            .map_err(|e| ProtocolError::Decryption(e.to_string()))?;

        let nonce = Nonce::from_slice(&data[..SYMMETRIC_NONCE_LENGTH]);
        cipher
            .decrypt(nonce, &data[SYMMETRIC_NONCE_LENGTH..])
            .map_err(|_| ProtocolError::Decryption("AES-GCM tag verification failed".to_string()))
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        // Volatile writes prevent the compiler from optimizing away the zeroization.
        for byte in self.0.iter_mut() {
            unsafe { std::ptr::write_volatile(byte as *mut u8, 0u8) };
        }
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionKey").field(&"[REDACTED]").finish()
    }
}

//! Account identity and key management.
//!
//! Each account holds a single Ed25519 keypair used for signing. The X25519
//! keys needed for public-key encryption are derived from the Ed25519 pair
//! (clamped scalar on the secret side, Montgomery point on the public side),
//! so exactly one 32-byte public key per party crosses the wire.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use crypto_box::{aead::Aead, Nonce, SalsaBox};
use ed25519_dalek::{
    Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH,
    SECRET_KEY_LENGTH, SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{ProtocolError, Result};

/// Length of the ephemeral X25519 public key prefixed to a sealed payload.
pub const EPHEMERAL_KEY_LENGTH: usize = 32;

/// Length of the XSalsa20-Poly1305 nonce in a sealed payload.
pub const SEALED_NONCE_LENGTH: usize = 24;

/// A 64-byte Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Creates a new Signature from raw bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this signature.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    /// Encodes this signature as base64 for the wire.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decodes a signature from its base64 wire form.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64.decode(encoded)?;
        let arr: [u8; SIGNATURE_LENGTH] =
            bytes
                .try_into()
                .map_err(|v: Vec<u8>| ProtocolError::InvalidKeyLength {
                    expected: SIGNATURE_LENGTH,
                    got: v.len(),
                })?;
        Ok(Self(arr))
    }

    fn from_ed25519(sig: Ed25519Signature) -> Self {
        Self(sig.to_bytes())
    }

    fn as_ed25519(&self) -> Ed25519Signature {
        Ed25519Signature::from_bytes(&self.0)
    }
}

/// The local account's identity, including the secret key.
///
/// Holds the Ed25519 signing keypair plus the X25519 secret derived from it.
/// Used for signing outgoing one-shot messages and for opening payloads
/// sealed to this account's public key.
#[derive(Clone)]
pub struct AccountIdentity {
    /// The Ed25519 signing key (secret key).
    signing_key: SigningKey,
    /// The Ed25519 verifying key (public key), derived from signing_key.
    verifying_key: VerifyingKey,
    /// The X25519 secret, derived from the signing key's clamped scalar.
    box_secret: crypto_box::SecretKey,
}

impl AccountIdentity {
    /// Generates a new random account identity.
    ///
    /// Uses the operating system's cryptographically secure random number
    /// generator.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Creates an AccountIdentity from raw secret key bytes.
    ///
    /// The public key and encryption secret are derived from the secret key.
    pub fn from_secret_key_bytes(bytes: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let box_secret = crypto_box::SecretKey::from(signing_key.to_scalar_bytes());
        Self {
            signing_key,
            verifying_key,
            box_secret,
        }
    }

    /// Returns the secret key bytes.
    ///
    /// **Security Warning**: The secret key should be kept confidential.
    /// Only use this method for secure storage or serialization.
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }

    /// Returns the public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Returns this account's public half as a [`PeerKey`].
    pub fn public_key(&self) -> PeerKey {
        PeerKey::from_verifying_key(self.verifying_key)
    }

    /// Signs a message with this account's secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::from_ed25519(self.signing_key.sign(message))
    }

    /// Opens a payload sealed to this account's public key.
    ///
    /// Expects the wire form produced by [`PeerKey::seal_for`]:
    /// `base64(ephemeral_pk || nonce || ciphertext)`.
    pub fn open_sealed(&self, sealed: &str) -> Result<Vec<u8>> {
        let data = BASE64.decode(sealed)?;
        if data.len() < EPHEMERAL_KEY_LENGTH + SEALED_NONCE_LENGTH {
            return Err(ProtocolError::Decryption(
                "sealed payload too short".to_string(),
            ));
        }

        let mut eph_bytes = [0u8; EPHEMERAL_KEY_LENGTH];
        eph_bytes.copy_from_slice(&data[..EPHEMERAL_KEY_LENGTH]);
        let ephemeral_pk = crypto_box::PublicKey::from(eph_bytes);

        let nonce_end = EPHEMERAL_KEY_LENGTH + SEALED_NONCE_LENGTH;
        let nonce = Nonce::from_slice(&data[EPHEMERAL_KEY_LENGTH..nonce_end]);
        let ciphertext = &data[nonce_end..];

        SalsaBox::new(&ephemeral_pk, &self.box_secret)
            .decrypt(nonce, ciphertext)
            .map_err(|_| ProtocolError::Decryption("sealed payload rejected".to_string()))
    }

    /// Generates a human-readable fingerprint for this account's public key.
    pub fn fingerprint(&self) -> String {
        self.public_key().fingerprint()
    }
}

impl std::fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("public_key", &self.public_key().to_base64())
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// The public half of a peer's identity.
///
/// Carries the Ed25519 verifying key and the X25519 public key derived from
/// it. Suitable for verifying the peer's signatures and for sealing payloads
/// addressed to the peer.
#[derive(Clone)]
pub struct PeerKey {
    /// The Ed25519 verifying key (public key).
    verifying_key: VerifyingKey,
    /// The X25519 public key, derived via the birational map.
    box_public: crypto_box::PublicKey,
}

impl PeerKey {
    /// Creates a PeerKey from raw public key bytes.
    pub fn from_public_key_bytes(bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::from_verifying_key(verifying_key))
    }

    /// Decodes a PeerKey from its base64 wire form.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64.decode(encoded)?;
        let arr: [u8; PUBLIC_KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|v: Vec<u8>| ProtocolError::InvalidKeyLength {
                    expected: PUBLIC_KEY_LENGTH,
                    got: v.len(),
                })?;
        Self::from_public_key_bytes(&arr)
    }

    fn from_verifying_key(verifying_key: VerifyingKey) -> Self {
        let box_public = crypto_box::PublicKey::from(verifying_key.to_montgomery().to_bytes());
        Self {
            verifying_key,
            box_public,
        }
    }

    /// Returns the public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Encodes this key as base64 for the wire.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.verifying_key.to_bytes())
    }

    /// Verifies a signature against a message using this peer's public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.verifying_key
            .verify(message, &signature.as_ed25519())
            .map_err(ProtocolError::from)
    }

    /// Seals a payload so that only the holder of this key's secret can open it.
    ///
    /// A fresh ephemeral X25519 keypair is generated per call and its public
    /// key is prefixed to the output, so no sender identity is revealed.
    /// Wire format: `base64(ephemeral_pk || nonce || ciphertext)`.
    pub fn seal_for(&self, plaintext: &[u8]) -> Result<String> {
        let mut eph_secret_bytes = [0u8; EPHEMERAL_KEY_LENGTH];
        OsRng.fill_bytes(&mut eph_secret_bytes);
        let eph_secret = crypto_box::SecretKey::from(eph_secret_bytes);
        let eph_public = eph_secret.public_key();

        let mut nonce_bytes = [0u8; SEALED_NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = SalsaBox::new(&self.box_public, &eph_secret)
            .encrypt(nonce, plaintext)
            .map_err(|_| ProtocolError::Encryption("sealing failed".to_string()))?;

        let mut combined =
            Vec::with_capacity(EPHEMERAL_KEY_LENGTH + SEALED_NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(eph_public.as_bytes());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Generates a human-readable fingerprint of this key.
    ///
    /// Formatted as groups of 4 hex characters separated by colons, derived
    /// by hashing the public key with SHA-256 and taking the first 8 bytes.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(self.verifying_key.as_bytes());
        hash[..8]
            .chunks(2)
            .map(|chunk| format!("{:02x}{:02x}", chunk[0], chunk[1]))
            .collect::<Vec<_>>()
            .join(":")
    }
}

// The X25519 half is derived deterministically from the Ed25519 key, so
// equality on the verifying key alone is equality on the whole.
impl PartialEq for PeerKey {
    fn eq(&self, other: &Self) -> bool {
        self.verifying_key == other.verifying_key
    }
}

impl Eq for PeerKey {}

impl std::fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerKey")
            .field("public_key", &self.to_base64())
            .finish()
    }
}

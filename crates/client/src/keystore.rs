//! Key store collaborator.
//!
//! The session core never persists key material itself; it asks a
//! [`KeyStore`] for the keys bound to an account identifier. How keys reach
//! the store (provisioning, OS keychain, enrollment) is the embedder's
//! concern. An in-memory implementation is provided for library consumers
//! and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use protocol::{AccountIdentity, PeerKey};
use thiserror::Error;

/// Key store failures.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No key material is registered for the account.
    #[error("no key registered for account: {0}")]
    UnknownAccount(String),
}

/// Provides key material for accounts, addressed by account identifier.
pub trait KeyStore: Send + Sync {
    /// Returns the full identity (including the secret key) for an account
    /// this client acts as.
    fn retrieve_private_key(&self, account: &str) -> Result<AccountIdentity, KeyStoreError>;

    /// Returns the public key registered for an account, local or remote.
    fn retrieve_public_key(&self, account: &str) -> Result<PeerKey, KeyStoreError>;
}

/// A thread-safe in-memory key store.
#[derive(Default)]
pub struct MemoryKeyStore {
    identities: RwLock<HashMap<String, AccountIdentity>>,
    peers: RwLock<HashMap<String, PeerKey>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a full identity under an account identifier.
    pub fn insert_identity(&self, account: impl Into<String>, identity: AccountIdentity) {
        self.identities
            .write()
            .expect("key store lock poisoned")
            .insert(account.into(), identity);
    }

    /// Registers a public-only key under an account identifier.
    pub fn insert_peer(&self, account: impl Into<String>, key: PeerKey) {
        self.peers
            .write()
            .expect("key store lock poisoned")
            .insert(account.into(), key);
    }
}

impl KeyStore for MemoryKeyStore {
    fn retrieve_private_key(&self, account: &str) -> Result<AccountIdentity, KeyStoreError> {
        self.identities
            .read()
            .expect("key store lock poisoned")
            .get(account)
            .cloned()
            .ok_or_else(|| KeyStoreError::UnknownAccount(account.to_string()))
    }

    fn retrieve_public_key(&self, account: &str) -> Result<PeerKey, KeyStoreError> {
        if let Some(identity) = self
            .identities
            .read()
            .expect("key store lock poisoned")
            .get(account)
        {
            return Ok(identity.public_key());
        }
        self.peers
            .read()
            .expect("key store lock poisoned")
            .get(account)
            .cloned()
            .ok_or_else(|| KeyStoreError::UnknownAccount(account.to_string()))
    }
}

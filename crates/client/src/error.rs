//! Error types for the client crate.

use protocol::ProtocolError;
use thiserror::Error;

use crate::keystore::KeyStoreError;

/// Client error type covering all session failure modes.
///
/// Failures of a single operation (`Remote`, `Timeout`, `Decryption`) never
/// abort the session; handshake and connection failures are fatal to it.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A crypto or codec failure from the protocol layer.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The handshake failed. Always fatal to the session.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An application operation was attempted before the session key exists.
    #[error("session not ready: {0}")]
    NotReady(String),

    /// A symmetric record reached a waiting caller without decrypting.
    #[error("response could not be decrypted: {0}")]
    Decryption(String),

    /// The server answered with a non-success status.
    #[error("server rejected the request: {0}")]
    Remote(String),

    /// Credentials were accepted but the chained profile lookup failed,
    /// leaving the session keyed with the login unresolved.
    #[error("login unresolved: {0}")]
    LoginUnresolved(String),

    /// A bounded wait expired.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The peer closed the connection or I/O failed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The key store could not provide the requested key.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

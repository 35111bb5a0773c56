//! Handshake controller.
//!
//! Drives the session from unauthenticated to keyed:
//!
//! ```text
//! Init ──begin──> AwaitingServerKey ──SERVER_PUBLIC_KEY──> AwaitingToken
//!                                                              │
//!                                    TOKEN_ISSUED (verified)   │
//!       Ready <───────────────────────────────────────────────┤
//!       Failed <── any malformed, unexpected, or unverified ──┘
//! ```
//!
//! The server's authenticity rests on verifying its signature over the
//! session key material with a public key announced on the same channel.
//! This is trust on first use, not a certificate chain; the model is kept
//! deliberately, since changing it changes the threat model.
//!
//! Any failure is fatal: the controller parks in `Failed`, never sets a
//! session key, and the session is torn down.

use std::sync::{Arc, OnceLock};

use protocol::messages::TokenRequestData;
use protocol::{AccountIdentity, ClientMessage, PeerKey, ServerMessage, SessionKey, Signature};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{ClientError, Result};

/// Phase of the handshake state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Session opened, token request not yet sent.
    Init,
    /// Token request sent; waiting for the server's key announcement.
    AwaitingServerKey,
    /// Server key stored; waiting for the signed session token.
    AwaitingToken,
    /// Terminal: session key adopted, application traffic may flow.
    Ready,
    /// Terminal: handshake failed, no key was set.
    Failed,
}

/// The handshake state machine. Lives inside the receive loop task; phase
/// changes are published on a watch channel for waiting callers.
pub(crate) struct HandshakeController {
    identity: AccountIdentity,
    account: String,
    peer_key_slot: Arc<OnceLock<PeerKey>>,
    session_key_slot: Arc<OnceLock<SessionKey>>,
    phase_tx: watch::Sender<HandshakePhase>,
}

impl HandshakeController {
    pub fn new(
        identity: AccountIdentity,
        account: String,
        peer_key_slot: Arc<OnceLock<PeerKey>>,
        session_key_slot: Arc<OnceLock<SessionKey>>,
        phase_tx: watch::Sender<HandshakePhase>,
    ) -> Self {
        Self {
            identity,
            account,
            peer_key_slot,
            session_key_slot,
            phase_tx,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> HandshakePhase {
        *self.phase_tx.borrow()
    }

    /// Opens the handshake: produces the plaintext token request and moves
    /// to `AwaitingServerKey`.
    pub fn begin(&mut self) -> ClientMessage {
        debug_assert_eq!(self.phase(), HandshakePhase::Init);
        self.set_phase(HandshakePhase::AwaitingServerKey);
        ClientMessage::TokenRequest {
            data: TokenRequestData {
                email: self.account.clone(),
            },
        }
    }

    /// Consumes one handshake-phase message.
    ///
    /// Any message that does not fit the current phase, or whose key
    /// material fails to decrypt or verify, parks the controller in
    /// `Failed` and returns a fatal [`ClientError::Handshake`].
    pub fn handle(&mut self, message: ServerMessage) -> Result<()> {
        match (self.phase(), message) {
            (HandshakePhase::AwaitingServerKey, ServerMessage::ServerPublicKey { data }) => {
                match PeerKey::from_base64(&data) {
                    Ok(key) => {
                        info!(
                            fingerprint = %key.fingerprint(),
                            "server key received (trust on first use)"
                        );
                        let _ = self.peer_key_slot.set(key);
                        self.set_phase(HandshakePhase::AwaitingToken);
                        Ok(())
                    }
                    Err(e) => Err(self.fail(format!("malformed server key announcement: {e}"))),
                }
            }
            (HandshakePhase::AwaitingToken, ServerMessage::TokenIssued { token, signature }) => {
                self.adopt_token(&token, &signature)
            }
            (phase, message) => Err(self.fail(format!(
                "unexpected {} in phase {:?}",
                message.wire_type(),
                phase
            ))),
        }
    }

    /// Parks the controller in `Failed` unless it already reached a terminal
    /// phase. Called when the session dies mid-handshake so that waiters on
    /// the phase channel wake up.
    pub fn abort(&mut self) {
        if !matches!(self.phase(), HandshakePhase::Ready | HandshakePhase::Failed) {
            self.set_phase(HandshakePhase::Failed);
        }
    }

    fn adopt_token(&mut self, token: &str, signature: &str) -> Result<()> {
        let Some(peer_key) = self.peer_key_slot.get().cloned() else {
            return Err(self.fail("token issued before server key".to_string()));
        };

        let key_bytes = match self.identity.open_sealed(token) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(format!("token decryption failed: {e}"))),
        };

        let signature = match Signature::from_base64(signature) {
            Ok(sig) => sig,
            Err(e) => return Err(self.fail(format!("malformed token signature: {e}"))),
        };

        if let Err(e) = peer_key.verify(&key_bytes, &signature) {
            return Err(self.fail(format!("token signature rejected: {e}")));
        }

        let session_key = match SessionKey::try_from_slice(&key_bytes) {
            Ok(key) => key,
            Err(e) => return Err(self.fail(format!("token is not a session key: {e}"))),
        };

        let _ = self.session_key_slot.set(session_key);
        self.set_phase(HandshakePhase::Ready);
        info!("handshake complete, session keyed");
        Ok(())
    }

    fn fail(&mut self, reason: String) -> ClientError {
        warn!(%reason, "handshake failed");
        self.set_phase(HandshakePhase::Failed);
        ClientError::Handshake(reason)
    }

    fn set_phase(&self, phase: HandshakePhase) {
        // Send only fails when every receiver is gone, which cannot strand a
        // waiter; ignore it.
        let _ = self.phase_tx.send(phase);
    }
}

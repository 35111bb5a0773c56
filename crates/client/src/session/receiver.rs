//! The receive loop.
//!
//! One long-lived task per session drains the transport for the life of the
//! connection. Records are decoded at the envelope boundary and routed:
//! handshake messages to the controller, the termination message into
//! peer-initiated shutdown, everything else to the correlator.
//!
//! End of stream and read errors both mean the peer is gone: the loop marks
//! the session not running, releases the transport, and broadcasts a
//! peer-disconnect event. A fatal handshake failure tears the session down
//! the same way but without the event, since the peer is still there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use protocol::{Envelope, ProtocolError, ServerMessage, SessionKey};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::correlator::Delivery;
use super::handshake::HandshakeController;
use super::SessionEvent;
use crate::transport::{LineReader, Transport};

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct ReceiveLoop {
    pub reader: LineReader,
    pub transport: Arc<Transport>,
    pub controller: HandshakeController,
    pub deliveries: mpsc::UnboundedSender<Delivery>,
    pub session_key: Arc<OnceLock<SessionKey>>,
    pub events: broadcast::Sender<SessionEvent>,
    pub running: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

impl ReceiveLoop {
    /// Runs until the session ends, whichever side ends it.
    pub async fn run(mut self) {
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("receive loop cancelled");
                    break;
                }
                read = self.reader.read_line() => read,
            };

            match read {
                Ok(Some(line)) => {
                    if matches!(self.process_line(&line).await, Flow::Stop) {
                        break;
                    }
                }
                Ok(None) => {
                    info!("server closed the connection");
                    self.peer_shutdown().await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    self.peer_shutdown().await;
                    break;
                }
            }
        }
        debug!("receive loop terminated");
    }

    async fn process_line(&mut self, line: &str) -> Flow {
        let envelope = match protocol::decode(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping undecodable record");
                return Flow::Continue;
            }
        };

        let message = match envelope {
            Envelope::Plain(message) => message,
            Envelope::Encrypted { data } => match self.open_encrypted(&data) {
                Some(message) => message,
                None => return Flow::Continue,
            },
        };

        if message.is_handshake() {
            if let Err(e) = self.controller.handle(message) {
                error!(error = %e, "fatal handshake failure, closing session");
                self.teardown().await;
                return Flow::Stop;
            }
            return Flow::Continue;
        }

        if matches!(message, ServerMessage::Stop) {
            info!("server requested session termination");
            self.peer_shutdown().await;
            return Flow::Stop;
        }

        debug!(message = message.wire_type(), "delivering response");
        self.deliver(Delivery::Message(message));
        Flow::Continue
    }

    /// Unwraps a symmetric record. An undecryptable payload is delivered as
    /// a marker so a blocked caller escalates instead of waiting forever; a
    /// payload that decrypts but does not decode is dropped.
    fn open_encrypted(&self, data: &str) -> Option<ServerMessage> {
        let Some(key) = self.session_key.get() else {
            warn!("symmetric record received before session key exists");
            self.deliver(Delivery::Undecryptable);
            return None;
        };

        match protocol::open_symmetric(data, key) {
            Ok(message) => Some(message),
            Err(ProtocolError::Decryption(e)) => {
                warn!(error = %e, "symmetric record failed to decrypt");
                self.deliver(Delivery::Undecryptable);
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable symmetric record");
                None
            }
        }
    }

    fn deliver(&self, delivery: Delivery) {
        if self.deliveries.send(delivery).is_err() {
            // Correlator already dropped; the session is going away.
            debug!("no correlator to deliver to");
        }
    }

    /// Peer-initiated shutdown: the server terminated the session or the
    /// connection died. Observers are notified.
    async fn peer_shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.transport.close().await;
        self.controller.abort();
        let _ = self.events.send(SessionEvent::PeerDisconnected);
    }

    /// Local teardown after a fatal handshake failure. No peer-disconnect
    /// event: the peer did not go anywhere, we refused the key material.
    async fn teardown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.transport.close().await;
    }
}

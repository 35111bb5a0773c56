//! Response correlation between the receive loop and blocked callers.
//!
//! The receive loop pushes every decoded response into an unbounded channel;
//! a caller awaiting a response takes the receiver under an async mutex and
//! drains messages until one matches its expected kind, discarding (and
//! logging) everything else.
//!
//! Correlation is keyed by response type only. Two callers concurrently
//! awaiting the *same* response kind race for whichever matching message
//! arrives first, so the first caller may consume the second caller's
//! response. This granularity is a deliberate property of the protocol,
//! which has no per-request identifiers; callers must not issue two
//! outstanding requests with the same expected response kind.

use std::time::Duration;

use protocol::{ResponseKind, ServerMessage};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{ClientError, Result};

/// One item handed from the receive loop to a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A decoded response message.
    Message(ServerMessage),
    /// A symmetric record that could not be decrypted. A caller receiving
    /// this escalates it instead of waiting for a response that will never
    /// decode.
    Undecryptable,
}

/// Caller-side hand-off point for responses read by the receive loop.
pub struct Correlator {
    receiver: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

/// Creates the delivery channel and its correlator.
pub fn channel() -> (mpsc::UnboundedSender<Delivery>, Correlator) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        sender,
        Correlator {
            receiver: Mutex::new(receiver),
        },
    )
}

impl Correlator {
    /// Waits for the next message of the expected kind.
    ///
    /// Messages of other kinds that arrive earlier are logged and discarded.
    /// The wait is bounded: expiry yields [`ClientError::Timeout`]. If the
    /// receive loop shuts down while the caller waits, the closed channel
    /// surfaces as [`ClientError::ConnectionLost`], and an undecryptable
    /// record surfaces as [`ClientError::Decryption`].
    pub async fn await_response(
        &self,
        expected: ResponseKind,
        timeout: Duration,
    ) -> Result<ServerMessage> {
        tokio::time::timeout(timeout, self.recv_matching(expected))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!("no {expected:?} response within {timeout:?}"))
            })?
    }

    async fn recv_matching(&self, expected: ResponseKind) -> Result<ServerMessage> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                None => {
                    return Err(ClientError::ConnectionLost(
                        "session closed while awaiting response".to_string(),
                    ))
                }
                Some(Delivery::Undecryptable) => {
                    return Err(ClientError::Decryption(
                        "received a symmetric record that does not decrypt under the session key"
                            .to_string(),
                    ))
                }
                Some(Delivery::Message(message)) => {
                    if message.response_kind() == Some(expected) {
                        return Ok(message);
                    }
                    debug!(
                        discarded = message.wire_type(),
                        expected = ?expected,
                        "discarding interleaved message of different type"
                    );
                }
            }
        }
    }
}

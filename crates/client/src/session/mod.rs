//! The session facade.
//!
//! A [`Session`] owns one connection to the records server: the transport,
//! the session key once negotiated, the receive loop draining the socket,
//! and the correlator matching responses to waiting callers. Callers invoke
//! the operations below concurrently with the receive loop; every blocking
//! wait is bounded by the configured timeouts.
//!
//! Shutdown takes one of two paths. Caller-initiated ([`Session::close`])
//! sends an encrypted termination message and releases the transport
//! quietly. Peer-initiated (the server's termination message, end of
//! stream, or an I/O error) releases the transport and broadcasts
//! [`SessionEvent::PeerDisconnected`] to subscribers. Both paths release
//! resources idempotently.

mod correlator;
pub mod handshake;
mod receiver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use protocol::messages::{
    ActivationData, AnnotationData, LoginData, PasswordChangeData, PatientsQuery, PatientSummary,
    ProfileQuery, Profile, RecordingQuery, RecordingSummary, RecordingsQuery,
};
use protocol::{
    AccountIdentity, ClientMessage, PeerKey, ProtocolError, ResponseKind, ServerMessage,
    SessionKey, Status,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::keystore::KeyStore;
use crate::transport::Transport;

use correlator::Correlator;
pub use handshake::HandshakePhase;
use handshake::HandshakeController;
use receiver::ReceiveLoop;

/// Events broadcast to session observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server terminated the session or the connection died.
    PeerDisconnected,
}

/// The outcome of a successful authentication: the identity granted by the
/// server plus the profile resolved in the chained lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Authenticated {
    /// Server-side account identifier.
    pub user_id: i64,
    /// Granted role.
    pub role: String,
    /// The account identifier that logged in.
    pub email: String,
    /// The practitioner profile tied to the identity.
    pub profile: Profile,
}

/// A fetched recording: structured metadata plus the opaque compressed blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Structured metadata for the recording.
    pub metadata: RecordingSummary,
    /// Original archive filename.
    pub filename: String,
    /// The decoded (still compressed) blob.
    pub bytes: Vec<u8>,
}

/// One authenticated, encrypted session with the records server.
pub struct Session {
    transport: Arc<Transport>,
    correlator: Correlator,
    session_key: Arc<OnceLock<SessionKey>>,
    peer_key: Arc<OnceLock<PeerKey>>,
    phase_rx: watch::Receiver<HandshakePhase>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    identity: AccountIdentity,
    account: String,
    user_id: StdMutex<Option<i64>>,
    keystore: Arc<dyn KeyStore>,
    server_identity: String,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl Session {
    /// Connects to the server and opens the handshake.
    ///
    /// The plaintext token request is sent immediately and the receive loop
    /// is spawned; the session key arrives asynchronously. Use
    /// [`await_handshake`](Self::await_handshake) or
    /// [`authenticate`](Self::authenticate) to wait for the keyed state.
    pub async fn open(
        config: &Config,
        keystore: Arc<dyn KeyStore>,
        account: &str,
    ) -> Result<Self> {
        let identity = keystore.retrieve_private_key(account)?;
        let (transport, reader) = Transport::connect(&config.server.host, config.server.port).await?;

        let (delivery_tx, correlator) = correlator::channel();
        let (phase_tx, phase_rx) = watch::channel(HandshakePhase::Init);
        let (events, _) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));
        let session_key: Arc<OnceLock<SessionKey>> = Arc::new(OnceLock::new());
        let peer_key: Arc<OnceLock<PeerKey>> = Arc::new(OnceLock::new());

        let mut controller = HandshakeController::new(
            identity.clone(),
            account.to_string(),
            Arc::clone(&peer_key),
            Arc::clone(&session_key),
            phase_tx,
        );
        let token_request = controller.begin();
        transport
            .send_line(&protocol::encode_plain(&token_request)?)
            .await?;
        info!(account, "session opened, token requested");

        tokio::spawn(
            ReceiveLoop {
                reader,
                transport: Arc::clone(&transport),
                controller,
                deliveries: delivery_tx,
                session_key: Arc::clone(&session_key),
                events: events.clone(),
                running: Arc::clone(&running),
                cancel: cancel.clone(),
            }
            .run(),
        );

        Ok(Self {
            transport,
            correlator,
            session_key,
            peer_key,
            phase_rx,
            events,
            cancel,
            running,
            identity,
            account: account.to_string(),
            user_id: StdMutex::new(None),
            keystore,
            server_identity: config.server.identity.clone(),
            handshake_timeout: config.timeouts.handshake(),
            request_timeout: config.timeouts.request(),
        })
    }

    /// Waits until the handshake reaches `Ready`, or fails.
    pub async fn await_handshake(&self) -> Result<()> {
        let mut phase_rx = self.phase_rx.clone();
        let wait = async move {
            loop {
                match *phase_rx.borrow_and_update() {
                    HandshakePhase::Ready => return Ok(()),
                    HandshakePhase::Failed => {
                        return Err(ClientError::Handshake(
                            "handshake did not complete".to_string(),
                        ))
                    }
                    _ => {}
                }
                if phase_rx.changed().await.is_err() {
                    return Err(ClientError::ConnectionLost(
                        "session ended during handshake".to_string(),
                    ));
                }
            }
        };

        tokio::time::timeout(self.handshake_timeout, wait)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "handshake not complete within {:?}",
                    self.handshake_timeout
                ))
            })?
    }

    /// Returns the current handshake phase.
    pub fn phase(&self) -> HandshakePhase {
        *self.phase_rx.borrow()
    }

    /// Returns false once either shutdown path has run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribes to session events (peer disconnection).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Performs the full login: waits for the handshake, checks credentials,
    /// then resolves the practitioner profile chained onto the first
    /// response. Both steps must succeed; a failure of the chained lookup
    /// surfaces as [`ClientError::LoginUnresolved`] and leaves the session
    /// keyed.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Authenticated> {
        self.await_handshake().await?;

        let login = ClientMessage::Login {
            data: LoginData {
                email: email.to_string(),
                password: password.to_string(),
                access_permits: "Doctor".to_string(),
            },
        };
        let response = match self.request(&login, ResponseKind::Login).await? {
            ServerMessage::Login(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "login")?;

        let account = response.data.ok_or_else(|| {
            ProtocolError::Deserialization("LOGIN_RESPONSE missing account data".to_string())
        })?;
        if account.role != "Doctor" {
            return Err(ClientError::Remote(format!(
                "access denied for role {}",
                account.role
            )));
        }
        *self.user_id.lock().expect("user id lock poisoned") = Some(account.id);

        let profile_request = ClientMessage::ProfileByEmail {
            data: ProfileQuery {
                user_id: account.id,
                email: email.to_string(),
            },
        };
        let profile_response = match self
            .request(&profile_request, ResponseKind::Profile)
            .await?
        {
            ServerMessage::Profile(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        if profile_response.status != Status::Success {
            return Err(ClientError::LoginUnresolved(
                profile_response
                    .message
                    .unwrap_or_else(|| "profile lookup failed".to_string()),
            ));
        }
        let profile = profile_response.doctor.ok_or_else(|| {
            ClientError::LoginUnresolved("profile response carried no profile".to_string())
        })?;

        info!(user_id = account.id, role = %account.role, "authenticated");
        Ok(Authenticated {
            user_id: account.id,
            role: account.role,
            email: email.to_string(),
            profile,
        })
    }

    /// Lists the patients assigned to a practitioner.
    pub async fn patients_of(&self, doctor_id: i64) -> Result<Vec<PatientSummary>> {
        let message = ClientMessage::PatientsFromDoctor {
            data: PatientsQuery {
                doctor_id,
                user_id: self.current_user(),
            },
        };
        let response = match self.request(&message, ResponseKind::Patients).await? {
            ServerMessage::Patients(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "patient query")?;
        response.patients.ok_or_else(|| {
            ClientError::Protocol(ProtocolError::Deserialization(
                "patient query response missing patients".to_string(),
            ))
        })
    }

    /// Lists the recordings available for a patient.
    pub async fn recordings_of(&self, patient_id: i64) -> Result<Vec<RecordingSummary>> {
        let message = ClientMessage::PatientRecordings {
            data: RecordingsQuery {
                patient_id,
                user_id: self.current_user(),
            },
        };
        let response = match self.request(&message, ResponseKind::Recordings).await? {
            ServerMessage::Recordings(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "recording query")?;
        response.signals.ok_or_else(|| {
            ClientError::Protocol(ProtocolError::Deserialization(
                "recording query response missing signals".to_string(),
            ))
        })
    }

    /// Fetches a single recording, metadata and blob.
    pub async fn fetch_recording(&self, signal_id: i64) -> Result<Recording> {
        let message = ClientMessage::RecordingById {
            data: RecordingQuery {
                signal_id,
                user_id: self.current_user(),
            },
        };
        let response = match self.request(&message, ResponseKind::Recording).await? {
            ServerMessage::Recording(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "recording fetch")?;

        let missing = |field: &str| {
            ClientError::Protocol(ProtocolError::Deserialization(format!(
                "recording response missing {field}"
            )))
        };
        let filename = response.filename.ok_or_else(|| missing("filename"))?;
        let encoded = response.data_bytes.ok_or_else(|| missing("dataBytes"))?;
        let metadata = response.metadata.ok_or_else(|| missing("metadata"))?;
        let bytes = BASE64.decode(encoded).map_err(ProtocolError::from)?;

        Ok(Recording {
            metadata,
            filename,
            bytes,
        })
    }

    /// Stores free-text annotations against a recording.
    pub async fn save_annotation(
        &self,
        patient_id: i64,
        signal_id: i64,
        comments: &str,
    ) -> Result<()> {
        let message = ClientMessage::SaveAnnotation {
            data: AnnotationData {
                patient_id,
                signal_id,
                comments: comments.to_string(),
                user_id: self.current_user(),
            },
        };
        let response = match self.request(&message, ResponseKind::AnnotationSaved).await? {
            ServerMessage::AnnotationSaved(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "annotation save")
    }

    /// Activates an account with a one-time password.
    ///
    /// A plaintext one-shot exchange: it works before the session key exists
    /// and stays plaintext afterwards. Returns the one-time activation token.
    pub async fn activate_account(
        &self,
        email: &str,
        one_time_password: &str,
    ) -> Result<String> {
        let message = ClientMessage::Activate {
            data: ActivationData {
                email: email.to_string(),
                one_time_password: one_time_password.to_string(),
            },
        };
        self.transport
            .send_line(&protocol::encode_plain(&message)?)
            .await?;

        let response = match self
            .correlator
            .await_response(ResponseKind::Activation, self.request_timeout)
            .await?
        {
            ServerMessage::Activation(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "activation")?;
        response.token.ok_or_else(|| {
            ClientError::Protocol(ProtocolError::Deserialization(
                "activation response missing token".to_string(),
            ))
        })
    }

    /// Replaces the account password.
    ///
    /// Sent as an asymmetric-signed one-shot addressed to the server's
    /// public key, independent of the symmetric session: the key announced
    /// during the handshake is used when available, otherwise the key store
    /// must hold the server's key.
    pub async fn change_password(&self, email: &str, new_password: &str) -> Result<()> {
        let recipient = match self.peer_key.get() {
            Some(key) => key.clone(),
            None => self.keystore.retrieve_public_key(&self.server_identity)?,
        };

        let message = ClientMessage::ChangePassword {
            data: PasswordChangeData {
                email: email.to_string(),
                new_password: new_password.to_string(),
            },
        };
        let line = protocol::encode_sealed(&message, &recipient, &self.identity, &self.account)?;
        self.transport.send_line(&line).await?;

        let response = match self
            .correlator
            .await_response(ResponseKind::PasswordChanged, self.request_timeout)
            .await?
        {
            ServerMessage::PasswordChanged(response) => response,
            other => return Err(unexpected_response(&other)),
        };
        ensure_success(response.status, response.message, "password change")
    }

    /// Caller-initiated shutdown.
    ///
    /// If the transport is still open and the session is keyed, one
    /// encrypted termination message is sent; then the receive loop is
    /// cancelled and the transport released. No event is broadcast.
    /// Idempotent, also after a peer-initiated shutdown already ran.
    pub async fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if !self.transport.is_closed() {
            if let Some(key) = self.session_key.get() {
                match protocol::encode_symmetric(&ClientMessage::Stop, key) {
                    Ok(line) => {
                        if let Err(e) = self.transport.send_line(&line).await {
                            debug!(error = %e, "could not send termination message");
                        }
                    }
                    Err(e) => debug!(error = %e, "could not encode termination message"),
                }
            } else {
                debug!("closing before handshake completed, no termination message sent");
            }
        }

        self.cancel.cancel();
        self.transport.close().await;
        info!("session closed");
    }

    async fn request(
        &self,
        message: &ClientMessage,
        expected: ResponseKind,
    ) -> Result<ServerMessage> {
        self.send_encrypted(message).await?;
        self.correlator
            .await_response(expected, self.request_timeout)
            .await
    }

    async fn send_encrypted(&self, message: &ClientMessage) -> Result<()> {
        let Some(key) = self.session_key.get() else {
            return Err(ClientError::NotReady(format!(
                "cannot send {} before the handshake completes",
                message.wire_type()
            )));
        };
        let line = protocol::encode_symmetric(message, key)?;
        self.transport.send_line(&line).await
    }

    fn current_user(&self) -> Option<i64> {
        *self.user_id.lock().expect("user id lock poisoned")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stops the receive loop even when close() was never called.
        self.cancel.cancel();
    }
}

fn ensure_success(status: Status, message: Option<String>, operation: &str) -> Result<()> {
    match status {
        Status::Success => Ok(()),
        _ => Err(ClientError::Remote(message.unwrap_or_else(|| {
            format!("{operation} failed with no reason given")
        }))),
    }
}

fn unexpected_response(message: &ServerMessage) -> ClientError {
    ClientError::Protocol(ProtocolError::Deserialization(format!(
        "unexpected response type {}",
        message.wire_type()
    )))
}

//! End-to-end session tests against an in-process mock server.
//!
//! Each test binds a local TCP listener and scripts the server side of the
//! conversation, exercising the real handshake, receive loop, correlation,
//! and shutdown paths.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use client::{ClientError, Config, HandshakePhase, MemoryKeyStore, Session, SessionEvent};
use protocol::messages::{
    Ack, AccountData, ActivationResponse, LoginResponse, PatientsResponse, PatientSummary,
    Profile, ProfileResponse, Status,
};
use protocol::{AccountIdentity, PeerKey, ServerMessage, SessionKey, Signature};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

const ACCOUNT: &str = "doc@example.com";

/// The server side of one scripted connection.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await.unwrap();
        if bytes_read == 0 {
            None
        } else {
            Some(line.trim_end().to_string())
        }
    }

    async fn read_json(&mut self) -> Value {
        let line = self.read_line().await.expect("peer: unexpected EOF");
        serde_json::from_str(&line).unwrap()
    }

    /// Reads one symmetric record and returns the decrypted inner message.
    async fn read_encrypted(&mut self, key: &SessionKey) -> Value {
        let outer = self.read_json().await;
        assert_eq!(outer["type"], "ENCRYPTED", "expected a symmetric record");
        let plaintext = key.decrypt(outer["data"].as_str().unwrap()).unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send_message(&mut self, message: &ServerMessage) {
        let line = serde_json::to_string(message).unwrap();
        self.send_raw(&line).await;
    }

    async fn send_encrypted(&mut self, message: &ServerMessage, key: &SessionKey) {
        let inner = serde_json::to_vec(message).unwrap();
        let record = json!({ "type": "ENCRYPTED", "data": key.encrypt(&inner).unwrap() });
        self.send_raw(&record.to_string()).await;
    }

    /// Plays the server side of the handshake: consumes the token request,
    /// announces the server key, issues the signed session token.
    async fn run_handshake(
        &mut self,
        server: &AccountIdentity,
        client_public: &PeerKey,
        key: &SessionKey,
    ) {
        let request = self.read_json().await;
        assert_eq!(request["type"], "TOKEN_REQUEST");
        assert_eq!(request["data"]["email"], ACCOUNT);

        self.send_message(&ServerMessage::ServerPublicKey {
            data: server.public_key().to_base64(),
        })
        .await;
        self.send_message(&ServerMessage::TokenIssued {
            token: client_public.seal_for(key.as_bytes()).unwrap(),
            signature: server.sign(key.as_bytes()).to_base64(),
        })
        .await;
    }

    /// Drains the connection until the client goes away.
    async fn hold_open(mut self) {
        while self.read_line().await.is_some() {}
    }
}

struct TestBed {
    config: Config,
    keystore: Arc<MemoryKeyStore>,
    server: AccountIdentity,
    client_public: PeerKey,
    key: SessionKey,
}

/// Binds a listener and builds a test bed pointed at it.
async fn testbed() -> (TestBed, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config.timeouts.handshake_secs = 2;
    config.timeouts.request_secs = 2;

    let identity = AccountIdentity::generate();
    let client_public = identity.public_key();
    let keystore = Arc::new(MemoryKeyStore::new());
    keystore.insert_identity(ACCOUNT, identity);

    let bed = TestBed {
        config,
        keystore,
        server: AccountIdentity::generate(),
        client_public,
        key: SessionKey::generate(),
    };
    (bed, listener)
}

impl TestBed {
    async fn open_session(&self) -> Session {
        Session::open(&self.config, self.keystore.clone(), ACCOUNT)
            .await
            .unwrap()
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within one second");
}

fn success_login(id: i64, role: &str) -> ServerMessage {
    ServerMessage::Login(LoginResponse {
        status: Status::Success,
        message: None,
        data: Some(AccountData {
            id,
            role: role.to_string(),
        }),
    })
}

fn success_profile(id: i64) -> ServerMessage {
    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::from("John"));
    fields.insert("department".to_string(), Value::from("Neuro"));
    ServerMessage::Profile(ProfileResponse {
        status: Status::Success,
        message: None,
        doctor: Some(Profile { id, fields }),
    })
}

#[tokio::test]
async fn test_handshake_adopts_all_zero_signed_token() {
    let (mut tb, listener) = testbed().await;
    tb.key = SessionKey::from_bytes([0u8; 16]);

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;
        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    session.await_handshake().await.unwrap();

    assert_eq!(session.phase(), HandshakePhase::Ready);
    assert!(session.is_running());

    session.close().await;
}

#[tokio::test]
async fn test_tampered_token_is_fatal_and_sets_no_key() {
    let (tb, listener) = testbed().await;

    let server = tb.server.clone();
    let client_public = tb.client_public.clone();
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let request = peer.read_json().await;
        assert_eq!(request["type"], "TOKEN_REQUEST");

        peer.send_message(&ServerMessage::ServerPublicKey {
            data: server.public_key().to_base64(),
        })
        .await;
        // Token sealed over one key, signature computed over another.
        peer.send_message(&ServerMessage::TokenIssued {
            token: client_public.seal_for(&[0u8; 16]).unwrap(),
            signature: server.sign(&[1u8; 16]).to_base64(),
        })
        .await;
        peer.hold_open().await;
    });

    let session = Session::open(&tb.config, tb.keystore.clone(), ACCOUNT)
        .await
        .unwrap();

    let result = session.await_handshake().await;
    assert!(matches!(result, Err(ClientError::Handshake(_))));
    assert_eq!(session.phase(), HandshakePhase::Failed);

    wait_until(|| !session.is_running()).await;

    // The session never became usable.
    let result = session.patients_of(1).await;
    assert!(matches!(result, Err(ClientError::NotReady(_))));
}

#[tokio::test]
async fn test_authenticate_chains_profile_lookup() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        let login = peer.read_encrypted(&key).await;
        assert_eq!(login["type"], "LOGIN_REQUEST");
        assert_eq!(login["data"]["email"], ACCOUNT);
        assert_eq!(login["data"]["access_permits"], "Doctor");
        peer.send_encrypted(&success_login(1, "Doctor"), &key).await;

        let profile = peer.read_encrypted(&key).await;
        assert_eq!(profile["type"], "REQUEST_DOCTOR_BY_EMAIL");
        assert_eq!(profile["data"]["user_id"], 1);
        assert_eq!(profile["data"]["email"], ACCOUNT);
        peer.send_encrypted(&success_profile(1), &key).await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    let login = session.authenticate(ACCOUNT, "secret").await.unwrap();

    assert_eq!(login.user_id, 1);
    assert_eq!(login.role, "Doctor");
    assert_eq!(login.email, ACCOUNT);
    assert_eq!(login.profile.id, 1);
    assert_eq!(login.profile.fields["name"], "John");

    session.close().await;
}

#[tokio::test]
async fn test_rejected_login_raises_remote_and_skips_profile() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    let server_task = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        let mut received = Vec::new();
        let login = peer.read_encrypted(&key).await;
        received.push(login["type"].as_str().unwrap().to_string());
        peer.send_encrypted(
            &ServerMessage::Login(LoginResponse {
                status: Status::Error,
                message: Some("invalid credentials".to_string()),
                data: None,
            }),
            &key,
        )
        .await;

        // The next record must already be the termination message, not a
        // profile request.
        let next = peer.read_encrypted(&key).await;
        received.push(next["type"].as_str().unwrap().to_string());
        received
    });

    let session = tb.open_session().await;
    let result = session.authenticate(ACCOUNT, "wrong").await;
    match result {
        Err(ClientError::Remote(message)) => assert_eq!(message, "invalid credentials"),
        other => panic!("expected Remote error, got {:?}", other),
    }

    session.close().await;
    let received = server_task.await.unwrap();
    assert_eq!(received, vec!["LOGIN_REQUEST", "STOP_CLIENT"]);
}

#[tokio::test]
async fn test_unresolved_profile_is_distinct_error() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        peer.read_encrypted(&key).await;
        peer.send_encrypted(&success_login(1, "Doctor"), &key).await;

        peer.read_encrypted(&key).await;
        peer.send_encrypted(
            &ServerMessage::Profile(ProfileResponse {
                status: Status::Error,
                message: Some("profile not found".to_string()),
                doctor: None,
            }),
            &key,
        )
        .await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    let result = session.authenticate(ACCOUNT, "secret").await;
    match result {
        Err(ClientError::LoginUnresolved(message)) => assert_eq!(message, "profile not found"),
        other => panic!("expected LoginUnresolved, got {:?}", other),
    }

    // The session itself stays keyed and running.
    assert_eq!(session.phase(), HandshakePhase::Ready);
    assert!(session.is_running());

    session.close().await;
}

#[tokio::test]
async fn test_peer_stop_notifies_and_does_not_echo() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    let server_task = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;
        peer.send_encrypted(&ServerMessage::Stop, &key).await;
        // The client must close without echoing a termination message.
        peer.read_line().await
    });

    let session = tb.open_session().await;
    let mut events = session.subscribe();
    session.await_handshake().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no disconnect event within one second")
        .unwrap();
    assert_eq!(event, SessionEvent::PeerDisconnected);

    wait_until(|| !session.is_running()).await;

    let after_stop = server_task.await.unwrap();
    assert_eq!(after_stop, None, "client echoed a record after STOP_CLIENT");

    // Closing an already-dead session is a quiet no-op.
    session.close().await;
}

#[tokio::test]
async fn test_caller_close_sends_stop_without_event() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    let server_task = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;
        let stop = peer.read_encrypted(&key).await;
        let eof = peer.read_line().await;
        (stop, eof)
    });

    let session = tb.open_session().await;
    let mut events = session.subscribe();
    session.await_handshake().await.unwrap();

    session.close().await;
    assert!(!session.is_running());

    let (stop, eof) = server_task.await.unwrap();
    assert_eq!(stop["type"], "STOP_CLIENT");
    assert_eq!(eof, None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        matches!(
            events.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ),
        "caller-initiated close must not raise a disconnect event"
    );
}

#[tokio::test]
async fn test_interleaved_response_of_other_type_is_discarded() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        let request = peer.read_encrypted(&key).await;
        assert_eq!(request["type"], "SAVE_COMMENTS_SIGNAL");

        // An unrelated response arrives first; the caller must skip it.
        peer.send_encrypted(
            &ServerMessage::PasswordChanged(Ack {
                status: Status::Success,
                message: None,
            }),
            &key,
        )
        .await;
        peer.send_encrypted(
            &ServerMessage::AnnotationSaved(Ack {
                status: Status::Success,
                message: None,
            }),
            &key,
        )
        .await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    session.await_handshake().await.unwrap();
    session.save_annotation(88, 77, "reviewed").await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_undecryptable_record_escalates_to_waiting_caller() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        peer.read_encrypted(&key).await;
        // A symmetric record that does not decrypt under the session key.
        let garbage = json!({ "type": "ENCRYPTED", "data": BASE64.encode(b"not a ciphertext") });
        peer.send_raw(&garbage.to_string()).await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    session.await_handshake().await.unwrap();

    let result = session.patients_of(1).await;
    assert!(matches!(result, Err(ClientError::Decryption(_))));

    // The line was dropped, not fatal: the session is still running.
    assert!(session.is_running());
    session.close().await;
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let (mut tb, listener) = testbed().await;
    tb.config.timeouts.request_secs = 1;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;
        peer.hold_open().await;
    });

    let session = Session::open(&tb.config, tb.keystore.clone(), ACCOUNT)
        .await
        .unwrap();
    session.await_handshake().await.unwrap();

    let result = session.patients_of(1).await;
    assert!(matches!(result, Err(ClientError::Timeout(_))));

    session.close().await;
}

/// Correlation is by response type only. Two callers awaiting the same kind
/// race for whichever matching response arrives first, so responses may
/// cross over between them. This is the documented granularity limit of the
/// protocol, which carries no per-request identifiers; the test pins down
/// that both callers still complete.
#[tokio::test]
async fn test_same_kind_requests_race_but_both_complete() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        let first = peer.read_encrypted(&key).await;
        let second = peer.read_encrypted(&key).await;
        for request in [first, second] {
            assert_eq!(request["type"], "REQUEST_PATIENTS_FROM_DOCTOR");
            let doctor_id = request["data"]["doctor_id"].as_i64().unwrap();
            peer.send_encrypted(
                &ServerMessage::Patients(PatientsResponse {
                    status: Status::Success,
                    message: None,
                    patients: Some(vec![PatientSummary {
                        // Tie the response to the request so crossover is
                        // observable, not asserted away.
                        id: doctor_id * 10,
                        fields: Map::new(),
                    }]),
                }),
                &key,
            )
            .await;
        }

        peer.hold_open().await;
    });

    let session = Arc::new(tb.open_session().await);
    session.await_handshake().await.unwrap();

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.patients_of(1).await })
    };
    let second = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.patients_of(2).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    let mut ids: Vec<i64> = first.iter().chain(second.iter()).map(|p| p.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![10, 20], "every response was consumed exactly once");

    session.close().await;
}

#[tokio::test]
async fn test_activation_works_before_session_key_exists() {
    let (tb, listener) = testbed().await;

    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let request = peer.read_json().await;
        assert_eq!(request["type"], "TOKEN_REQUEST");

        // The server stalls the handshake; activation is plaintext and must
        // still complete.
        let activation = peer.read_json().await;
        assert_eq!(activation["type"], "ACTIVATE_ACCOUNT_REQUEST");
        assert_eq!(activation["data"]["one_time_password"], "123456");
        peer.send_message(&ServerMessage::Activation(ActivationResponse {
            status: Status::Success,
            message: None,
            token: Some("one-time-token".to_string()),
        }))
        .await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    let token = session.activate_account(ACCOUNT, "123456").await.unwrap();
    assert_eq!(token, "one-time-token");
    assert_eq!(session.phase(), HandshakePhase::AwaitingServerKey);

    session.close().await;
}

#[tokio::test]
async fn test_change_password_is_sealed_and_signed() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;

        let record = peer.read_json().await;
        assert_eq!(record["type"], "CHANGE_PASSWORD_REQUEST");
        assert_eq!(record["sender"], ACCOUNT);

        let inner = server
            .open_sealed(record["message"].as_str().unwrap())
            .unwrap();
        let signature = Signature::from_base64(record["signature"].as_str().unwrap()).unwrap();
        client_public.verify(&inner, &signature).unwrap();

        let request: Value = serde_json::from_slice(&inner).unwrap();
        assert_eq!(request["data"]["new_password"], "n3w-s3cret");

        peer.send_encrypted(
            &ServerMessage::PasswordChanged(Ack {
                status: Status::Success,
                message: None,
            }),
            &key,
        )
        .await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    session.await_handshake().await.unwrap();
    session.change_password(ACCOUNT, "n3w-s3cret").await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_change_password_before_handshake_uses_key_store() {
    let (tb, listener) = testbed().await;
    tb.keystore
        .insert_peer(tb.config.server.identity.as_str(), tb.server.public_key());

    let (server, client_public) = (tb.server.clone(), tb.client_public.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let request = peer.read_json().await;
        assert_eq!(request["type"], "TOKEN_REQUEST");

        // Handshake never progresses; the one-shot arrives sealed to the
        // server key registered in the client's key store.
        let record = peer.read_json().await;
        assert_eq!(record["type"], "CHANGE_PASSWORD_REQUEST");
        let inner = server
            .open_sealed(record["message"].as_str().unwrap())
            .unwrap();
        let signature = Signature::from_base64(record["signature"].as_str().unwrap()).unwrap();
        client_public.verify(&inner, &signature).unwrap();

        peer.send_message(&ServerMessage::PasswordChanged(Ack {
            status: Status::Success,
            message: None,
        }))
        .await;

        peer.hold_open().await;
    });

    let session = tb.open_session().await;
    session.change_password(ACCOUNT, "n3w-s3cret").await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_server_vanishing_surfaces_as_connection_lost() {
    let (tb, listener) = testbed().await;

    let (server, client_public, key) = (tb.server.clone(), tb.client_public.clone(), tb.key.clone());
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.run_handshake(&server, &client_public, &key).await;
        peer.read_encrypted(&key).await;
        // Drop the connection with a request in flight.
    });

    let session = tb.open_session().await;
    let mut events = session.subscribe();
    session.await_handshake().await.unwrap();

    let result = session.patients_of(1).await;
    assert!(matches!(result, Err(ClientError::ConnectionLost(_))));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no disconnect event within one second")
        .unwrap();
    assert_eq!(event, SessionEvent::PeerDisconnected);
}

//! Wire message definitions for the VitaLink protocol.
//!
//! Every record on the wire is a JSON object with a `type` discriminator.
//! Messages decode once, at the envelope boundary, into the closed enums
//! below; there is no dispatch on untyped maps. Record payloads that belong
//! to the medical domain proper (profiles, patient entries) are carried with
//! an open field set so the client never has to understand their schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response status reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation succeeded and the payload fields are present.
    Success,
    /// The operation failed; `message` carries the server's reason.
    Error,
    /// Any unrecognized status string. Treated as a failure by callers.
    Unknown,
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::Unknown => "UNKNOWN",
        };
        serializer.serialize_str(text)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(match text.as_str() {
            "SUCCESS" => Status::Success,
            "ERROR" => Status::Error,
            _ => Status::Unknown,
        })
    }
}

// ============================================================================
// Client -> server messages
// ============================================================================

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Opens the handshake: asks the server to issue a session token.
    #[serde(rename = "TOKEN_REQUEST")]
    TokenRequest {
        /// Payload fields.
        data: TokenRequestData,
    },

    /// One-time account activation, exchanged in plaintext.
    #[serde(rename = "ACTIVATE_ACCOUNT_REQUEST")]
    Activate {
        /// Payload fields.
        data: ActivationData,
    },

    /// Credential check for an account.
    #[serde(rename = "LOGIN_REQUEST")]
    Login {
        /// Payload fields.
        data: LoginData,
    },

    /// Fetches the practitioner profile tied to an identity.
    #[serde(rename = "REQUEST_DOCTOR_BY_EMAIL")]
    ProfileByEmail {
        /// Payload fields.
        data: ProfileQuery,
    },

    /// Lists the patients assigned to a practitioner.
    #[serde(rename = "REQUEST_PATIENTS_FROM_DOCTOR")]
    PatientsFromDoctor {
        /// Payload fields.
        data: PatientsQuery,
    },

    /// Lists the recordings available for a patient.
    #[serde(rename = "REQUEST_PATIENT_SIGNALS")]
    PatientRecordings {
        /// Payload fields.
        data: RecordingsQuery,
    },

    /// Fetches a single recording, blob included.
    #[serde(rename = "REQUEST_SIGNAL")]
    RecordingById {
        /// Payload fields.
        data: RecordingQuery,
    },

    /// Stores free-text annotations against a recording.
    #[serde(rename = "SAVE_COMMENTS_SIGNAL")]
    SaveAnnotation {
        /// Payload fields.
        data: AnnotationData,
    },

    /// Replaces the account password. Sent as an asymmetric-signed one-shot.
    #[serde(rename = "CHANGE_PASSWORD_REQUEST")]
    ChangePassword {
        /// Payload fields.
        data: PasswordChangeData,
    },

    /// Session termination, sent when the client initiates shutdown.
    #[serde(rename = "STOP_CLIENT")]
    Stop,
}

impl ClientMessage {
    /// Returns the wire `type` string, for logging.
    pub fn wire_type(&self) -> &'static str {
        match self {
            ClientMessage::TokenRequest { .. } => "TOKEN_REQUEST",
            ClientMessage::Activate { .. } => "ACTIVATE_ACCOUNT_REQUEST",
            ClientMessage::Login { .. } => "LOGIN_REQUEST",
            ClientMessage::ProfileByEmail { .. } => "REQUEST_DOCTOR_BY_EMAIL",
            ClientMessage::PatientsFromDoctor { .. } => "REQUEST_PATIENTS_FROM_DOCTOR",
            ClientMessage::PatientRecordings { .. } => "REQUEST_PATIENT_SIGNALS",
            ClientMessage::RecordingById { .. } => "REQUEST_SIGNAL",
            ClientMessage::SaveAnnotation { .. } => "SAVE_COMMENTS_SIGNAL",
            ClientMessage::ChangePassword { .. } => "CHANGE_PASSWORD_REQUEST",
            ClientMessage::Stop => "STOP_CLIENT",
        }
    }
}

/// Payload of `TOKEN_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequestData {
    /// Account identifier the token is requested for.
    pub email: String,
}

/// Payload of `ACTIVATE_ACCOUNT_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationData {
    /// Account identifier being activated.
    pub email: String,
    /// The one-time password delivered out of band.
    pub one_time_password: String,
}

/// Payload of `LOGIN_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    /// Account identifier.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Requested access level.
    pub access_permits: String,
}

/// Payload of `REQUEST_DOCTOR_BY_EMAIL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileQuery {
    /// Identity of the authenticated user.
    pub user_id: i64,
    /// Account identifier to resolve.
    pub email: String,
}

/// Payload of `REQUEST_PATIENTS_FROM_DOCTOR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientsQuery {
    /// Practitioner whose patients are listed.
    pub doctor_id: i64,
    /// Identity of the authenticated user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// Payload of `REQUEST_PATIENT_SIGNALS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingsQuery {
    /// Patient whose recordings are listed.
    pub patient_id: i64,
    /// Identity of the authenticated user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// Payload of `REQUEST_SIGNAL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingQuery {
    /// Recording to fetch.
    pub signal_id: i64,
    /// Identity of the authenticated user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// Payload of `SAVE_COMMENTS_SIGNAL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationData {
    /// Patient the recording belongs to.
    pub patient_id: i64,
    /// Recording being annotated.
    pub signal_id: i64,
    /// The free-text annotation.
    pub comments: String,
    /// Identity of the authenticated user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// Payload of `CHANGE_PASSWORD_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordChangeData {
    /// Account identifier.
    pub email: String,
    /// The replacement password.
    pub new_password: String,
}

// ============================================================================
// Server -> client messages
// ============================================================================

/// Messages received from the server, decoded once at the envelope boundary.
///
/// Handshake-phase messages are routed to the handshake controller; the
/// termination message ends the session; everything else is a response
/// delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The server's public key announcement (handshake step 1).
    #[serde(rename = "SERVER_PUBLIC_KEY")]
    ServerPublicKey {
        /// Base64-encoded Ed25519 public key.
        data: String,
    },

    /// The signed session token (handshake step 2).
    #[serde(rename = "TOKEN_ISSUED")]
    TokenIssued {
        /// Session key sealed to the client's public key.
        token: String,
        /// Base64 Ed25519 signature over the raw session key bytes.
        signature: String,
    },

    /// Session termination requested by the server.
    #[serde(rename = "STOP_CLIENT")]
    Stop,

    /// Response to `LOGIN_REQUEST`.
    #[serde(rename = "LOGIN_RESPONSE")]
    Login(LoginResponse),

    /// Response to `REQUEST_DOCTOR_BY_EMAIL`.
    #[serde(rename = "REQUEST_DOCTOR_BY_EMAIL_RESPONSE")]
    Profile(ProfileResponse),

    /// Response to `REQUEST_PATIENTS_FROM_DOCTOR`.
    #[serde(rename = "REQUEST_PATIENTS_FROM_DOCTOR_RESPONSE")]
    Patients(PatientsResponse),

    /// Response to `REQUEST_PATIENT_SIGNALS`.
    #[serde(rename = "REQUEST_PATIENT_SIGNALS_RESPONSE")]
    Recordings(RecordingsResponse),

    /// Response to `REQUEST_SIGNAL`.
    #[serde(rename = "REQUEST_SIGNAL_RESPONSE")]
    Recording(RecordingResponse),

    /// Response to `SAVE_COMMENTS_SIGNAL`.
    #[serde(rename = "SAVE_COMMENTS_SIGNAL_RESPONSE")]
    AnnotationSaved(Ack),

    /// Response to `CHANGE_PASSWORD_REQUEST`.
    #[serde(rename = "CHANGE_PASSWORD_REQUEST_RESPONSE")]
    PasswordChanged(Ack),

    /// Response to `ACTIVATE_ACCOUNT_REQUEST`.
    #[serde(rename = "ACTIVATE_ACCOUNT_RESPONSE")]
    Activation(ActivationResponse),
}

/// Discriminator for correlating responses with waiting callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `LOGIN_RESPONSE`
    Login,
    /// `REQUEST_DOCTOR_BY_EMAIL_RESPONSE`
    Profile,
    /// `REQUEST_PATIENTS_FROM_DOCTOR_RESPONSE`
    Patients,
    /// `REQUEST_PATIENT_SIGNALS_RESPONSE`
    Recordings,
    /// `REQUEST_SIGNAL_RESPONSE`
    Recording,
    /// `SAVE_COMMENTS_SIGNAL_RESPONSE`
    AnnotationSaved,
    /// `CHANGE_PASSWORD_REQUEST_RESPONSE`
    PasswordChanged,
    /// `ACTIVATE_ACCOUNT_RESPONSE`
    Activation,
}

impl ServerMessage {
    /// Returns true for handshake-phase messages, which are consumed by the
    /// handshake controller rather than delivered to callers.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            ServerMessage::ServerPublicKey { .. } | ServerMessage::TokenIssued { .. }
        )
    }

    /// Returns the correlation kind for response messages, `None` for
    /// handshake and termination messages.
    pub fn response_kind(&self) -> Option<ResponseKind> {
        match self {
            ServerMessage::Login(_) => Some(ResponseKind::Login),
            ServerMessage::Profile(_) => Some(ResponseKind::Profile),
            ServerMessage::Patients(_) => Some(ResponseKind::Patients),
            ServerMessage::Recordings(_) => Some(ResponseKind::Recordings),
            ServerMessage::Recording(_) => Some(ResponseKind::Recording),
            ServerMessage::AnnotationSaved(_) => Some(ResponseKind::AnnotationSaved),
            ServerMessage::PasswordChanged(_) => Some(ResponseKind::PasswordChanged),
            ServerMessage::Activation(_) => Some(ResponseKind::Activation),
            ServerMessage::ServerPublicKey { .. }
            | ServerMessage::TokenIssued { .. }
            | ServerMessage::Stop => None,
        }
    }

    /// Returns the wire `type` string, for logging.
    pub fn wire_type(&self) -> &'static str {
        match self {
            ServerMessage::ServerPublicKey { .. } => "SERVER_PUBLIC_KEY",
            ServerMessage::TokenIssued { .. } => "TOKEN_ISSUED",
            ServerMessage::Stop => "STOP_CLIENT",
            ServerMessage::Login(_) => "LOGIN_RESPONSE",
            ServerMessage::Profile(_) => "REQUEST_DOCTOR_BY_EMAIL_RESPONSE",
            ServerMessage::Patients(_) => "REQUEST_PATIENTS_FROM_DOCTOR_RESPONSE",
            ServerMessage::Recordings(_) => "REQUEST_PATIENT_SIGNALS_RESPONSE",
            ServerMessage::Recording(_) => "REQUEST_SIGNAL_RESPONSE",
            ServerMessage::AnnotationSaved(_) => "SAVE_COMMENTS_SIGNAL_RESPONSE",
            ServerMessage::PasswordChanged(_) => "CHANGE_PASSWORD_REQUEST_RESPONSE",
            ServerMessage::Activation(_) => "ACTIVATE_ACCOUNT_RESPONSE",
        }
    }
}

/// A bare acknowledgment carrying only a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Outcome of the operation.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of `LOGIN_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Outcome of the credential check.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The authenticated account, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AccountData>,
}

/// The identity block returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    /// Server-side account identifier.
    pub id: i64,
    /// Granted role.
    pub role: String,
}

/// Payload of `REQUEST_DOCTOR_BY_EMAIL_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResponse {
    /// Outcome of the lookup.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The resolved profile, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<Profile>,
}

/// A practitioner profile. Only the identifier is interpreted by the client;
/// the remaining fields pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Server-side profile identifier.
    pub id: i64,
    /// Schema-free profile fields (name, department, speciality, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Payload of `REQUEST_PATIENTS_FROM_DOCTOR_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientsResponse {
    /// Outcome of the query.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The patient entries, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patients: Option<Vec<PatientSummary>>,
}

/// One patient entry in a relationship query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    /// Server-side patient identifier.
    pub id: i64,
    /// Schema-free patient fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Payload of `REQUEST_PATIENT_SIGNALS_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingsResponse {
    /// Outcome of the query.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Recording summaries, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<Vec<RecordingSummary>>,
}

/// Structured metadata describing one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    /// Server-side recording identifier.
    pub signal_id: i64,
    /// Patient the recording belongs to.
    pub patient_id: i64,
    /// Acquisition date, as the server formats it.
    pub date: String,
    /// Free-text annotations stored with the recording.
    pub comments: String,
    /// Samples per second.
    pub sampling_rate: f64,
}

/// Payload of `REQUEST_SIGNAL_RESPONSE`.
///
/// The blob is a compressed archive produced by the server; the client
/// carries it opaquely and leaves decompression to its consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResponse {
    /// Outcome of the fetch.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Original archive filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Base64-encoded compressed blob.
    #[serde(rename = "dataBytes", default, skip_serializing_if = "Option::is_none")]
    pub data_bytes: Option<String>,
    /// Structured metadata for the recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RecordingSummary>,
}

/// Payload of `ACTIVATE_ACCOUNT_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResponse {
    /// Outcome of the activation.
    pub status: Status,
    /// Server-supplied reason, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The one-time activation token, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

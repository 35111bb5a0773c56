//! Envelope codec for line-delimited wire records.
//!
//! Three shapes cross the wire: plaintext records (handshake and one-shot
//! exchanges), symmetric-encrypted records (`{"type":"ENCRYPTED","data":...}`,
//! everything after the handshake), and asymmetric-signed records addressed
//! to a specific recipient's public key. Each record is a single JSON object
//! on its own line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cipher::SessionKey;
use crate::error::{ProtocolError, Result};
use crate::keys::{AccountIdentity, PeerKey};
use crate::messages::{ClientMessage, ServerMessage};

/// Outer `type` marking a symmetric-encrypted record.
pub const ENCRYPTED_TYPE: &str = "ENCRYPTED";

/// A decoded wire record, before any decryption.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A plaintext record, already decoded to its message.
    Plain(ServerMessage),
    /// A symmetric-encrypted record; `data` holds the base64 ciphertext of
    /// the inner message and must be unwrapped with the session key.
    Encrypted {
        /// Base64 ciphertext of the inner JSON message.
        data: String,
    },
}

/// Wrapper shape of a symmetric-encrypted record.
#[derive(Serialize, Deserialize)]
struct EncryptedRecord {
    #[serde(rename = "type")]
    record_type: String,
    data: String,
}

/// Wrapper shape of an asymmetric-signed record.
#[derive(Serialize, Deserialize)]
struct SealedRecord {
    #[serde(rename = "type")]
    record_type: String,
    message: String,
    signature: String,
    sender: String,
}

/// Decodes one wire line into an [`Envelope`].
///
/// The outer `type` field selects the shape: `ENCRYPTED` yields
/// [`Envelope::Encrypted`]; any other type is decoded as a plaintext
/// [`ServerMessage`]. Lines that are not JSON objects with a string `type`
/// fail with [`ProtocolError::MalformedEnvelope`].
pub fn decode(line: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("not valid JSON: {e}")))?;

    let record_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedEnvelope("missing type field".to_string()))?;

    if record_type == ENCRYPTED_TYPE {
        let data = value
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProtocolError::MalformedEnvelope("ENCRYPTED record without data".to_string())
            })?
            .to_string();
        return Ok(Envelope::Encrypted { data });
    }

    let message = serde_json::from_value::<ServerMessage>(value)?;
    Ok(Envelope::Plain(message))
}

/// Unwraps a symmetric envelope's payload into the inner message.
pub fn open_symmetric(data: &str, key: &SessionKey) -> Result<ServerMessage> {
    let plaintext = key.decrypt(data)?;
    let message = serde_json::from_slice::<ServerMessage>(&plaintext)?;
    Ok(message)
}

/// Encodes a message as a plaintext record.
pub fn encode_plain(message: &ClientMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Encodes a message inside a symmetric envelope.
pub fn encode_symmetric(message: &ClientMessage, key: &SessionKey) -> Result<String> {
    let inner = serde_json::to_vec(message)?;
    let record = EncryptedRecord {
        record_type: ENCRYPTED_TYPE.to_string(),
        data: key.encrypt(&inner)?,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Encodes a message as an asymmetric-signed record.
///
/// The inner JSON is signed with the sender's key, then sealed to the
/// recipient's public key. The outer record carries the message's own wire
/// type so the recipient can route it before opening the payload.
pub fn encode_sealed(
    message: &ClientMessage,
    recipient: &PeerKey,
    sender: &AccountIdentity,
    sender_id: &str,
) -> Result<String> {
    let inner = serde_json::to_vec(message)?;
    let record = SealedRecord {
        record_type: message.wire_type().to_string(),
        message: recipient.seal_for(&inner)?,
        signature: sender.sign(&inner).to_base64(),
        sender: sender_id.to_string(),
    };
    Ok(serde_json::to_string(&record)?)
}

//! # VitaLink Protocol Library
//!
//! This crate provides wire protocol definitions and cryptographic primitives
//! for the VitaLink records client.
//!
//! ## Overview
//!
//! The protocol crate is the foundation of VitaLink's communication layer,
//! providing:
//!
//! - **Message Definitions**: Closed enums for every record the client sends
//!   or receives, decoded once at the envelope boundary
//! - **Account Keys**: Ed25519 identities with derived X25519 encryption keys,
//!   signing, and sealed public-key payloads
//! - **Session Cipher**: AES-128-GCM encryption under the negotiated session key
//! - **Envelope Codec**: the three wire shapes (plain, symmetric, asymmetric
//!   signed) over newline-delimited JSON
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Application Messages            │  JSON, type-tagged
//! ├─────────────────────────────────────────┤
//! │            Envelope Codec               │  plain / ENCRYPTED / sealed
//! ├─────────────────────────────────────────┤
//! │   Session Cipher / Sealed Payloads      │  AES-128-GCM / X25519 box
//! ├─────────────────────────────────────────┤
//! │      Transport (newline-delimited)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`keys`]: Account identity, signing, and sealed payloads
//! - [`cipher`]: Symmetric session key and cipher
//! - [`envelope`]: Envelope encoding and decoding
//! - [`messages`]: Wire message definitions
//! - [`error`]: Error types

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod messages;

pub use cipher::{SessionKey, SESSION_KEY_LENGTH, SYMMETRIC_NONCE_LENGTH};
pub use envelope::{
    decode, encode_plain, encode_sealed, encode_symmetric, open_symmetric, Envelope,
    ENCRYPTED_TYPE,
};
pub use error::{ProtocolError, Result};
pub use keys::{AccountIdentity, PeerKey, Signature, EPHEMERAL_KEY_LENGTH, SEALED_NONCE_LENGTH};
pub use messages::{ClientMessage, ResponseKind, ServerMessage, Status};

//! # VitaLink Client Library
//!
//! This crate provides the client-side secure session for the VitaLink
//! records server: an authenticated, encrypted channel over a raw TCP
//! stream, with request/response exchanges multiplexed across it.
//!
//! ## Overview
//!
//! The client owns one connection per session and provides:
//!
//! - **Transport**: line-delimited records over TCP
//! - **Handshake**: key announcement, token verification, session key adoption
//! - **Receive Loop**: one background task draining and routing incoming records
//! - **Correlation**: type-filtered hand-off of responses to waiting callers
//! - **Operations**: authenticate, relationship queries, record fetch,
//!   annotations, activation, and credential change
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Session Facade                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   callers ──────────────┐            ┌── Receive Loop ──┐   │
//! │     │  requests         │            │   (one task)     │   │
//! │     v                   v            v                  │   │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌──────────┐ │   │
//! │  │  Envelope    │   │    Correlator    │<──│ Handshake│ │   │
//! │  │  + Cipher    │   │ (typed hand-off) │   │Controller│ │   │
//! │  └──────────────┘   └──────────────────┘   └──────────┘ │   │
//! │     │                                                   │   │
//! │     v                                                   v   │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │            Transport (newline-delimited TCP)         │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use client::{Config, MemoryKeyStore, Session};
//! use protocol::AccountIdentity;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let keystore = Arc::new(MemoryKeyStore::new());
//!     keystore.insert_identity("doc@example.com", AccountIdentity::generate());
//!
//!     let session = Session::open(&config, keystore, "doc@example.com").await?;
//!     let login = session.authenticate("doc@example.com", "secret").await?;
//!     println!("logged in as {} ({})", login.email, login.role);
//!
//!     let patients = session.patients_of(login.user_id).await?;
//!     println!("{} patients", patients.len());
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`keystore`]: Key store collaborator
//! - [`transport`]: TCP transport for line-delimited records
//! - [`session`]: Handshake, receive loop, correlation, and the facade
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod keystore;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{default_config_path, Config, ConfigError};

// Re-export error types for convenience
pub use error::{ClientError, Result};

// Re-export keystore types for convenience
pub use keystore::{KeyStore, KeyStoreError, MemoryKeyStore};

// Re-export session types for convenience
pub use session::{Authenticated, HandshakePhase, Recording, Session, SessionEvent};

// Re-export transport types for convenience
pub use transport::{LineReader, Transport};

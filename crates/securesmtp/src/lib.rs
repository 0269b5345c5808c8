//! # securesmtp
//!
//! SMTP client that upgrades a plaintext connection with STARTTLS, checks the
//! server certificate, and identifies again over the encrypted channel.
//!
//! ## Features
//!
//! - **Checkpointed TLS negotiation**: every step of the upgrade fails with
//!   its own error and status code, and releases everything it created
//! - **Trust store choice**: bundled Mozilla roots or the platform store
//! - **Secure re-identification**: EHLO over TLS with AUTH mechanism capture
//! - **Polling command channel**: bounded waits for server replies
//! - **Communication log**: every line exchanged, tagged by side
//!
//! ## Quick Start
//!
//! ```ignore
//! use securesmtp::{ClientConfig, ReplyCode, SecureClient};
//!
//! #[tokio::main]
//! async fn main() -> securesmtp::Result<()> {
//!     let config = ClientConfig::builder("smtp.example.com").port(587).build();
//!     let mut client = SecureClient::new(config);
//!
//!     // Plain greeting, EHLO and STARTTLS
//!     client.connect().await?;
//!
//!     // TLS handshake and certificate checks
//!     client.start_tls_negotiation().await?;
//!
//!     // EHLO again, this time encrypted
//!     if client.get_server_secure_identification().await? == ReplyCode::OK {
//!         println!("AUTH: {:?}", client.auth_options());
//!     }
//!
//!     client.cleanup().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Client States
//!
//! ```text
//! Plain ── start_tls_negotiation() ──→ NegotiatingTls ──→ SecureEstablished
//!                                           │                    │
//!                                           └──→ Failed ←────────┤
//!                                                                │
//!                        get_server_secure_identification() ──→ SecureIdentified
//! ```
//!
//! ## Modules
//!
//! - [`command`]: plaintext SMTP commands
//! - [`connection`]: plain prelude, TLS negotiation, command channel, client
//! - [`log`]: communication log sinks
//! - [`parser`]: reply parser and AUTH extraction
//! - [`types`]: replies, extensions and AUTH options

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod log;
pub mod parser;
pub mod types;

pub use connection::{
    ClientConfig, ClientConfigBuilder, Endpoint, RustlsBackend, SecureClient, ServerInfo,
    Session, State, TlsBackend, TrustStoreSource, VerifyResult,
};
pub use error::{Error, ErrorKind, Result, status};
pub use log::{CommunicationLog, MemoryLog, Side, TracingLog};
pub use types::{AuthMechanism, AuthOptions, Extension, Reply, ReplyCode};

//! Connection management: plain prelude, TLS upgrade, secure command exchange.

mod channel;
mod client;
mod config;
mod plain;
mod session;
mod tls;

pub use channel::{CommandChannel, READ_BUFFER_SIZE};
pub use client::{SecureClient, State};
pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_COMMAND_TIMEOUT, DEFAULT_PORT, Endpoint,
    TrustStoreSource,
};
pub use plain::{PlainChannel, connect};
pub use session::{Session, SessionStream};
pub use tls::{RustlsBackend, TlsBackend, VerifyResult, negotiate};

use crate::types::Extension;
use std::collections::HashSet;

/// Server capabilities from the plaintext EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        for ext in &self.extensions {
            if let Extension::Size(size) = ext {
                return *size;
            }
        }
        None
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<crate::types::AuthMechanism> {
        for ext in &self.extensions {
            if let Extension::Auth(mechanisms) = ext {
                return mechanisms.clone();
            }
        }
        Vec::new()
    }
}

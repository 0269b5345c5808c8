//! Secure SMTP client: STARTTLS upgrade followed by a second EHLO over TLS.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::ServerInfo;
use super::channel::CommandChannel;
use super::config::ClientConfig;
use super::plain::{self, PlainChannel};
use super::session::Session;
use super::tls::{RustlsBackend, TlsBackend, negotiate};
use crate::error::{Error, Result};
use crate::log::{CommunicationLog, Side, TracingLog};
use crate::parser::extract_auth_options;
use crate::types::{AuthOptions, Reply, ReplyCode};

/// Where the client is in the STARTTLS sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No TLS session; a plain socket may be attached.
    Plain,
    /// Negotiation in progress.
    NegotiatingTls,
    /// Handshake and certificate checks passed.
    SecureEstablished,
    /// EHLO over TLS answered 250.
    SecureIdentified,
    /// A failure tore everything down.
    Failed {
        /// Status code of the failure (see [`crate::status`]).
        status: i32,
    },
}

impl State {
    /// Returns true if a TLS session is up.
    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::SecureEstablished | Self::SecureIdentified)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::NegotiatingTls => f.write_str("negotiating TLS"),
            Self::SecureEstablished => f.write_str("secure"),
            Self::SecureIdentified => f.write_str("secure and identified"),
            Self::Failed { status } => write!(f, "failed ({status})"),
        }
    }
}

/// SMTP client that upgrades a plain connection with STARTTLS.
///
/// Operations take `&mut self` and run one at a time. Cloning yields a fresh
/// [`State::Plain`] client with the same configuration and log, never the
/// live connection.
#[derive(Debug)]
pub struct SecureClient {
    config: ClientConfig,
    state: State,
    socket: Option<TcpStream>,
    session: Option<Session>,
    plain_info: ServerInfo,
    auth_options: AuthOptions,
    last_response: Option<Reply>,
    log: Arc<dyn CommunicationLog>,
}

impl SecureClient {
    /// Creates an unconnected client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: State::Plain,
            socket: None,
            session: None,
            plain_info: ServerInfo::default(),
            auth_options: AuthOptions::new(),
            last_response: None,
            log: Arc::new(TracingLog),
        }
    }

    /// Creates a client over a socket the caller already connected and
    /// prepared for the upgrade.
    #[must_use]
    pub fn from_socket(config: ClientConfig, socket: TcpStream) -> Self {
        let mut client = Self::new(config);
        client.socket = Some(socket);
        client
    }

    /// Replaces the communication log sink.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn CommunicationLog>) -> Self {
        self.log = log;
        self
    }

    /// Connects in plaintext and runs greeting, EHLO and STARTTLS.
    ///
    /// On success the client is ready for [`Self::start_tls_negotiation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the server declines any
    /// step. The socket is closed in that case.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != State::Plain || self.socket.is_some() {
            return Err(Error::InvalidState(format!(
                "Cannot connect in state {}",
                self.state
            )));
        }

        let endpoint = self.config.endpoint();
        let socket = plain::connect(endpoint, self.config.connect_timeout()).await?;
        let timeout = Duration::from_secs(u64::from(self.config.command_timeout()));
        let mut channel = PlainChannel::new(socket, Arc::clone(&self.log)).with_timeout(timeout);

        channel.greeting().await?;
        let info = channel.ehlo(self.config.ehlo_hostname()).await?;
        if !info.supports_starttls() {
            tracing::warn!(%endpoint, "server does not advertise STARTTLS");
        }
        channel.starttls().await?;

        self.plain_info = info;
        self.socket = Some(channel.into_inner());
        Ok(())
    }

    /// Upgrades the attached plain socket to TLS with the rustls backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] outside [`State::Plain`] or without a
    /// socket; otherwise the error of the failing negotiation step, after
    /// which the client is [`State::Failed`].
    pub async fn start_tls_negotiation(&mut self) -> Result<()> {
        if self.state != State::Plain {
            return Err(self.wrong_state("start TLS negotiation"));
        }
        let socket = self
            .socket
            .take()
            .ok_or_else(|| Error::InvalidState("No plain connection to upgrade".into()))?;

        let backend = RustlsBackend::new(self.config.trust_store());
        self.negotiate_with(backend, socket).await
    }

    /// Upgrades `socket` to TLS through a custom backend.
    ///
    /// The client must not hold a plain socket of its own; use
    /// [`Self::start_tls_negotiation`] to upgrade that one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::start_tls_negotiation`], plus
    /// [`Error::InvalidState`] while a plain socket is attached.
    pub async fn negotiate_with<B: TlsBackend>(
        &mut self,
        backend: B,
        socket: B::Socket,
    ) -> Result<()> {
        if self.state != State::Plain {
            return Err(self.wrong_state("start TLS negotiation"));
        }
        if self.socket.is_some() {
            return Err(Error::InvalidState(
                "A plain connection is already attached".into(),
            ));
        }

        self.state = State::NegotiatingTls;
        match negotiate(backend, self.config.endpoint(), socket, &*self.log).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = State::SecureEstablished;
                Ok(())
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Sends EHLO over the TLS session and records the advertised
    /// authentication mechanisms.
    ///
    /// Returns the reply code. Only 250 moves the client to
    /// [`State::SecureIdentified`] and replaces the stored options; any
    /// other code comes back unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] before a successful negotiation, or
    /// the channel error (timeout, write failure, malformed reply) after
    /// which the session is gone and the client is [`State::Failed`].
    pub async fn get_server_secure_identification(&mut self) -> Result<ReplyCode> {
        self.require_secure("identify over TLS")?;

        self.log.add_item(
            Side::Client,
            "Contacting the server again but via the secure channel...",
        );
        let ehlo = format!("ehlo {}\r\n", self.config.ehlo_hostname());
        let reply = self.exchange(&ehlo).await?;
        if reply.code != ReplyCode::OK {
            tracing::debug!(code = %reply.code, "secure EHLO not accepted");
            return Ok(reply.code);
        }

        self.auth_options = extract_auth_options(&reply);
        self.state = State::SecureIdentified;
        tracing::info!(auth = ?self.auth_options, "identified over TLS");
        Ok(ReplyCode::OK)
    }

    /// Sends a raw command line over TLS without reading a reply.
    ///
    /// # Errors
    ///
    /// Returns an error without a TLS session or if the write fails.
    pub async fn send_command(&mut self, line: &str) -> Result<()> {
        self.require_secure("send a command")?;
        let result = CommandChannel::new(&mut self.session, &*self.log)
            .send(line)
            .await;
        if let Err(e) = &result {
            self.fail(e).await;
        }
        result
    }

    /// Sends a raw command line over TLS and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns an error without a TLS session, or on timeout, write failure
    /// or an unparsable reply.
    pub async fn send_command_with_feedback(&mut self, line: &str) -> Result<Reply> {
        self.require_secure("send a command")?;
        self.exchange(line).await
    }

    /// Releases the TLS session and the plain socket. Safe to call any
    /// number of times.
    pub async fn cleanup(&mut self) {
        let had_connection = self.session.is_some() || self.socket.is_some();
        self.release().await;
        if had_connection {
            self.log.add_item(Side::Client, "<Connection closed>");
        }
        if !matches!(self.state, State::Failed { .. }) {
            self.state = State::Plain;
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Authentication mechanisms from the last successful secure EHLO.
    #[must_use]
    pub const fn auth_options(&self) -> &AuthOptions {
        &self.auth_options
    }

    /// Last reply received over TLS.
    #[must_use]
    pub const fn last_server_response(&self) -> Option<&Reply> {
        self.last_response.as_ref()
    }

    /// Capabilities from the plaintext EHLO.
    #[must_use]
    pub const fn plain_capabilities(&self) -> &ServerInfo {
        &self.plain_info
    }

    /// Returns true while a TLS session is held.
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    async fn exchange(&mut self, line: &str) -> Result<Reply> {
        let result = CommandChannel::new(&mut self.session, &*self.log)
            .send_with_feedback(line, self.config.command_timeout())
            .await;
        match result {
            Ok(reply) => {
                self.last_response = Some(reply.clone());
                Ok(reply)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    fn require_secure(&self, action: &str) -> Result<()> {
        if self.state.is_secure() && self.session.is_some() {
            Ok(())
        } else {
            Err(self.wrong_state(action))
        }
    }

    fn wrong_state(&self, action: &str) -> Error {
        Error::InvalidState(format!("Cannot {action} in state {}", self.state))
    }

    async fn fail(&mut self, error: &Error) {
        self.release().await;
        self.state = State::Failed {
            status: error.status_code(),
        };
        tracing::warn!(%error, status = error.status_code(), "secure client failed");
    }

    async fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown().await {
                tracing::debug!(?e, "plain socket shutdown failed");
            }
        }
    }
}

impl Clone for SecureClient {
    fn clone(&self) -> Self {
        Self::new(self.config.clone()).with_log(Arc::clone(&self.log))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use tokio_test::io::Builder;

    fn client() -> SecureClient {
        SecureClient::new(ClientConfig::new("smtp.example.com"))
    }

    fn secure_client(mock: tokio_test::io::Mock) -> SecureClient {
        let mut client = client().with_log(Arc::new(MemoryLog::new()));
        client.session = Some(Session::new(mock, "smtp.example.com:587"));
        client.state = State::SecureEstablished;
        client
    }

    #[tokio::test]
    async fn identification_requires_tls() {
        let mut client = client();
        let err = client.get_server_secure_identification().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(client.state(), State::Plain);
    }

    #[tokio::test]
    async fn negotiation_requires_socket() {
        let mut client = client();
        let err = client.start_tls_negotiation().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(client.state(), State::Plain);
    }

    #[tokio::test]
    async fn negotiation_rejects_second_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attached = TcpStream::connect(addr).await.unwrap();
        let extra = TcpStream::connect(addr).await.unwrap();

        let mut client = SecureClient::from_socket(ClientConfig::new("smtp.example.com"), attached)
            .with_log(Arc::new(MemoryLog::new()));
        let backend = RustlsBackend::new(client.config().trust_store());
        let err = client.negotiate_with(backend, extra).await.unwrap_err();

        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(client.state(), State::Plain);
        assert!(client.socket.is_some());
        assert!(!client.has_session());

        client.cleanup().await;
        assert!(client.socket.is_none());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let mut client = client();
        client.cleanup().await;
        client.cleanup().await;
        assert_eq!(client.state(), State::Plain);
        assert!(!client.has_session());
    }

    #[tokio::test]
    async fn cleanup_releases_session() {
        let mut client = secure_client(Builder::new().build());
        client.cleanup().await;
        assert!(!client.has_session());
        assert_eq!(client.state(), State::Plain);
        client.cleanup().await;
        assert!(!client.has_session());
    }

    #[tokio::test]
    async fn identification_replaces_auth_options() {
        let mock = Builder::new()
            .write(b"ehlo localhost\r\n")
            .read(b"250-SIZE 10240\r\n250 AUTH LOGIN PLAIN\r\n")
            .write(b"ehlo localhost\r\n")
            .read(b"250 AUTH XOAUTH2\r\n")
            .build();
        let mut client = secure_client(mock);

        assert_eq!(
            client.get_server_secure_identification().await.unwrap(),
            ReplyCode::OK
        );
        assert_eq!(client.state(), State::SecureIdentified);
        assert_eq!(
            client.auth_options().iter().collect::<Vec<_>>(),
            vec!["LOGIN", "PLAIN"]
        );

        client.get_server_secure_identification().await.unwrap();
        assert_eq!(
            client.auth_options().iter().collect::<Vec<_>>(),
            vec!["XOAUTH2"]
        );
    }

    #[tokio::test]
    async fn non_250_reply_returned_as_is() {
        let mock = Builder::new()
            .write(b"ehlo localhost\r\n")
            .read(b"421 Service not available\r\n")
            .build();
        let mut client = secure_client(mock);

        let code = client.get_server_secure_identification().await.unwrap();
        assert_eq!(code, ReplyCode::SERVICE_UNAVAILABLE);
        assert_eq!(client.state(), State::SecureEstablished);
        assert!(client.auth_options().is_empty());
        assert_eq!(
            client.last_server_response().unwrap().code,
            ReplyCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn identification_timeout_fails_client() {
        let mock = Builder::new()
            .write(b"ehlo localhost\r\n")
            .wait(Duration::from_secs(3600))
            .build();
        let mut client = secure_client(mock);

        let err = client.get_server_secure_identification().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!client.has_session());
        assert_eq!(
            client.state(),
            State::Failed {
                status: crate::error::status::TIMEOUT
            }
        );
    }

    #[tokio::test]
    async fn send_command_over_tls() {
        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .write(b"RSET\r\n")
            .read(b"250 Flushed\r\n")
            .build();
        let mut client = secure_client(mock);

        client.send_command("NOOP\r\n").await.unwrap();
        let reply = client.send_command_with_feedback("RSET\r\n").await.unwrap();
        assert_eq!(reply.last_line(), "Flushed");
    }

    #[tokio::test]
    async fn clone_starts_plain() {
        let mock = Builder::new().build();
        let mut client = secure_client(mock);
        let copy = client.clone();

        assert_eq!(copy.state(), State::Plain);
        assert!(!copy.has_session());
        assert_eq!(copy.config().endpoint(), client.config().endpoint());
        assert!(client.has_session());
        client.cleanup().await;
    }
}

//! The established TLS session.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bound on the close-notify exchange during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte stream a [`Session`] can run over.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> SessionStream for T {}

/// An encrypted stream that passed the handshake and both certificate gates.
///
/// The stream owns the TLS state and the socket, so dropping a session
/// releases all of them together.
pub struct Session {
    stream: Box<dyn SessionStream>,
    identity: String,
}

impl Session {
    pub(crate) fn new(stream: impl SessionStream + 'static, identity: impl Into<String>) -> Self {
        Self {
            stream: Box::new(stream),
            identity: identity.into(),
        }
    }

    /// The `host:port` the session was negotiated for.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await
    }

    pub(crate) async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    /// Sends close-notify and shuts the socket down, then drops everything.
    pub async fn close(mut self) {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.stream.shutdown()).await {
            Ok(Ok(())) => tracing::debug!(identity = %self.identity, "TLS session closed"),
            Ok(Err(e)) => tracing::debug!(?e, identity = %self.identity, "TLS shutdown failed"),
            Err(_) => tracing::debug!(identity = %self.identity, "TLS shutdown timed out"),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

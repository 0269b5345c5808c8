//! Plaintext transport: TCP connect and the exchange that precedes STARTTLS.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::ServerInfo;
use super::config::Endpoint;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::log::{CommunicationLog, Side};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Extension, Reply, ReplyCode};

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails or does not finish within
/// `timeout`.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let addr = (endpoint.bare_host(), endpoint.port());
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout,
        })??;
    tracing::debug!(%endpoint, "plain connection established");
    Ok(stream)
}

/// Line-oriented SMTP exchange before the TLS upgrade.
#[derive(Debug)]
pub struct PlainChannel<S> {
    stream: BufReader<S>,
    log: Arc<dyn CommunicationLog>,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PlainChannel<S> {
    /// Wraps a connected stream.
    pub fn new(stream: S, log: Arc<dyn CommunicationLog>) -> Self {
        Self {
            stream: BufReader::new(stream),
            log,
            timeout: Duration::from_secs(u64::from(super::config::DEFAULT_COMMAND_TIMEOUT)),
        }
    }

    /// Sets how long to wait for each reply.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads the server greeting, expecting 220.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the server refuses service.
    pub async fn greeting(&mut self) -> Result<Reply> {
        let reply = self.read_reply().await?;
        expect(&reply, ReplyCode::SERVICE_READY)?;
        Ok(reply)
    }

    /// Identifies with EHLO, falling back to HELO for servers without ESMTP.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are refused.
    pub async fn ehlo(&mut self, client_hostname: &str) -> Result<ServerInfo> {
        let reply = self
            .send_command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        if reply.is_permanent_error() {
            tracing::debug!(code = %reply.code, "EHLO refused, trying HELO");
            let reply = self
                .send_command(&Command::Helo {
                    hostname: client_hostname.to_string(),
                })
                .await?;
            expect(&reply, ReplyCode::OK)?;
            return Ok(server_info(&reply, false));
        }

        expect(&reply, ReplyCode::OK)?;
        Ok(server_info(&reply, true))
    }

    /// Asks the server to begin TLS, expecting 220.
    ///
    /// # Errors
    ///
    /// Returns an error if the server declines.
    pub async fn starttls(&mut self) -> Result<Reply> {
        let reply = self.send_command(&Command::StartTls).await?;
        expect(&reply, ReplyCode::SERVICE_READY)?;
        Ok(reply)
    }

    /// Sends a command and reads its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or read fails.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        tracing::debug!(verb = cmd.verb(), "sending plaintext command");
        let data = cmd.serialize();
        self.log
            .add_item(Side::Client, &String::from_utf8_lossy(&data));
        let stream = self.stream.get_mut();
        stream.write_all(&data).await?;
        stream.flush().await?;
        self.read_reply().await
    }

    /// Reads one complete (possibly multi-line) reply.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, timeout or a malformed reply.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let secs = u32::try_from(self.timeout.as_secs()).unwrap_or(u32::MAX);
        let lines = tokio::time::timeout(self.timeout, self.read_lines())
            .await
            .map_err(|_| Error::Timeout(secs))??;

        let reply = parse_reply(&lines)?;
        self.log.add_item(Side::Server, &reply.raw);
        Ok(reply)
    }

    async fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let is_last = is_last_reply_line(line);
            lines.push(line.to_string());

            if is_last {
                return Ok(lines);
            }
        }
    }

    /// Returns the underlying stream, ready to be handed to the TLS layer.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

fn expect(reply: &Reply, code: ReplyCode) -> Result<()> {
    if reply.code == code {
        Ok(())
    } else {
        Err(Error::unexpected_reply(reply.code.as_u16(), reply.message_text()))
    }
}

/// Builds server info from an EHLO/HELO reply (first line is the greeting).
fn server_info(reply: &Reply, extended: bool) -> ServerInfo {
    let hostname = reply
        .message
        .first()
        .and_then(|msg| msg.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string();

    let extensions = if extended {
        reply.message.iter().skip(1).map(|line| Extension::parse(line)).collect()
    } else {
        HashSet::new()
    };

    ServerInfo {
        hostname,
        extensions,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::types::AuthMechanism;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn prelude_up_to_starttls() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .read(b"220 smtp.example.com ESMTP ready\r\n")
            .write(b"EHLO localhost\r\n")
            .read(b"250-smtp.example.com Hello\r\n250-SIZE 10240\r\n250-STARTTLS\r\n250 AUTH PLAIN LOGIN\r\n")
            .write(b"STARTTLS\r\n")
            .read(b"220 Ready to start TLS\r\n")
            .build();
        let mut channel = PlainChannel::new(mock, Arc::new(log.clone()));

        channel.greeting().await.unwrap();
        let info = channel.ehlo("localhost").await.unwrap();
        assert_eq!(info.hostname, "smtp.example.com");
        assert!(info.supports_starttls());
        assert_eq!(info.max_message_size(), Some(10240));
        assert!(info.auth_mechanisms().contains(&AuthMechanism::Plain));

        let reply = channel.starttls().await.unwrap();
        assert_eq!(reply.code, ReplyCode::SERVICE_READY);
        assert!(log.contains("Ready to start TLS"));
    }

    #[tokio::test]
    async fn helo_fallback() {
        let mock = Builder::new()
            .write(b"EHLO localhost\r\n")
            .read(b"502 Command not implemented\r\n")
            .write(b"HELO localhost\r\n")
            .read(b"250 old.example.com\r\n")
            .build();
        let mut channel = PlainChannel::new(mock, Arc::new(MemoryLog::new()));

        let info = channel.ehlo("localhost").await.unwrap();
        assert_eq!(info.hostname, "old.example.com");
        assert!(info.extensions.is_empty());
    }

    #[tokio::test]
    async fn starttls_refused() {
        let mock = Builder::new()
            .write(b"STARTTLS\r\n")
            .read(b"454 TLS not available\r\n")
            .build();
        let mut channel = PlainChannel::new(mock, Arc::new(MemoryLog::new()));

        let err = channel.starttls().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedReply { code: 454, .. }));
    }

    #[tokio::test]
    async fn eof_is_an_error() {
        let mock = Builder::new().build();
        let mut channel = PlainChannel::new(mock, Arc::new(MemoryLog::new()));
        assert!(matches!(channel.greeting().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn connects_to_ipv6_literal() {
        let Ok(listener) = tokio::net::TcpListener::bind("[::1]:0").await else {
            // No IPv6 loopback on this host.
            return;
        };
        let port = listener.local_addr().unwrap().port();

        let stream = connect(&Endpoint::new("::1", port), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(stream.peer_addr().unwrap().is_ipv6());
    }

    #[tokio::test]
    async fn connects_to_ipv4_host() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let mock = Builder::new().wait(Duration::from_secs(60)).build();
        let mut channel =
            PlainChannel::new(mock, Arc::new(MemoryLog::new())).with_timeout(Duration::from_secs(5));
        assert!(matches!(channel.greeting().await, Err(Error::Timeout(5))));
    }
}

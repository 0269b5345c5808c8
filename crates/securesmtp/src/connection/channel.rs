//! Command/response exchange over an established TLS session.
//!
//! Reads poll in one-second steps: each step is a read bounded to one
//! second, an empty or failed read sleeps out the step, and the elapsed
//! counter is compared with the command timeout. Every failure tears the
//! session down before returning.

use std::time::Duration;

use tokio::time;

use super::session::Session;
use crate::error::{Error, Result};
use crate::log::{CommunicationLog, Side};
use crate::parser::{parse_response, strip_line_terminator};
use crate::types::Reply;

/// Largest chunk taken from the stream per read.
pub const READ_BUFFER_SIZE: usize = 1024;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Borrows a session slot for one exchange.
///
/// Teardown empties the slot, so the owner sees the session gone.
#[derive(Debug)]
pub struct CommandChannel<'a> {
    slot: &'a mut Option<Session>,
    log: &'a dyn CommunicationLog,
}

impl<'a> CommandChannel<'a> {
    /// Creates a channel over `slot`.
    pub fn new(slot: &'a mut Option<Session>, log: &'a dyn CommunicationLog) -> Self {
        Self { slot, log }
    }

    /// Writes `line` without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Send`] after tearing the session down if the write
    /// fails, or [`Error::InvalidState`] if there is no session.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        let session = self
            .slot
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No TLS session".into()))?;

        let written = session.write_line(line).await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "write to TLS session failed");
            self.teardown().await;
            return Err(Error::Send(e));
        }

        self.log.add_item(Side::Client, line);
        Ok(())
    }

    /// Writes `line` and waits up to `timeout_secs` seconds for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Send`], [`Error::Timeout`] or
    /// [`Error::MalformedReply`]; the session is torn down in each case.
    pub async fn send_with_feedback(&mut self, line: &str, timeout_secs: u32) -> Result<Reply> {
        self.send(line).await?;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let Some(received) = self.poll_read(&mut buf, timeout_secs).await else {
            tracing::warn!(timeout_secs, "no reply from server");
            self.teardown().await;
            return Err(Error::Timeout(timeout_secs));
        };

        let text = String::from_utf8_lossy(strip_line_terminator(&buf[..received])).into_owned();
        self.log.add_item(Side::Server, &text);

        match parse_response(&text) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn poll_read(&mut self, buf: &mut [u8], timeout_secs: u32) -> Option<usize> {
        let session = self.slot.as_mut()?;
        let mut elapsed = 0;
        while elapsed < timeout_secs {
            match time::timeout(POLL_INTERVAL, session.read_some(buf)).await {
                Ok(Ok(n)) if n > 0 => return Some(n),
                Ok(Ok(_)) => time::sleep(POLL_INTERVAL).await,
                Ok(Err(e)) => {
                    tracing::trace!(error = %e, "read from TLS session failed");
                    time::sleep(POLL_INTERVAL).await;
                }
                Err(_) => {}
            }
            elapsed += 1;
        }
        None
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.slot.take() {
            tracing::debug!(identity = session.identity(), "tearing down TLS session");
            session.close().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::types::ReplyCode;
    use tokio::time::Instant;
    use tokio_test::io::Builder;

    fn session(mock: tokio_test::io::Mock) -> Option<Session> {
        Some(Session::new(mock, "smtp.example.com:587"))
    }

    #[tokio::test]
    async fn send_writes_line() {
        let log = MemoryLog::new();
        let mut slot = session(Builder::new().write(b"NOOP\r\n").build());

        CommandChannel::new(&mut slot, &log)
            .send("NOOP\r\n")
            .await
            .unwrap();

        assert!(slot.is_some());
        assert!(log.contains("NOOP"));
    }

    #[tokio::test]
    async fn send_failure_tears_down() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reset",
            ))
            .build();
        let mut slot = session(mock);

        let err = CommandChannel::new(&mut slot, &log)
            .send("NOOP\r\n")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Send(_)));
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn send_without_session() {
        let log = MemoryLog::new();
        let mut slot = None;
        let err = CommandChannel::new(&mut slot, &log)
            .send("NOOP\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn feedback_parses_reply() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .write(b"ehlo localhost\r\n")
            .read(b"250-SIZE 10240\r\n250 AUTH LOGIN PLAIN\r\n")
            .build();
        let mut slot = session(mock);

        let reply = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("ehlo localhost\r\n", 3)
            .await
            .unwrap();

        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.raw, "250-SIZE 10240\r\n250 AUTH LOGIN PLAIN");
        assert!(slot.is_some());
        assert!(log.contains("250 AUTH LOGIN PLAIN"));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_just_before_timeout_succeeds() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .wait(Duration::from_secs(2))
            .read(b"250 OK\r\n")
            .build();
        let mut slot = session(mock);

        let reply = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("NOOP\r\n", 3)
            .await
            .unwrap();

        assert_eq!(reply.code, ReplyCode::OK);
        assert!(slot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_and_tears_down() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .wait(Duration::from_secs(3600))
            .build();
        let mut slot = session(mock);
        let start = Instant::now();

        let err = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("NOOP\r\n", 3)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(slot.is_none());
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_times_out() {
        let log = MemoryLog::new();
        let mut slot = session(Builder::new().write(b"NOOP\r\n").build());

        let err = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("NOOP\r\n", 2)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(2)));
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn zero_timeout_never_reads() {
        let log = MemoryLog::new();
        let mut slot = session(Builder::new().write(b"NOOP\r\n").build());

        let err = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("NOOP\r\n", 0)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn reply_without_newline_keeps_last_byte() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .read(b"250 OK")
            .build();
        let mut slot = session(mock);

        let reply = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("NOOP\r\n", 3)
            .await
            .unwrap();

        assert_eq!(reply.last_line(), "OK");
    }

    #[tokio::test]
    async fn malformed_reply_tears_down() {
        let log = MemoryLog::new();
        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .read(b"hello there\r\n")
            .build();
        let mut slot = session(mock);

        let err = CommandChannel::new(&mut slot, &log)
            .send_with_feedback("NOOP\r\n", 3)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedReply(_)));
        assert!(slot.is_none());
    }
}

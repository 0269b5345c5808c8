//! Server replies.

use std::fmt;

/// A complete server reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit code (of the last line for multi-line replies).
    pub code: ReplyCode,
    /// Free text of each line, code and separator removed.
    pub message: Vec<String>,
    /// Reply as received, trailing line terminator stripped.
    pub raw: String,
}

impl Reply {
    /// Builds a reply and renders its wire form into `raw`.
    #[must_use]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        let mut raw = String::new();
        for (i, line) in message.iter().enumerate() {
            if i > 0 {
                raw.push_str("\r\n");
            }
            let sep = if i + 1 == message.len() { ' ' } else { '-' };
            raw.push_str(&format!("{code}{sep}{line}"));
        }
        Self { code, message, raw }
    }

    /// Builds a reply that keeps the received text verbatim.
    #[must_use]
    pub fn with_raw(code: ReplyCode, message: Vec<String>, raw: impl Into<String>) -> Self {
        Self {
            code,
            message,
            raw: raw.into(),
        }
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// All lines joined with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Free text of the last line.
    #[must_use]
    pub fn last_line(&self) -> &str {
        self.message.last().map_or("", String::as_str)
    }
}

/// Three-digit SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready (greeting, STARTTLS go-ahead).
    pub const SERVICE_READY: Self = Self(220);
    /// 250 Requested action completed.
    pub const OK: Self = Self(250);
    /// 421 Service not available.
    pub const SERVICE_UNAVAILABLE: Self = Self(421);

    /// Wraps a numeric code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// First digit of the code.
    #[must_use]
    pub const fn class(self) -> u16 {
        self.0 / 100
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.class() == 2
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.class() == 5
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

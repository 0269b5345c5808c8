//! SMTP response parser.

use crate::error::{Error, Result};
use crate::types::{AuthOptions, Reply, ReplyCode};

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::MalformedReply("Empty reply".into()));
    };
    let code = parse_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if line.len() > 4 {
            // Skip code and separator (e.g., "250-" or "250 ")
            message.push(line.get(4..).unwrap_or_default().to_string());
        } else if line.len() == 3 {
            message.push(String::new());
        } else {
            return Err(Error::MalformedReply(format!("Malformed reply line: {line}")));
        }
    }

    Ok(Reply::with_raw(code, message, lines.join("\r\n")))
}

/// Parses the text of one read from the secure channel.
///
/// The reply code comes from the last non-empty line; earlier lines only
/// contribute their text. Lines cut short by the read boundary are kept as
/// far as they go.
///
/// # Errors
///
/// Returns an error if there is no line or the last one does not start with
/// three digits.
pub fn parse_response(raw: &str) -> Result<Reply> {
    let lines: Vec<&str> = raw.lines().filter(|line| !line.is_empty()).collect();
    let Some(last) = lines.last() else {
        return Err(Error::MalformedReply("Empty reply".into()));
    };
    let code = parse_code(last)?;

    let message = lines
        .iter()
        .map(|line| line.get(4..).unwrap_or_default().to_string())
        .collect();

    Ok(Reply::with_raw(code, message, raw))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last line.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
}

/// Drops one trailing line terminator (`\n` or `\r\n`) from a read buffer.
///
/// A buffer that does not end in `\n` is returned unchanged, so the last
/// byte of a reply cut off mid-line is never lost.
#[must_use]
pub fn strip_line_terminator(buf: &[u8]) -> &[u8] {
    match buf {
        [rest @ .., b'\r', b'\n'] | [rest @ .., b'\n'] => rest,
        _ => buf,
    }
}

/// Extracts the authentication mechanisms from an EHLO reply.
///
/// Recognizes both `AUTH LOGIN PLAIN` and the legacy `AUTH=LOGIN PLAIN`
/// capability forms.
#[must_use]
pub fn extract_auth_options(reply: &Reply) -> AuthOptions {
    let mut options = AuthOptions::new();
    for line in &reply.message {
        let Some(keyword) = line.get(..5) else {
            continue;
        };
        if keyword.eq_ignore_ascii_case("AUTH ") || keyword.eq_ignore_ascii_case("AUTH=") {
            for name in line[5..].split_whitespace() {
                options.insert(name);
            }
        }
    }
    options
}

fn parse_code(line: &str) -> Result<ReplyCode> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::MalformedReply(format!("Invalid reply code: {line}")))?;

    digits
        .parse::<u16>()
        .map(ReplyCode::new)
        .map_err(|_| Error::MalformedReply(format!("Invalid reply code: {digits}")))
}

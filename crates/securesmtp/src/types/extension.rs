//! EHLO keywords and advertised authentication mechanisms.

use std::collections::BTreeSet;

/// Service extension from a plaintext EHLO reply line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS
    StartTls,
    /// AUTH with the mechanisms this crate recognizes.
    Auth(Vec<AuthMechanism>),
    /// SIZE, with the limit if one was given.
    Size(Option<usize>),
    /// 8BITMIME
    EightBitMime,
    /// PIPELINING
    Pipelining,
    /// SMTPUTF8
    SmtpUtf8,
    /// Any other keyword, line kept as received.
    Unknown(String),
}

impl Extension {
    /// Parses one EHLO line (code and separator already removed).
    ///
    /// Accepts the legacy `AUTH=` spelling alongside `AUTH`.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (keyword, params) = match line.find([' ', '=']) {
            Some(at) => (&line[..at], line[at + 1..].trim()),
            None => (line, ""),
        };

        if keyword.eq_ignore_ascii_case("STARTTLS") {
            Self::StartTls
        } else if keyword.eq_ignore_ascii_case("AUTH") {
            Self::Auth(
                params
                    .split_whitespace()
                    .filter_map(AuthMechanism::parse)
                    .collect(),
            )
        } else if keyword.eq_ignore_ascii_case("SIZE") {
            Self::Size(params.parse().ok())
        } else if keyword.eq_ignore_ascii_case("8BITMIME") {
            Self::EightBitMime
        } else if keyword.eq_ignore_ascii_case("PIPELINING") {
            Self::Pipelining
        } else if keyword.eq_ignore_ascii_case("SMTPUTF8") {
            Self::SmtpUtf8
        } else {
            Self::Unknown(line.to_string())
        }
    }
}

/// SASL mechanism this crate has a name for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN
    Plain,
    /// LOGIN
    Login,
    /// CRAM-MD5
    CramMd5,
    /// `XOAUTH2`
    XOAuth2,
    /// `OAUTHBEARER`
    OAuthBearer,
}

impl AuthMechanism {
    const NAMES: [(Self, &'static str); 5] = [
        (Self::Plain, "PLAIN"),
        (Self::Login, "LOGIN"),
        (Self::CramMd5, "CRAM-MD5"),
        (Self::XOAuth2, "XOAUTH2"),
        (Self::OAuthBearer, "OAUTHBEARER"),
    ];

    /// Looks a mechanism up by name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(name))
            .map(|(mechanism, _)| *mechanism)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::XOAuth2 => "XOAUTH2",
            Self::OAuthBearer => "OAUTHBEARER",
        }
    }
}

/// Authentication mechanisms advertised by the server.
///
/// Names are kept upper-cased and deduplicated, including ones this crate
/// has no [`AuthMechanism`] for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOptions(BTreeSet<String>);

impl AuthOptions {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a mechanism name.
    pub fn insert(&mut self, name: &str) {
        self.0.insert(name.to_ascii_uppercase());
    }

    /// Checks if a mechanism name was advertised (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_uppercase())
    }

    /// Iterates over the advertised names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of advertised mechanisms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for AuthOptions {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut options = Self::new();
        for name in iter {
            options.insert(name);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
        assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        assert_eq!(Extension::parse("8bitmime"), Extension::EightBitMime);
        assert_eq!(Extension::parse("SMTPUTF8"), Extension::SmtpUtf8);
    }

    #[test]
    fn auth_in_both_spellings() {
        let expected = Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login]);
        assert_eq!(Extension::parse("AUTH PLAIN LOGIN"), expected);
        assert_eq!(Extension::parse("AUTH=PLAIN LOGIN"), expected);
        assert_eq!(
            Extension::parse("AUTH NTLM"),
            Extension::Auth(Vec::new())
        );
    }

    #[test]
    fn size_limit() {
        assert_eq!(
            Extension::parse("SIZE 52428800"),
            Extension::Size(Some(52_428_800))
        );
        assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
    }

    #[test]
    fn unknown_keeps_line() {
        assert_eq!(
            Extension::parse("X-CUSTOM 1"),
            Extension::Unknown("X-CUSTOM 1".into())
        );
        assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
    }

    #[test]
    fn mechanism_names() {
        for (mechanism, name) in AuthMechanism::NAMES {
            assert_eq!(mechanism.as_str(), name);
            assert_eq!(AuthMechanism::parse(&name.to_lowercase()), Some(mechanism));
        }
        assert_eq!(AuthMechanism::parse("GSSAPI"), None);
    }

    #[test]
    fn options_normalize_case() {
        let mut options = AuthOptions::new();
        options.insert("plain");
        options.insert("PLAIN");
        assert_eq!(options.len(), 1);
        assert!(options.contains("Plain"));
    }

    #[test]
    fn options_keep_unknown_names() {
        let options: AuthOptions = ["NTLM", "LOGIN"].into_iter().collect();
        assert!(options.contains("ntlm"));
        assert_eq!(options.iter().collect::<Vec<_>>(), ["LOGIN", "NTLM"]);
        assert!(AuthOptions::default().is_empty());
    }
}

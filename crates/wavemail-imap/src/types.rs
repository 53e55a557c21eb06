//! Core protocol types shared across the engine.

use std::collections::HashSet;
use std::fmt;

/// Terminal status of a tagged server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol or syntax error).
    Bad,
}

impl Status {
    /// Parses the status word of a tagged response.
    #[must_use]
    pub(crate) fn parse(word: &[u8]) -> Option<Self> {
        if word.starts_with(b"OK") {
            Some(Self::Ok)
        } else if word.starts_with(b"NO") {
            Some(Self::No)
        } else if word.starts_with(b"BAD") {
            Some(Self::Bad)
        } else {
            None
        }
    }

    /// Returns `true` for a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns the canonical status word.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed command response: the tagged status plus the raw response
/// payload collected while the command was in flight, one entry per line
/// or literal, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Tagged completion status.
    pub result: Status,
    /// Raw response payload.
    pub lines: Vec<Vec<u8>>,
}

/// One delivery from the IDLE push queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPush {
    /// A batch of untagged lines, in arrival order, partitioned by the
    /// parser deliveries that ended them.
    Batch(Vec<Vec<u8>>),
    /// Sentinel: stop waiting and terminate IDLE (inactivity timer fired
    /// or the connection is going away).
    Stop,
}

impl ServerPush {
    /// Returns `true` for the stop sentinel.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Negotiated IMAP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapVersion {
    /// `IMAP4rev1` (RFC 3501).
    Imap4Rev1,
    /// `IMAP4` (RFC 1730).
    Imap4,
}

impl ImapVersion {
    /// Parses a capability token into a version, case-insensitively.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("IMAP4REV1") {
            Some(Self::Imap4Rev1)
        } else if token.eq_ignore_ascii_case("IMAP4") {
            Some(Self::Imap4)
        } else {
            None
        }
    }

    /// Returns the canonical token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Imap4Rev1 => "IMAP4REV1",
            Self::Imap4 => "IMAP4",
        }
    }
}

impl fmt::Display for ImapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of capability tokens advertised by the server.
///
/// Tokens are kept as received; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(HashSet<String>);

impl Capabilities {
    /// Returns `true` if the server advertised `name`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|token| token.eq_ignore_ascii_case(name))
    }

    /// Replaces the set with the given tokens.
    pub(crate) fn replace<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0 = tokens.into_iter().map(Into::into).collect();
    }

    /// Unions the given tokens into the set.
    pub(crate) fn merge<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(tokens.into_iter().map(Into::into));
    }

    /// Iterates over the tokens.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no capabilities have been discovered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(Status::parse(b"OK"), Some(Status::Ok));
        assert_eq!(Status::parse(b"NO"), Some(Status::No));
        assert_eq!(Status::parse(b"BAD"), Some(Status::Bad));
        assert_eq!(Status::parse(b"PREAUTH"), None);
    }

    #[test]
    fn test_status_is_ok() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::No.is_ok());
        assert!(!Status::Bad.is_ok());
    }

    #[test]
    fn test_imap_version_parse() {
        assert_eq!(ImapVersion::parse("IMAP4rev1"), Some(ImapVersion::Imap4Rev1));
        assert_eq!(ImapVersion::parse("imap4"), Some(ImapVersion::Imap4));
        assert_eq!(ImapVersion::parse("IDLE"), None);
    }

    #[test]
    fn test_capabilities_case_insensitive() {
        let mut caps = Capabilities::default();
        caps.replace(["IMAP4rev1", "IDLE", "UIDPLUS"]);
        assert!(caps.has("idle"));
        assert!(caps.has("IMAP4REV1"));
        assert!(!caps.has("MOVE"));
        assert_eq!(caps.len(), 3);
    }

    #[test]
    fn test_capabilities_merge() {
        let mut caps = Capabilities::default();
        caps.replace(["IMAP4rev1"]);
        caps.merge(["IDLE", "IMAP4rev1"]);
        assert_eq!(caps.len(), 2);
        assert!(caps.has("IDLE"));
    }

    #[test]
    fn test_server_push_is_stop() {
        assert!(ServerPush::Stop.is_stop());
        assert!(!ServerPush::Batch(vec![b"1 EXISTS".to_vec()]).is_stop());
    }
}

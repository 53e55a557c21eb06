//! Incremental parser helpers.
//!
//! The receive loop in [`crate::protocol`] splits transport bytes into
//! logical lines and literal blobs; the recognizers here classify each
//! line. All functions are pure byte scanners so the loop itself never
//! allocates for classification.

/// Finds the position of CRLF in a buffer.
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Returns `true` if `needle` occurs anywhere in `haystack`.
pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Parses a trailing literal marker `{n}` at the end of a line (CRLF
/// already stripped). The next `n` bytes on the wire belong to the
/// literal, CRLFs included.
pub(crate) fn trailing_literal_len(line: &[u8]) -> Option<usize> {
    if !line.ends_with(b"}") {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..line.len() - 1];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Returns `true` for a tagged status response: `<tag> (OK|NO|BAD) …`.
pub(crate) fn is_tagged_status(line: &[u8]) -> bool {
    let Some(sp) = line.iter().position(|&b| b == b' ') else {
        return false;
    };
    if sp == 0 || !line[..sp].iter().all(u8::is_ascii_alphanumeric) {
        return false;
    }
    let rest = &line[sp + 1..];
    rest.starts_with(b"OK") || rest.starts_with(b"NO") || rest.starts_with(b"BAD")
}

/// Recognizes message-data untagged responses `<num> (FETCH|EXPUNGE) …`
/// and returns the verb they route by.
pub(crate) fn message_data_verb(line: &[u8]) -> Option<&'static str> {
    let sp = line.iter().position(|&b| b == b' ')?;
    if sp == 0 || !line[..sp].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let rest = &line[sp + 1..];
    if rest.starts_with(b"FETCH") {
        Some("FETCH")
    } else if rest.starts_with(b"EXPUNGE") {
        Some("EXPUNGE")
    } else {
        None
    }
}

/// Returns `true` for lines that open FETCH message data: `<num> FETCH (`.
pub(crate) fn is_fetch_data_line(line: &[u8]) -> bool {
    let Some(sp) = line.iter().position(|&b| b == b' ') else {
        return false;
    };
    sp > 0 && line[..sp].iter().all(u8::is_ascii_digit) && line[sp + 1..].starts_with(b"FETCH (")
}

/// Returns `true` once `(` and `)` counts balance across the data.
pub(crate) fn matched_parenthesis(data: &[u8]) -> bool {
    let open = data.iter().filter(|&&b| b == b'(').count();
    let close = data.iter().filter(|&&b| b == b')').count();
    open == close
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no newline"), None);
        assert_eq!(find_crlf(b"just\n"), None);
        assert_eq!(find_crlf(b"just\r"), None);
    }

    #[test]
    fn test_contains() {
        assert!(contains(b"* OK PREAUTH ready", b"PREAUTH"));
        assert!(!contains(b"* OK ready", b"PREAUTH"));
        assert!(!contains(b"anything", b""));
    }

    #[test]
    fn test_trailing_literal_len() {
        assert_eq!(trailing_literal_len(b"1 FETCH (RFC822 {368}"), Some(368));
        assert_eq!(trailing_literal_len(b"{0}"), Some(0));
        assert_eq!(trailing_literal_len(b"no literal"), None);
        assert_eq!(trailing_literal_len(b"midline {12} trailing"), None);
        assert_eq!(trailing_literal_len(b"bad {abc}"), None);
        assert_eq!(trailing_literal_len(b"empty {}"), None);
        // non-synchronizing markers are a client-to-server construct
        assert_eq!(trailing_literal_len(b"plus {12+}"), None);
    }

    #[test]
    fn test_is_tagged_status() {
        assert!(is_tagged_status(b"ABCD1 OK LOGIN completed"));
        assert!(is_tagged_status(b"T2 NO no such mailbox"));
        assert!(is_tagged_status(b"T3 BAD syntax"));
        assert!(!is_tagged_status(b"* OK untagged"));
        assert!(!is_tagged_status(b"+ idling"));
        assert!(!is_tagged_status(b"ABCD1 PREAUTH"));
        assert!(!is_tagged_status(b"nospace"));
    }

    #[test]
    fn test_message_data_verb() {
        assert_eq!(message_data_verb(b"1 FETCH (FLAGS (\\Seen))"), Some("FETCH"));
        assert_eq!(message_data_verb(b"23 EXPUNGE"), Some("EXPUNGE"));
        assert_eq!(message_data_verb(b"1 EXISTS"), None);
        assert_eq!(message_data_verb(b"CAPABILITY IMAP4rev1"), None);
    }

    #[test]
    fn test_is_fetch_data_line() {
        assert!(is_fetch_data_line(b"1 FETCH (UID 1 RFC822 {368}"));
        assert!(!is_fetch_data_line(b"1 FETCH"));
        assert!(!is_fetch_data_line(b"x FETCH ("));
    }

    #[test]
    fn test_matched_parenthesis() {
        assert!(matched_parenthesis(b"1 FETCH (FLAGS (\\Seen))"));
        assert!(!matched_parenthesis(b"1 FETCH (UID 1 RFC822 {368}"));
        assert!(matched_parenthesis(b""));
    }
}

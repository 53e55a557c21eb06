//! Encoding helpers for command arguments.
//!
//! Covers RFC 3501 quoted strings, RFC 2971 ID field lists, and the
//! INTERNALDATE format used by APPEND.

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};

use crate::{Error, Result};

/// Maximum number of field/value pairs in an ID command (RFC 2971).
pub const ID_MAX_PAIRS_COUNT: usize = 30;
/// Maximum quoted length of an ID field name.
pub const ID_MAX_FIELD_LEN: usize = 30;
/// Maximum quoted length of an ID field value.
pub const ID_MAX_VALUE_LEN: usize = 1024;

/// Quotes a string per RFC 3501 section 9: backslash-escapes `\` and `"`
/// and surrounds the result with double quotes.
#[must_use]
pub fn quoted(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Builds the argument of an RFC 2971 ID command: `(F1 V1 F2 V2 …)` with
/// quoted fields and values (`NIL` for absent values), or `NIL` when no
/// fields are given.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when more than 30 pairs are given, a quoted
/// field exceeds 30 characters, or a quoted value exceeds 1024 characters.
pub fn id_fields(fields: &[(&str, Option<&str>)]) -> Result<String> {
    if fields.is_empty() {
        return Ok("NIL".to_string());
    }
    if fields.len() > ID_MAX_PAIRS_COUNT {
        return Err(Error::Protocol(
            "must not send more than 30 field-value pairs".to_string(),
        ));
    }
    let mut parts = Vec::with_capacity(fields.len() * 2);
    for (field, value) in fields {
        let field = quoted(field);
        let value = value.map_or_else(|| "NIL".to_string(), quoted);
        if field.len() > ID_MAX_FIELD_LEN {
            return Err(Error::Protocol(format!(
                "field {field} must not be longer than 30"
            )));
        }
        if value.len() > ID_MAX_VALUE_LEN {
            return Err(Error::Protocol(format!(
                "field {field} value must not be longer than 1024"
            )));
        }
        parts.push(field);
        parts.push(value);
    }
    Ok(format!("({})", parts.join(" ")))
}

/// An INTERNALDATE input for APPEND.
///
/// Only offset-aware datetimes are representable; there is no naive
/// variant to reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalDate {
    /// Seconds since the Unix epoch, rendered in the local timezone.
    Epoch(i64),
    /// An offset-aware datetime.
    DateTime(DateTime<FixedOffset>),
    /// An already-quoted INTERNALDATE string, passed through unchanged.
    Quoted(String),
}

impl From<DateTime<FixedOffset>> for InternalDate {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<DateTime<Utc>> for InternalDate {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt.fixed_offset())
    }
}

impl From<DateTime<Local>> for InternalDate {
    fn from(dt: DateTime<Local>) -> Self {
        Self::DateTime(dt.fixed_offset())
    }
}

/// Formats an [`InternalDate`] as `"DD-Mon-YYYY HH:MM:SS +HHMM"` (month
/// in English three-letter abbreviation, quotes included).
///
/// # Errors
///
/// Returns [`Error::Protocol`] for an out-of-range epoch value or a
/// passthrough string that is not double-quoted.
pub fn internaldate(date: &InternalDate) -> Result<String> {
    const FMT: &str = "%d-%b-%Y %H:%M:%S %z";
    match date {
        InternalDate::Epoch(secs) => {
            let dt = Local
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| Error::Protocol(format!("timestamp {secs} out of range")))?;
            Ok(format!("\"{}\"", dt.format(FMT)))
        }
        InternalDate::DateTime(dt) => Ok(format!("\"{}\"", dt.format(FMT))),
        InternalDate::Quoted(s) => {
            if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
                Ok(s.clone())
            } else {
                Err(Error::Protocol(format!(
                    "not a quoted INTERNALDATE string: {s}"
                )))
            }
        }
    }
}

//! Error types for the IMAP protocol engine.

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The server sent something structurally impossible: an unknown tag,
    /// a tag collision, or a malformed greeting. The stream can no longer
    /// be kept aligned and the connection is abandoned.
    #[error("protocol abort: {0}")]
    Abort(String),

    /// A recoverable protocol-level failure: command illegal in the current
    /// state, a feature gated by a missing capability, or invalid arguments.
    /// The connection remains usable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A command deadline or caller-side wait expired.
    #[error("command timed out: {0}")]
    CommandTimeout(String),

    /// The transport dropped while commands were pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

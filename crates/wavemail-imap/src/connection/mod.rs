//! Transport establishment for IMAP connections.
//!
//! The protocol engine treats the transport as an external collaborator:
//! anything `AsyncRead + AsyncWrite` works. This module provides the
//! usual concrete choices (plain TCP, implicit TLS, STARTTLS upgrade) and
//! the connection configuration.

mod config;
mod stream;

pub use config::{Config, ConfigBuilder, DEFAULT_TIMEOUT, Security};
pub use stream::{ImapStream, connect, connect_plain, connect_tls};

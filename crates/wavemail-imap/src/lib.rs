//! # wavemail-imap
//!
//! An asynchronous IMAP4rev1 (RFC 3501) client protocol engine with the
//! commonly deployed extensions: IDLE (RFC 2177), UIDPLUS, MOVE (RFC
//! 6851), NAMESPACE (RFC 2342), ENABLE (RFC 5161), ID (RFC 2971),
//! XOAUTH2, and TLS/STARTTLS transports.
//!
//! The crate is the *engine*, not a mail library: it multiplexes tagged
//! commands over one byte stream, incrementally parses the server's
//! line-oriented, literal-bearing response grammar, enforces the client
//! state machine, and hands back raw response bytes. MIME parsing,
//! storage, and synchronization live elsewhere.
//!
//! ## Features
//!
//! - **Restartable parser**: `{n}` literals may split anywhere across
//!   network reads, embed CRLFs, and be followed by more response text
//! - **Tag-based demultiplexing**: one synchronous command at a time,
//!   parallel asynchronous commands keyed by untagged-response name,
//!   per-command deadlines
//! - **IDLE push**: unsolicited EXISTS/EXPUNGE/FETCH events stream to a
//!   queue in arrival-order batches, with a 29-minute inactivity watchdog
//! - **TLS via rustls**: implicit TLS or STARTTLS upgrade, no OpenSSL
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use wavemail_imap::{Client, Config, ServerPush};
//!
//! #[tokio::main]
//! async fn main() -> wavemail_imap::Result<()> {
//!     let config = Config::new("imap.example.com");
//!     let client = Client::connect(&config).await?;
//!
//!     client.login("user@example.com", "password").await?;
//!     client.select("INBOX").await?;
//!
//!     let response = client.fetch("1:10", "(UID FLAGS RFC822.SIZE)").await?;
//!     for line in &response.lines {
//!         println!("{}", String::from_utf8_lossy(line));
//!     }
//!
//!     if client.has_capability("IDLE") {
//!         let idle = client.idle_start(Duration::from_secs(60)).await?;
//!         match client.wait_server_push(Duration::from_secs(60)).await? {
//!             ServerPush::Batch(lines) => println!("{} new events", lines.len()),
//!             ServerPush::Stop => {}
//!         }
//!         client.idle_done();
//!         idle.await.ok();
//!     }
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! All protocol state sits behind one mutex touched from the reader task
//! and from submitting callers; dispatch never suspends. Commands park on
//! per-command completion signals, so the IMAP concurrency rules reduce
//! to sequential bookkeeping:
//!
//! ```text
//! transport ──▶ incremental parser ──▶ dispatch ──▶ Command accumulator
//!                                          │               │
//!                                          ├──▶ IDLE queue ▼
//!                                          └──▶ state machine ──▶ waiters
//! ```
//!
//! ## Modules
//!
//! - [`client`]: command submission, scheduling, and the verb API
//! - [`command`]: in-flight command objects and the admission table
//! - [`connection`]: transport configuration and TLS streams
//! - [`encode`]: quoted strings, ID fields, INTERNALDATE
//! - [`protocol`]: dispatch core and connection states
//! - [`types`]: response, status, capability, and push types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod command;
pub mod connection;
pub mod encode;
mod error;
mod parse;
pub mod protocol;
pub mod types;

pub use client::{Client, ConnectionLostCallback, TWENTY_NINE_MINUTES, extract_exists};
pub use command::{CommandSpec, ExecMode, TagGenerator, command_spec};
pub use connection::{Config, ConfigBuilder, ImapStream, Security, connect_plain, connect_tls};
pub use encode::{InternalDate, id_fields, internaldate, quoted};
pub use error::{Error, Result};
pub use protocol::ConnectionState;
pub use types::{Capabilities, ImapVersion, Response, ServerPush, Status};

/// Default IMAP port (cleartext or STARTTLS).
pub const IMAP4_PORT: u16 = 143;
/// Default IMAPS port (implicit TLS).
pub const IMAP4_SSL_PORT: u16 = 993;

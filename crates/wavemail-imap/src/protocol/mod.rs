//! Dispatch core: state machine, pending registry, and the incremental
//! receive loop.
//!
//! [`Protocol`] is the synchronous heart of the engine. It is fed raw
//! transport bytes, splits them into logical lines and literal blobs, and
//! routes each to the pending command it belongs to. It never performs I/O
//! and never suspends: outbound bytes go to an unbounded queue drained by
//! the writer task, and the rare dispatch step that requires issuing a new
//! command (the implicit CAPABILITY after the greeting) is returned to the
//! caller as a [`Followup`].
//!
//! All state here is owned by one mutex; the reader task and command
//! submitters take turns, so the IMAP concurrency rules reduce to plain
//! sequential bookkeeping.

mod state;

pub use state::ConnectionState;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::command::{Command, CommandStatus, TagGenerator};
use crate::parse;
use crate::types::{Capabilities, ImapVersion, ServerPush, Status};
use crate::{Error, Result};

/// Shared handle to an in-flight command.
pub(crate) type CommandRef = Arc<Mutex<Command>>;

/// Locks a mutex, ignoring poisoning (protocol state stays consistent
/// because dispatch never panics mid-update in release builds).
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Follow-up actions the dispatch path requests from the task that owns
/// the transport. Dispatch itself never suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Followup {
    /// The greeting was processed; issue the implicit CAPABILITY command.
    IssueCapability,
}

/// Synchronous protocol state machine for one connection.
pub(crate) struct Protocol {
    state: watch::Sender<ConnectionState>,
    idling: watch::Sender<bool>,
    capabilities: Capabilities,
    imap_version: Option<ImapVersion>,
    pending_sync: Option<CommandRef>,
    pending_async: HashMap<String, CommandRef>,
    push: mpsc::UnboundedSender<ServerPush>,
    append_literal: Option<Vec<u8>>,
    partial: Vec<u8>,
    current: Option<CommandRef>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    tags: TagGenerator,
}

impl Protocol {
    /// Creates a protocol instance writing outbound bytes to `outbound`
    /// and IDLE batches to `push`.
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        push: mpsc::UnboundedSender<ServerPush>,
    ) -> Self {
        Self {
            state: watch::Sender::new(ConnectionState::Started),
            idling: watch::Sender::new(false),
            capabilities: Capabilities::default(),
            imap_version: None,
            pending_sync: None,
            pending_async: HashMap::new(),
            push,
            append_literal: None,
            partial: Vec::new(),
            current: None,
            outbound,
            tags: TagGenerator::new(),
        }
    }

    // === State ===

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn state_rx(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        tracing::debug!(%state, "state");
        self.state.send_replace(state);
    }

    pub(crate) fn idling_rx(&self) -> watch::Receiver<bool> {
        self.idling.subscribe()
    }

    pub(crate) fn set_idling(&mut self, idling: bool) {
        self.idling.send_replace(idling);
    }

    pub(crate) fn is_idling(&self) -> bool {
        *self.idling.borrow()
    }

    // === Capabilities ===

    pub(crate) fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub(crate) fn set_capabilities<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.replace(tokens);
    }

    pub(crate) fn merge_capabilities<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.merge(tokens);
    }

    pub(crate) fn imap_version(&self) -> Option<ImapVersion> {
        self.imap_version
    }

    pub(crate) fn set_imap_version(&mut self, version: ImapVersion) {
        self.imap_version = Some(version);
    }

    // === Registry ===

    pub(crate) fn new_tag(&mut self) -> String {
        self.tags.next()
    }

    pub(crate) fn pending_sync(&self) -> Option<CommandRef> {
        self.pending_sync.clone()
    }

    pub(crate) fn pending_async(&self, name: &str) -> Option<CommandRef> {
        self.pending_async.get(name).cloned()
    }

    pub(crate) fn pending_async_all(&self) -> Vec<CommandRef> {
        self.pending_async.values().cloned().collect()
    }

    pub(crate) fn has_pending_async(&self) -> bool {
        !self.pending_async.is_empty()
    }

    pub(crate) fn install_sync(&mut self, cmd: CommandRef) {
        debug_assert!(self.pending_sync.is_none());
        self.pending_sync = Some(cmd);
    }

    pub(crate) fn install_async(&mut self, cmd: CommandRef) {
        let name = lock(&cmd).untagged_resp_name().to_string();
        self.pending_async.insert(name, cmd);
    }

    /// Releases whichever registry slot holds `cmd` (timeout path).
    pub(crate) fn remove(&mut self, cmd: &CommandRef) {
        if self
            .pending_sync
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, cmd))
        {
            self.pending_sync = None;
            return;
        }
        let name = lock(cmd).untagged_resp_name().to_string();
        if self
            .pending_async
            .get(&name)
            .is_some_and(|held| Arc::ptr_eq(held, cmd))
        {
            self.pending_async.remove(&name);
        }
    }

    pub(crate) fn has_pending_idle_command(&self) -> bool {
        self.pending_sync
            .as_ref()
            .is_some_and(|cmd| lock(cmd).name() == "IDLE")
    }

    // === Outbound ===

    /// Queues one command line (CRLF appended), scrubbing `scrub` from the
    /// wire debug log.
    pub(crate) fn send_line(&self, line: &str, scrub: Option<&str>) {
        if let Some(secret) = scrub.filter(|s| !s.is_empty()) {
            let masked = line.replace(secret, &"*".repeat(secret.len()));
            tracing::debug!(data = %masked, "send");
        } else {
            tracing::debug!(data = %line, "send");
        }
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        let _ = self.outbound.send(data);
    }

    /// Queues raw bytes (literal upload).
    pub(crate) fn send_raw(&self, data: Vec<u8>) {
        let _ = self.outbound.send(data);
    }

    /// Stages the literal payload an APPEND continuation will upload.
    pub(crate) fn stage_append_literal(&mut self, data: Vec<u8>) {
        self.append_literal = Some(data);
    }

    pub(crate) fn push_sender(&self) -> mpsc::UnboundedSender<ServerPush> {
        self.push.clone()
    }

    pub(crate) fn push_stop(&self) {
        let _ = self.push.send(ServerPush::Stop);
    }

    // === Inbound ===

    /// Feeds one chunk of transport bytes through the dispatch path.
    ///
    /// Carries a partial line and the command owning parser attention
    /// between calls, so any chunking of the stream produces the same
    /// logical events.
    pub(crate) fn data_received(&mut self, chunk: &[u8]) -> Result<Vec<Followup>> {
        let mut followups = Vec::new();
        let mut buf = std::mem::take(&mut self.partial);
        buf.extend_from_slice(chunk);
        let mut current = self.current.take();

        loop {
            // a command mid-literal owns parser attention first
            if let Some(cmd) = current.clone() {
                let mut guard = lock(&cmd);
                if guard.wants_literal() {
                    let taken = guard.push_literal(&buf);
                    buf.drain(..taken);
                    if guard.wants_literal() {
                        drop(guard);
                        self.current = Some(cmd);
                        return Ok(followups);
                    }
                }
            }

            let Some(eol) = parse::find_crlf(&buf) else {
                if buf.is_empty() {
                    // chunk fully consumed: flush point for the IDLE buffer
                    if let Some(sync) = self.pending_sync.clone() {
                        lock(&sync).flush();
                    }
                    self.current = current.filter(|cmd| lock(cmd).wants_more_data());
                } else {
                    self.current = current;
                    self.partial = buf;
                }
                return Ok(followups);
            };

            let line = buf[..eol].to_vec();
            buf.drain(..=eol + 1);

            let handled = self.handle_line(&line, current.take(), &mut followups)?;

            if let Some(size) = parse::trailing_literal_len(&line) {
                // a literal may open on a line no command claimed (e.g.
                // after a tagged status); its bytes are consumed and dropped
                let cmd =
                    handled.unwrap_or_else(|| Arc::new(Mutex::new(Command::new("NIL", "unused"))));
                lock(&cmd).begin_literal(size);
                current = Some(cmd);
            } else {
                current = handled.filter(|cmd| lock(cmd).wants_more_data());
            }
        }
    }

    /// Routes one logical line; returns the command that claimed it.
    fn handle_line(
        &mut self,
        line: &[u8],
        current: Option<CommandRef>,
        followups: &mut Vec<Followup>,
    ) -> Result<Option<CommandRef>> {
        if line.is_empty() {
            return Ok(None);
        }

        if self.state() == ConnectionState::Connected {
            self.welcome(line, followups)?;
            return Ok(None);
        }

        if parse::is_tagged_status(line) {
            self.response_done(line)?;
            return Ok(None);
        }

        if let Some(cmd) = current {
            lock(&cmd).push_line(line.to_vec());
            return Ok(Some(cmd));
        }

        if let Some(rest) = line.strip_prefix(b"*") {
            let rest = rest.strip_prefix(b" ").unwrap_or(rest);
            return Ok(self.untagged_response(rest));
        }

        if line.starts_with(b"+") {
            self.continuation(line);
            return Ok(None);
        }

        tracing::info!(line = %String::from_utf8_lossy(line), "unknown data received");
        Ok(None)
    }

    /// Processes the server greeting and schedules capability discovery.
    fn welcome(&mut self, line: &[u8], followups: &mut Vec<Followup>) -> Result<()> {
        if parse::contains(line, b"PREAUTH") {
            self.set_state(ConnectionState::Auth);
        } else if parse::contains(line, b"OK") {
            self.set_state(ConnectionState::NonAuth);
        } else {
            return Err(Error::Abort(format!(
                "unexpected greeting: {}",
                String::from_utf8_lossy(line)
            )));
        }
        followups.push(Followup::IssueCapability);
        Ok(())
    }

    /// Routes an untagged response (leading `* ` already stripped).
    fn untagged_response(&mut self, line: &[u8]) -> Option<CommandRef> {
        let (name, text) = if let Some(verb) = parse::message_data_verb(line) {
            (verb.to_string(), line.to_vec())
        } else {
            let sp = line.iter().position(|&b| b == b' ').unwrap_or(line.len());
            let name = String::from_utf8_lossy(&line[..sp]).to_ascii_uppercase();
            let text = if sp < line.len() {
                line[sp + 1..].to_vec()
            } else {
                Vec::new()
            };
            (name, text)
        };

        if let Some(cmd) = self.pending_async.get(&name).cloned() {
            lock(&cmd).push_line(text);
            return Some(cmd);
        }

        if let Some(sync) = self.pending_sync.clone() {
            lock(&sync).push_line(line.to_vec());
            return Some(sync);
        }

        if name == "BYE" {
            // impending disconnect: wake push waiters before the transport dies
            tracing::warn!(line = %String::from_utf8_lossy(line), "server sent BYE");
            self.push_stop();
            return None;
        }

        // NOOP is the designated catch-all for unsolicited responses
        if let Some(noop) = self.pending_async.get("NOOP").cloned() {
            lock(&noop).push_line(line.to_vec());
            return Some(noop);
        }

        tracing::info!(line = %String::from_utf8_lossy(line), "ignored untagged response");
        None
    }

    /// Completes the pending command a tagged status line belongs to.
    fn response_done(&mut self, line: &[u8]) -> Result<()> {
        tracing::debug!(line = %String::from_utf8_lossy(line), "tagged status");
        let sp = line.iter().position(|&b| b == b' ').unwrap_or(line.len());
        let tag = String::from_utf8_lossy(&line[..sp]).to_string();
        let response = if sp < line.len() { &line[sp + 1..] } else { &[][..] };

        let command = if let Some(sync) = self.pending_sync.clone() {
            if lock(&sync).tag() != tag {
                return Err(Error::Abort(format!(
                    "unexpected tagged response with pending sync command ({}): {}",
                    lock(&sync).to_wire(),
                    String::from_utf8_lossy(response)
                )));
            }
            self.pending_sync = None;
            sync
        } else {
            let mut matches: Vec<(String, CommandRef)> = self
                .pending_async
                .iter()
                .filter(|(_, cmd)| lock(cmd).tag() == tag)
                .map(|(name, cmd)| (name.clone(), cmd.clone()))
                .collect();
            match matches.len() {
                0 => {
                    return Err(Error::Abort(format!(
                        "unexpected tagged ({tag}) response: {}",
                        String::from_utf8_lossy(response)
                    )));
                }
                1 => {
                    let (name, cmd) = matches.remove(0);
                    self.pending_async.remove(&name);
                    cmd
                }
                _ => {
                    return Err(Error::Abort(format!(
                        "inconsistent state: two commands have the same tag ({tag})"
                    )));
                }
            }
        };

        let sp = response
            .iter()
            .position(|&b| b == b' ')
            .unwrap_or(response.len());
        let result = Status::parse(&response[..sp]).ok_or_else(|| {
            Error::Abort(format!(
                "unrecognized status in tagged response: {}",
                String::from_utf8_lossy(response)
            ))
        })?;
        let text = if sp < response.len() {
            response[sp + 1..].to_vec()
        } else {
            Vec::new()
        };

        lock(&command).close(text, CommandStatus::from(result));
        Ok(())
    }

    /// Handles a continuation prompt (`+ …`).
    fn continuation(&mut self, line: &[u8]) {
        let Some(sync) = self.pending_sync.clone() else {
            tracing::info!(line = %String::from_utf8_lossy(line), "server says (ignored)");
            return;
        };
        let name = lock(&sync).name().to_string();
        if name == "APPEND" {
            if let Some(payload) = self.append_literal.take() {
                let mut data = payload;
                data.extend_from_slice(b"\r\n");
                self.send_raw(data);
            } else {
                tracing::warn!("server asked for literal data but none is staged");
            }
        } else if name == "IDLE" {
            tracing::debug!(line = %String::from_utf8_lossy(line), "continuation -- IDLE is active");
            self.set_idling(true);
        } else {
            // multi-step continuation (e.g. AUTHENTICATE) consumes the prompt
            let mut guard = lock(&sync);
            guard.push_line(line.to_vec());
            guard.flush();
        }
    }

    /// Fails every pending command and wakes push waiters; called when the
    /// transport drops or dispatch aborts.
    pub(crate) fn connection_lost(&mut self, reason: Option<&Error>) {
        let message = reason.map_or_else(|| "connection closed".to_string(), ToString::to_string);
        tracing::debug!(reason = %message, "connection lost");
        let mut pending = self.pending_async_all();
        if let Some(sync) = self.pending_sync.take() {
            pending.push(sync);
        }
        self.pending_async.clear();
        self.current = None;
        for cmd in pending {
            lock(&cmd).fail(Error::ConnectionLost(message.clone()));
        }
        self.set_idling(false);
        self.push_stop();
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("state", &self.state())
            .field("capabilities", &self.capabilities)
            .field("pending_sync", &self.pending_sync.is_some())
            .field("pending_async", &self.pending_async.len())
            .field("idling", &self.is_idling())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_protocol() -> (
        Protocol,
        mpsc::UnboundedReceiver<Vec<u8>>,
        mpsc::UnboundedReceiver<ServerPush>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        (Protocol::new(out_tx, push_tx), out_rx, push_rx)
    }

    fn install_async(protocol: &mut Protocol, cmd: Command) -> CommandRef {
        let cmd = Arc::new(Mutex::new(cmd));
        protocol.install_async(cmd.clone());
        cmd
    }

    fn install_sync(protocol: &mut Protocol, cmd: Command) -> CommandRef {
        let cmd = Arc::new(Mutex::new(cmd));
        protocol.install_sync(cmd.clone());
        cmd
    }

    #[test]
    fn test_greeting_ok_enters_nonauth() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Connected);
        let followups = protocol.data_received(b"* OK IMAP4rev1 ready\r\n").unwrap();
        assert_eq!(protocol.state(), ConnectionState::NonAuth);
        assert_eq!(followups, vec![Followup::IssueCapability]);
    }

    #[test]
    fn test_greeting_preauth_enters_auth() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Connected);
        let followups = protocol.data_received(b"* PREAUTH welcome\r\n").unwrap();
        assert_eq!(protocol.state(), ConnectionState::Auth);
        assert_eq!(followups, vec![Followup::IssueCapability]);
    }

    #[test]
    fn test_greeting_garbage_aborts() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Connected);
        let err = protocol.data_received(b"* BAD go away\r\n").unwrap_err();
        assert!(matches!(err, Error::Abort(_)));
    }

    #[test]
    fn test_tagged_status_closes_async_command() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::NonAuth);
        let cmd = install_async(&mut protocol, Command::new("CAPABILITY", "TAG0"));
        protocol
            .data_received(b"* CAPABILITY IMAP4rev1 IDLE UIDPLUS\r\nTAG0 OK CAPABILITY completed\r\n")
            .unwrap();
        let guard = lock(&cmd);
        assert_eq!(guard.status(), CommandStatus::Ok);
        assert_eq!(
            guard.response().unwrap().lines,
            vec![
                b"IMAP4rev1 IDLE UIDPLUS".to_vec(),
                b"CAPABILITY completed".to_vec()
            ]
        );
        drop(guard);
        assert!(protocol.pending_async("CAPABILITY").is_none());
    }

    #[test]
    fn test_unknown_tag_aborts() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Auth);
        let err = protocol.data_received(b"ZZZ9 OK done\r\n").unwrap_err();
        assert!(matches!(err, Error::Abort(_)));
    }

    #[test]
    fn test_sync_command_tag_mismatch_aborts() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Auth);
        install_sync(&mut protocol, Command::new("SELECT", "TAG1").arg("INBOX"));
        let err = protocol.data_received(b"TAG2 OK SELECT done\r\n").unwrap_err();
        assert!(matches!(err, Error::Abort(_)));
    }

    #[test]
    fn test_untagged_routes_by_message_data_verb() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let cmd = install_async(&mut protocol, Command::fetch("TAG2"));
        protocol
            .data_received(b"* 12 FETCH (FLAGS (\\Seen))\r\n")
            .unwrap();
        // message data keeps the sequence number
        assert_eq!(
            lock(&cmd).response(),
            None,
        );
        protocol.data_received(b"TAG2 OK FETCH completed\r\n").unwrap();
        assert_eq!(
            lock(&cmd).response().unwrap().lines,
            vec![
                b"12 FETCH (FLAGS (\\Seen))".to_vec(),
                b"FETCH completed".to_vec()
            ]
        );
    }

    #[test]
    fn test_store_routes_by_fetch_name() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let cmd = install_async(
            &mut protocol,
            Command::new("STORE", "TAG3").untagged_name("FETCH"),
        );
        protocol
            .data_received(b"* 1 FETCH (FLAGS (\\Deleted))\r\nTAG3 OK STORE completed\r\n")
            .unwrap();
        assert_eq!(lock(&cmd).status(), CommandStatus::Ok);
    }

    #[test]
    fn test_noop_is_catch_all() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let noop = install_async(&mut protocol, Command::new("NOOP", "TAG4"));
        protocol.data_received(b"* 2 EXISTS\r\nTAG4 OK NOOP completed\r\n").unwrap();
        assert_eq!(
            lock(&noop).response().unwrap().lines,
            vec![b"2 EXISTS".to_vec(), b"NOOP completed".to_vec()]
        );
    }

    #[test]
    fn test_unsolicited_line_without_any_command_is_dropped() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        protocol.data_received(b"* 2 EXISTS\r\n").unwrap();
    }

    #[test]
    fn test_unsolicited_bye_enqueues_stop_sentinel() {
        let (mut protocol, _out, mut push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        install_async(&mut protocol, Command::new("NOOP", "TAG5"));
        protocol.data_received(b"* BYE server going down\r\n").unwrap();
        assert_eq!(push.try_recv().unwrap(), ServerPush::Stop);
        // the pending NOOP did not absorb the BYE line
        let noop = protocol.pending_async("NOOP").unwrap();
        assert_eq!(lock(&noop).status(), CommandStatus::Init);
    }

    #[test]
    fn test_bye_during_logout_goes_to_sync_command() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Auth);
        let logout = install_sync(&mut protocol, Command::new("LOGOUT", "TAG6"));
        protocol
            .data_received(b"* BYE Logging out\r\nTAG6 OK LOGOUT completed\r\n")
            .unwrap();
        assert_eq!(
            lock(&logout).response().unwrap().lines,
            vec![b"BYE Logging out".to_vec(), b"LOGOUT completed".to_vec()]
        );
    }

    #[test]
    fn test_append_continuation_uploads_literal() {
        let (mut protocol, mut out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Auth);
        protocol.stage_append_literal(b"Subject: hi\r\n\r\nbody".to_vec());
        let cmd = install_sync(
            &mut protocol,
            Command::new("APPEND", "TAG7").arg("INBOX").arg("{19}"),
        );
        protocol.data_received(b"+ Ready for literal data\r\n").unwrap();
        assert_eq!(out.try_recv().unwrap(), b"Subject: hi\r\n\r\nbody\r\n".to_vec());
        protocol.data_received(b"TAG7 OK APPEND completed\r\n").unwrap();
        assert_eq!(lock(&cmd).status(), CommandStatus::Ok);
    }

    #[test]
    fn test_idle_continuation_sets_idling() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let queue = protocol.push_sender();
        install_sync(&mut protocol, Command::idle("TAG8", queue));
        assert!(!protocol.is_idling());
        protocol.data_received(b"+ idling\r\n").unwrap();
        assert!(protocol.is_idling());
    }

    #[test]
    fn test_idle_batches_flush_per_chunk() {
        let (mut protocol, _out, mut push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let queue = protocol.push_sender();
        install_sync(&mut protocol, Command::idle("TAG9", queue));
        protocol.data_received(b"+ idling\r\n").unwrap();
        protocol.data_received(b"* 1 EXISTS\r\n* 1 RECENT\r\n").unwrap();
        assert_eq!(
            push.try_recv().unwrap(),
            ServerPush::Batch(vec![b"1 EXISTS".to_vec(), b"1 RECENT".to_vec()])
        );
        protocol.data_received(b"* 2 EXISTS\r\n").unwrap();
        assert_eq!(
            push.try_recv().unwrap(),
            ServerPush::Batch(vec![b"2 EXISTS".to_vec()])
        );
    }

    #[test]
    fn test_continuation_without_sync_command_is_ignored() {
        let (mut protocol, mut out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Auth);
        protocol.data_received(b"+ go ahead\r\n").unwrap();
        assert!(out.try_recv().is_err());
    }

    #[test]
    fn test_literal_after_tagged_status_is_discarded() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let cmd = install_async(&mut protocol, Command::new("SEARCH", "TAGA"));
        protocol
            .data_received(b"TAGA OK done {4}\r\nblob* 1 EXISTS\r\n")
            .unwrap();
        assert_eq!(lock(&cmd).status(), CommandStatus::Ok);
    }

    #[test]
    fn test_connection_lost_fails_pending_commands() {
        let (mut protocol, _out, mut push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let fetch = install_async(&mut protocol, Command::fetch("TAGB"));
        let select = install_sync(&mut protocol, Command::new("SELECT", "TAGC").arg("INBOX"));
        protocol.connection_lost(None);
        assert_eq!(lock(&fetch).status(), CommandStatus::Ko);
        assert_eq!(lock(&select).status(), CommandStatus::Ko);
        assert!(matches!(
            lock(&fetch).take_error(),
            Some(Error::ConnectionLost(_))
        ));
        assert_eq!(push.try_recv().unwrap(), ServerPush::Stop);
        assert!(!protocol.has_pending_async());
    }

    const FETCH_STREAM: &[u8] = b"* 1 FETCH (UID 1 RFC822 {12}\r\nhello\r\nworld\r\n)\r\nTAGF OK FETCH completed\r\n";

    /// The closing `)` rides on its own line behind the literal's
    /// terminating CRLF; the empty logical line in between releases the
    /// command, so the `)` is dropped rather than accumulated.
    fn expected_fetch_lines() -> Vec<Vec<u8>> {
        vec![
            b"1 FETCH (UID 1 RFC822 {12}".to_vec(),
            b"hello\r\nworld".to_vec(),
            b"FETCH completed".to_vec(),
        ]
    }

    fn fetch_lines_after(chunks: &[&[u8]]) -> (CommandStatus, Vec<Vec<u8>>) {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let cmd = install_async(&mut protocol, Command::fetch("TAGF"));
        for chunk in chunks {
            protocol.data_received(chunk).unwrap();
        }
        let guard = lock(&cmd);
        let lines = guard
            .response()
            .map_or_else(Vec::new, |response| response.lines);
        (guard.status(), lines)
    }

    #[test]
    fn test_literal_fetch_single_chunk() {
        let (status, lines) = fetch_lines_after(&[FETCH_STREAM]);
        assert_eq!(status, CommandStatus::Ok);
        assert_eq!(lines, expected_fetch_lines());
    }

    #[test]
    fn test_literal_fetch_byte_by_byte() {
        let chunks: Vec<&[u8]> = FETCH_STREAM.chunks(1).collect();
        let split = fetch_lines_after(&chunks);
        assert_eq!(split, (CommandStatus::Ok, expected_fetch_lines()));
    }

    #[test]
    fn test_two_fetch_messages_with_literals() {
        let (mut protocol, _out, _push) = test_protocol();
        protocol.set_state(ConnectionState::Selected);
        let cmd = install_async(&mut protocol, Command::fetch("TAGG"));
        protocol
            .data_received(
                b"* 3 FETCH (UID 3 RFC822 {8}\r\nmail 1\r\n)\r\n\
                  * 4 FETCH (UID 4 RFC822 {8}\r\nmail 2\r\n)\r\n\
                  TAGG OK FETCH completed\r\n",
            )
            .unwrap();
        assert_eq!(
            lock(&cmd).response().unwrap().lines,
            vec![
                b"3 FETCH (UID 3 RFC822 {8}".to_vec(),
                b"mail 1\r\n".to_vec(),
                b")".to_vec(),
                b"4 FETCH (UID 4 RFC822 {8}".to_vec(),
                b"mail 2\r\n".to_vec(),
                b")".to_vec(),
                b"FETCH completed".to_vec(),
            ]
        );
    }

    proptest! {
        #[test]
        fn test_parser_restartable_over_any_partition(cuts in proptest::collection::vec(1..FETCH_STREAM.len(), 0..8)) {
            let mut cuts = cuts;
            cuts.sort_unstable();
            cuts.dedup();
            let mut chunks: Vec<&[u8]> = Vec::new();
            let mut start = 0;
            for cut in cuts {
                chunks.push(&FETCH_STREAM[start..cut]);
                start = cut;
            }
            chunks.push(&FETCH_STREAM[start..]);
            prop_assert_eq!(
                fetch_lines_after(&chunks),
                (CommandStatus::Ok, expected_fetch_lines())
            );
        }
    }
}

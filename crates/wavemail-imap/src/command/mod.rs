//! In-flight command objects and their response accumulators.

mod spec;
mod tag;

pub use spec::{CommandSpec, ExecMode, command_spec};
pub use tag::TagGenerator;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::parse::{is_fetch_data_line, matched_parenthesis};
use crate::types::{Response, ServerPush, Status};
use crate::Error;

/// Lifecycle status of an in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CommandStatus {
    /// Constructed, nothing received yet.
    #[default]
    Init,
    /// At least one response datum received.
    Pending,
    /// Completed with a tagged OK.
    Ok,
    /// Completed with a tagged NO.
    No,
    /// Completed with a tagged BAD.
    Bad,
    /// Failed locally (timeout or connection loss).
    Ko,
}

impl CommandStatus {
    /// Once terminal, the command is never mutated again.
    pub(crate) const fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::No | Self::Bad | Self::Ko)
    }
}

impl From<Status> for CommandStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => Self::Ok,
            Status::No => Self::No,
            Status::Bad => Self::Bad,
        }
    }
}

/// How a command accumulates untagged response data.
///
/// One `Command` type with a polymorphic accumulator replaces subclassing:
/// the three concrete behaviors are line-at-a-time, parenthesis-balanced
/// (FETCH), and buffered-stream (IDLE).
#[derive(Debug)]
pub(crate) enum Accumulator {
    /// Append every datum to the response.
    Line,
    /// Hold the response open until FETCH parentheses balance.
    Fetch,
    /// Buffer untagged lines and flush them to the push queue in batches.
    Idle {
        buffer: Vec<Vec<u8>>,
        queue: mpsc::UnboundedSender<ServerPush>,
    },
}

/// A single in-flight IMAP command.
///
/// Mutated only from the dispatch path; waiters observe completion through
/// the watch flag, which fires exactly once.
#[derive(Debug)]
pub(crate) struct Command {
    tag: String,
    name: String,
    prefix: Option<String>,
    args: Vec<String>,
    untagged_resp_name: String,
    accumulator: Accumulator,
    expected_literal: usize,
    literal_buf: Vec<u8>,
    lines: Vec<Vec<u8>>,
    status: CommandStatus,
    error: Option<Error>,
    done: watch::Sender<bool>,
    timeout: Option<Duration>,
    last_activity: Instant,
}

impl Command {
    /// Creates a line-accumulating command.
    pub(crate) fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            tag: tag.into(),
            untagged_resp_name: name.clone(),
            name,
            prefix: None,
            args: Vec::new(),
            accumulator: Accumulator::Line,
            expected_literal: 0,
            literal_buf: Vec::new(),
            lines: Vec::new(),
            status: CommandStatus::Init,
            error: None,
            done: watch::Sender::new(false),
            timeout: None,
            last_activity: Instant::now(),
        }
    }

    /// Creates a FETCH command with the parenthesis-balanced accumulator.
    pub(crate) fn fetch(tag: impl Into<String>) -> Self {
        let mut cmd = Self::new("FETCH", tag);
        cmd.accumulator = Accumulator::Fetch;
        cmd
    }

    /// Creates an IDLE command streaming to the given push queue.
    pub(crate) fn idle(tag: impl Into<String>, queue: mpsc::UnboundedSender<ServerPush>) -> Self {
        let mut cmd = Self::new("IDLE", tag);
        cmd.accumulator = Accumulator::Idle {
            buffer: Vec::new(),
            queue,
        };
        cmd
    }

    /// Sets the command prefix (e.g. `UID`).
    #[must_use]
    pub(crate) fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Appends one argument.
    #[must_use]
    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overrides the untagged-response name the command is matched by
    /// (e.g. STORE replies arrive as FETCH).
    #[must_use]
    pub(crate) fn untagged_name(mut self, name: impl Into<String>) -> Self {
        self.untagged_resp_name = name.into();
        self
    }

    /// Arms the per-command deadline; it resets on every appended datum.
    #[must_use]
    pub(crate) fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn untagged_resp_name(&self) -> &str {
        &self.untagged_resp_name
    }

    pub(crate) fn status(&self) -> CommandStatus {
        self.status
    }

    /// Subscribes to the completion flag.
    pub(crate) fn done_rx(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Wire form without the trailing CRLF:
    /// `<tag> [<prefix> ]<NAME>[ <args…>]`.
    pub(crate) fn to_wire(&self) -> String {
        let mut line = String::new();
        line.push_str(&self.tag);
        line.push(' ');
        if let Some(prefix) = &self.prefix {
            line.push_str(prefix);
            line.push(' ');
        }
        line.push_str(&self.name);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Enters literal mode: the next `expected` raw bytes belong to this
    /// command. A zero-length literal completes immediately.
    pub(crate) fn begin_literal(&mut self, expected: usize) {
        self.expected_literal = expected;
        self.literal_buf.clear();
        if expected == 0 {
            self.push_line(Vec::new());
        }
    }

    /// Returns `true` while fewer literal bytes than announced have arrived.
    pub(crate) fn wants_literal(&self) -> bool {
        self.expected_literal != 0 && self.literal_buf.len() != self.expected_literal
    }

    /// Consumes up to the remaining literal bytes from `data`; returns how
    /// many bytes were taken. Once the literal is complete it is appended
    /// to the response as one entry.
    pub(crate) fn push_literal(&mut self, data: &[u8]) -> usize {
        let want = self.expected_literal - self.literal_buf.len();
        let take = want.min(data.len());
        self.literal_buf.extend_from_slice(&data[..take]);
        if self.literal_buf.len() == self.expected_literal {
            let literal = std::mem::take(&mut self.literal_buf);
            self.expected_literal = 0;
            self.push_line(literal);
        } else {
            self.touch();
        }
        take
    }

    /// True while the accumulated response does not yet form a complete
    /// unit (mid-literal, or unbalanced FETCH parentheses).
    pub(crate) fn wants_more_data(&self) -> bool {
        if self.wants_literal() {
            return true;
        }
        match &self.accumulator {
            Accumulator::Fetch => {
                let start = self
                    .lines
                    .iter()
                    .rposition(|line| is_fetch_data_line(line))
                    .unwrap_or(0);
                let joined = self.lines[start..].concat();
                !matched_parenthesis(&joined)
            }
            Accumulator::Line | Accumulator::Idle { .. } => false,
        }
    }

    /// Appends a response datum while the command is still pending.
    pub(crate) fn push_line(&mut self, line: Vec<u8>) {
        self.touch();
        if let Accumulator::Idle { buffer, .. } = &mut self.accumulator {
            buffer.push(line);
            return;
        }
        self.status = CommandStatus::Pending;
        self.lines.push(line);
    }

    /// Flushes buffered IDLE lines as one batch onto the push queue.
    pub(crate) fn flush(&mut self) {
        if let Accumulator::Idle { buffer, queue } = &mut self.accumulator {
            if !buffer.is_empty() {
                let _ = queue.send(ServerPush::Batch(std::mem::take(buffer)));
            }
        }
    }

    /// Records the tagged status text and fires the completion signal.
    pub(crate) fn close(&mut self, line: Vec<u8>, status: CommandStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.lines.push(line);
        self.done.send_replace(true);
    }

    /// Fails the command locally (timeout or connection loss).
    pub(crate) fn fail(&mut self, err: Error) {
        if self.status.is_terminal() {
            return;
        }
        self.status = CommandStatus::Ko;
        self.lines.push(err.to_string().into_bytes());
        self.error = Some(err);
        self.done.send_replace(true);
    }

    /// Takes the stored local failure, if any.
    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Deadline for the per-command timer, pushed forward by every
    /// appended datum.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.last_activity + t)
    }

    /// Snapshot of the completed response, if the command finished with a
    /// tagged status.
    pub(crate) fn response(&self) -> Option<Response> {
        let result = match self.status {
            CommandStatus::Ok => Status::Ok,
            CommandStatus::No => Status::No,
            CommandStatus::Bad => Status::Bad,
            CommandStatus::Init | CommandStatus::Pending | CommandStatus::Ko => return None,
        };
        Some(Response {
            result,
            lines: self.lines.clone(),
        })
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wire() {
        let cmd = Command::new("SEARCH", "TAG1").args(["CHARSET", "utf-8", "ALL"]);
        assert_eq!(cmd.to_wire(), "TAG1 SEARCH CHARSET utf-8 ALL");
    }

    #[test]
    fn test_to_wire_with_prefix() {
        let cmd = Command::fetch("TAG2").prefix("UID").arg("1").arg("(RFC822)");
        assert_eq!(cmd.to_wire(), "TAG2 UID FETCH 1 (RFC822)");
    }

    #[test]
    fn test_to_wire_no_args() {
        let cmd = Command::new("NOOP", "TAG3");
        assert_eq!(cmd.to_wire(), "TAG3 NOOP");
    }

    #[test]
    fn test_untagged_name_override() {
        let cmd = Command::new("STORE", "TAG4").untagged_name("FETCH");
        assert_eq!(cmd.untagged_resp_name(), "FETCH");
        assert_eq!(cmd.name(), "STORE");
    }

    #[test]
    fn test_literal_chunked_append() {
        let mut cmd = Command::new("FETCH", "TAG5");
        cmd.begin_literal(12);
        assert!(cmd.wants_literal());
        assert_eq!(cmd.push_literal(b"hello\r\n"), 7);
        assert!(cmd.wants_literal());
        // extra bytes past the literal are not consumed
        assert_eq!(cmd.push_literal(b"world)\r\n"), 5);
        assert!(!cmd.wants_literal());
        assert_eq!(cmd.lines, vec![b"hello\r\nworld".to_vec()]);
    }

    #[test]
    fn test_zero_length_literal() {
        let mut cmd = Command::new("FETCH", "TAG6");
        cmd.begin_literal(0);
        assert!(!cmd.wants_literal());
        assert_eq!(cmd.lines, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_fetch_wants_more_data_until_balanced() {
        let mut cmd = Command::fetch("TAG7");
        cmd.push_line(b"1 FETCH (UID 1 RFC822 {12}".to_vec());
        assert!(cmd.wants_more_data());
        cmd.push_line(b"hello\r\nworld".to_vec());
        assert!(cmd.wants_more_data());
        cmd.push_line(b")".to_vec());
        assert!(!cmd.wants_more_data());
    }

    #[test]
    fn test_fetch_balance_restarts_at_last_fetch_line() {
        let mut cmd = Command::fetch("TAG8");
        cmd.push_line(b"3 FETCH (UID 3 FLAGS (\\Seen))".to_vec());
        assert!(!cmd.wants_more_data());
        cmd.push_line(b"4 FETCH (UID 4 RFC822 {8}".to_vec());
        assert!(cmd.wants_more_data());
        cmd.push_line(b"mail 2\r\n".to_vec());
        cmd.push_line(b")".to_vec());
        assert!(!cmd.wants_more_data());
    }

    #[test]
    fn test_idle_buffers_and_flushes_batches() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cmd = Command::idle("TAG9", tx);
        cmd.push_line(b"1 EXISTS".to_vec());
        cmd.push_line(b"1 RECENT".to_vec());
        assert!(rx.try_recv().is_err());
        cmd.flush();
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerPush::Batch(vec![b"1 EXISTS".to_vec(), b"1 RECENT".to_vec()])
        );
        // buffer cleared; an empty flush sends nothing
        cmd.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_idle_tagged_close_goes_to_response() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut cmd = Command::idle("TAG10", tx);
        cmd.push_line(b"1 EXISTS".to_vec());
        cmd.close(b"IDLE terminated".to_vec(), CommandStatus::Ok);
        assert_eq!(cmd.lines, vec![b"IDLE terminated".to_vec()]);
        assert_eq!(cmd.status(), CommandStatus::Ok);
    }

    #[test]
    fn test_close_fires_exactly_once() {
        let mut cmd = Command::new("NOOP", "TAG11");
        let mut rx = cmd.done_rx();
        cmd.close(b"NOOP completed".to_vec(), CommandStatus::Ok);
        cmd.close(b"again".to_vec(), CommandStatus::Bad);
        assert_eq!(cmd.status(), CommandStatus::Ok);
        assert_eq!(cmd.lines.len(), 1);
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut cmd = Command::new("FETCH", "TAG12");
        cmd.fail(Error::ConnectionLost("gone".to_string()));
        assert_eq!(cmd.status(), CommandStatus::Ko);
        cmd.close(b"late".to_vec(), CommandStatus::Ok);
        assert_eq!(cmd.status(), CommandStatus::Ko);
        assert!(cmd.take_error().is_some());
        assert!(cmd.response().is_none());
    }

    #[test]
    fn test_response_snapshot() {
        let mut cmd = Command::new("LOGIN", "TAG13");
        cmd.push_line(b"CAPABILITY IMAP4rev1".to_vec());
        cmd.close(b"LOGIN completed".to_vec(), CommandStatus::Ok);
        let response = cmd.response().unwrap();
        assert_eq!(response.result, Status::Ok);
        assert_eq!(
            response.lines,
            vec![b"CAPABILITY IMAP4rev1".to_vec(), b"LOGIN completed".to_vec()]
        );
    }

    #[test]
    fn test_deadline_requires_timeout() {
        let cmd = Command::new("FETCH", "TAG14");
        assert!(cmd.deadline().is_none());
        let cmd = cmd.timeout(Some(Duration::from_millis(50)));
        assert!(cmd.deadline().is_some());
    }
}

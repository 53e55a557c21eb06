//! High-level asynchronous IMAP client.
//!
//! [`Client`] owns one connection: a reader task feeds transport bytes to
//! the dispatch core, a writer task drains the outbound queue, and callers
//! submit commands through the verb methods. The IMAP concurrency rules
//! are enforced at submission time: one synchronous command at a time,
//! parallel asynchronous commands as long as their untagged-response names
//! differ, and at most one IDLE.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::{Command, ExecMode, command_spec};
use crate::connection::{self, Config};
use crate::encode::{InternalDate, id_fields, internaldate, quoted};
use crate::parse;
use crate::protocol::{CommandRef, ConnectionState, Followup, Protocol, lock};
use crate::types::{ImapVersion, Response, ServerPush, Status};
use crate::{Error, Result};

/// Inactivity cap for IDLE, per RFC 2177 guidance (servers may drop
/// connections idling longer than 30 minutes).
pub const TWENTY_NINE_MINUTES: Duration = Duration::from_secs(29 * 60);

const READ_BUFFER_SIZE: usize = 8192;

/// Callback invoked once when the transport is lost.
pub type ConnectionLostCallback = Box<dyn FnMut(Option<&Error>) + Send>;

struct ClientInner {
    engine: Arc<Mutex<Protocol>>,
    push_rx: AsyncMutex<mpsc::UnboundedReceiver<ServerPush>>,
    timeout: Duration,
    idle_waiter: Mutex<Option<JoinHandle<()>>>,
    conn_lost_cb: Mutex<Option<ConnectionLostCallback>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(waiter) = lock(&self.idle_waiter).take() {
            waiter.abort();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Asynchronous IMAP4rev1 client.
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connects per the configuration and waits for the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be established or no
    /// greeting arrives within the connect timeout.
    pub async fn connect(config: &Config) -> Result<Self> {
        let stream = connection::connect(config).await?;
        Self::from_stream_with(stream, config).await
    }

    /// Builds a client over an established transport with default
    /// timeouts; the server greeting must not have been consumed yet.
    ///
    /// # Errors
    ///
    /// Returns an error if no greeting arrives within the connect timeout.
    pub async fn from_stream<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_stream_with(stream, &Config::default()).await
    }

    /// Builds a client over an established transport using the
    /// configuration's timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if no greeting arrives within the connect timeout.
    pub async fn from_stream_with<S>(stream: S, config: &Config) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (push_tx, push_rx) = mpsc::unbounded_channel::<ServerPush>();
        let engine = Arc::new(Mutex::new(Protocol::new(out_tx, push_tx)));
        let (read_half, mut write_half) = tokio::io::split(stream);

        let client = Self {
            inner: Arc::new(ClientInner {
                engine,
                push_rx: AsyncMutex::new(push_rx),
                timeout: config.command_timeout,
                idle_waiter: Mutex::new(None),
                conn_lost_cb: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        lock(&client.inner.engine).set_state(ConnectionState::Connected);

        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if write_half.write_all(&data).await.is_err() {
                    break;
                }
                if write_half.flush().await.is_err() {
                    break;
                }
            }
        });
        let reader = tokio::spawn(Self::read_loop(Arc::downgrade(&client.inner), read_half));
        {
            let mut tasks = lock(&client.inner.tasks);
            tasks.push(reader);
            tasks.push(writer);
        }

        let mut state_rx = lock(&client.inner.engine).state_rx();
        let greeted = tokio::time::timeout(
            config.connect_timeout,
            state_rx.wait_for(|state| state.is_greeted()),
        )
        .await;
        match greeted {
            Ok(Ok(state)) => {
                let state = *state;
                if matches!(state, ConnectionState::NonAuth | ConnectionState::Auth) {
                    Ok(client)
                } else {
                    Err(Error::ConnectionLost(
                        "connection closed before greeting".to_string(),
                    ))
                }
            }
            Ok(Err(_)) => Err(Error::ConnectionLost(
                "connection closed before greeting".to_string(),
            )),
            Err(_) => Err(Error::CommandTimeout("no greeting from server".to_string())),
        }
    }

    /// Registers a callback invoked once when the transport is lost.
    pub fn on_connection_lost<F>(&self, callback: F)
    where
        F: FnMut(Option<&Error>) + Send + 'static,
    {
        *lock(&self.inner.conn_lost_cb) = Some(Box::new(callback));
    }

    /// Reader task: transport bytes in, dispatch, follow-ups out.
    ///
    /// Holds only a weak handle so dropping the last [`Client`] tears the
    /// connection down instead of keeping it alive from inside its own
    /// task.
    async fn read_loop<R>(inner: Weak<ClientInner>, mut read_half: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            buf.clear();
            let read = read_half.read_buf(&mut buf).await;
            let Some(strong) = inner.upgrade() else {
                return;
            };
            let client = Self { inner: strong };
            match read {
                Ok(0) => {
                    client.transport_lost(None);
                    return;
                }
                Ok(_) => {
                    let dispatched = lock(&client.inner.engine).data_received(&buf);
                    match dispatched {
                        Ok(followups) => {
                            for followup in followups {
                                match followup {
                                    Followup::IssueCapability => {
                                        let client = client.clone();
                                        tokio::spawn(async move {
                                            if let Err(err) = client.discover_capabilities().await {
                                                tracing::warn!(%err, "capability discovery failed");
                                            }
                                        });
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            client.transport_lost(Some(err));
                            return;
                        }
                    }
                }
                Err(err) => {
                    client.transport_lost(Some(Error::Io(err)));
                    return;
                }
            }
        }
    }

    /// Fails all pending commands and notifies the caller's callback.
    fn transport_lost(&self, err: Option<Error>) {
        lock(&self.inner.engine).connection_lost(err.as_ref());
        let callback = lock(&self.inner.conn_lost_cb).take();
        if let Some(mut callback) = callback {
            callback(err.as_ref());
        }
    }

    /// Issues CAPABILITY and records the advertised tokens and the
    /// negotiated protocol version.
    async fn discover_capabilities(&self) -> Result<()> {
        let tag = self.new_tag();
        let response = self
            .with_timeout(self.execute(Command::new("CAPABILITY", tag)))
            .await?;
        let line = response
            .lines
            .first()
            .ok_or_else(|| Error::Protocol("empty CAPABILITY response".to_string()))?;
        let tokens: Vec<String> = String::from_utf8_lossy(line)
            .split_whitespace()
            .map(ToString::to_string)
            .collect();
        let version = tokens.iter().find_map(|token| ImapVersion::parse(token));
        let mut engine = lock(&self.inner.engine);
        engine.set_capabilities(tokens);
        let version =
            version.ok_or_else(|| Error::Protocol("server not IMAP4 compliant".to_string()))?;
        engine.set_imap_version(version);
        Ok(())
    }

    // === Command submission ===

    async fn execute(&self, command: Command) -> Result<Response> {
        self.execute_scrubbed(command, None).await
    }

    /// Submits one command: admission check, scheduling gates, write,
    /// completion (or deadline).
    async fn execute_scrubbed(&self, command: Command, scrub: Option<&str>) -> Result<Response> {
        let name = command.name().to_string();
        let untagged = command.untagged_resp_name().to_string();
        let spec =
            command_spec(&name).ok_or_else(|| Error::Protocol(format!("unknown command {name}")))?;
        let is_sync = spec.mode == ExecMode::Sync;
        let cmd: CommandRef = Arc::new(Mutex::new(command));

        'submit: loop {
            let waiters: Vec<watch::Receiver<bool>> = {
                let mut engine = lock(&self.inner.engine);
                let state = engine.state();
                if !spec.allows(state) {
                    return Err(Error::Protocol(format!(
                        "command {name} illegal in state {state}"
                    )));
                }
                let mut waiters = Vec::new();
                if let Some(sync) = engine.pending_sync() {
                    waiters.push(lock(&sync).done_rx());
                } else if is_sync {
                    for pending in engine.pending_async_all() {
                        waiters.push(lock(&pending).done_rx());
                    }
                } else if let Some(prev) = engine.pending_async(&untagged) {
                    waiters.push(lock(&prev).done_rx());
                }
                if waiters.is_empty() {
                    let wire = lock(&cmd).to_wire();
                    if is_sync {
                        engine.install_sync(cmd.clone());
                    } else {
                        engine.install_async(cmd.clone());
                    }
                    engine.send_line(&wire, scrub);
                    break 'submit;
                }
                waiters
            };
            for mut rx in waiters {
                let _ = rx.wait_for(|done| *done).await;
            }
        }

        // await completion, racing the per-command deadline; the deadline
        // is pushed forward by every appended datum
        let mut done_rx = lock(&cmd).done_rx();
        loop {
            // take the deadline under the lock, never across an await
            let deadline = {
                let guard = lock(&cmd);
                guard.deadline()
            };
            let Some(deadline) = deadline else {
                let _ = done_rx.wait_for(|done| *done).await;
                break;
            };
            tokio::select! {
                res = done_rx.wait_for(|done| *done) => {
                    let _ = res;
                    break;
                }
                () = tokio::time::sleep_until(deadline) => {
                    let mut engine = lock(&self.inner.engine);
                    let mut guard = lock(&cmd);
                    if guard.status().is_terminal() {
                        break;
                    }
                    if guard
                        .deadline()
                        .is_some_and(|at| at <= tokio::time::Instant::now())
                    {
                        let wire = guard.to_wire();
                        guard.fail(Error::CommandTimeout(wire.clone()));
                        drop(guard);
                        engine.remove(&cmd);
                        if name == "IDLE" {
                            engine.set_idling(false);
                        }
                        return Err(Error::CommandTimeout(wire));
                    }
                }
            }
        }

        if name == "IDLE" {
            lock(&self.inner.engine).set_idling(false);
        }

        let mut guard = lock(&cmd);
        if let Some(err) = guard.take_error() {
            return Err(err);
        }
        guard
            .response()
            .ok_or_else(|| Error::Protocol("command completed without a tagged status".to_string()))
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        match tokio::time::timeout(self.inner.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::CommandTimeout(format!(
                "no response within {:?}",
                self.inner.timeout
            ))),
        }
    }

    fn new_tag(&self) -> String {
        lock(&self.inner.engine).new_tag()
    }

    async fn simple(&self, name: &str, args: &[&str]) -> Result<Response> {
        let command = Command::new(name, self.new_tag()).args(args.iter().copied());
        self.with_timeout(self.execute(command)).await
    }

    // === Session verbs ===

    /// Authenticates with LOGIN. On OK the connection enters the
    /// authenticated state and inline CAPABILITY lines are merged.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out; a NO/BAD reply is reported in the response.
    pub async fn login(&self, user: &str, password: &str) -> Result<Response> {
        let command = Command::new("LOGIN", self.new_tag())
            .arg(user)
            .arg(quoted(password));
        let response = self
            .with_timeout(self.execute_scrubbed(command, Some(password)))
            .await?;
        if response.result == Status::Ok {
            let mut engine = lock(&self.inner.engine);
            engine.set_state(ConnectionState::Auth);
            for line in &response.lines {
                if parse::contains(line, b"CAPABILITY") {
                    let text = String::from_utf8_lossy(line).replace("CAPABILITY", "");
                    engine.merge_capabilities(text.split_whitespace().map(ToString::to_string));
                }
            }
        }
        Ok(response)
    }

    /// Authenticates with the XOAUTH2 SASL mechanism (RFC-less but widely
    /// deployed; Gmail and Outlook both speak it).
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out; a NO/BAD reply is reported in the response.
    pub async fn xoauth2(&self, user: &str, token: &str) -> Result<Response> {
        let sasl = BASE64.encode(format!("user={user}\x01auth=Bearer {token}\x01\x01"));
        let command = Command::new("AUTHENTICATE", self.new_tag())
            .arg("XOAUTH2")
            .arg(sasl.as_str());
        let response = self
            .with_timeout(self.execute_scrubbed(command, Some(&sasl)))
            .await?;
        if response.result == Status::Ok {
            lock(&self.inner.engine).set_state(ConnectionState::Auth);
        }
        Ok(response)
    }

    /// Ends the session with LOGOUT; the server closes the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the command times out or the connection drops
    /// before the reply.
    pub async fn logout(&self) -> Result<Response> {
        let command = Command::new("LOGOUT", self.new_tag());
        let response = self.with_timeout(self.execute(command)).await?;
        if response.result == Status::Ok {
            lock(&self.inner.engine).set_state(ConnectionState::Logout);
        }
        Ok(response)
    }

    /// Opens a mailbox read-write with SELECT.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn select(&self, mailbox: &str) -> Result<Response> {
        let command = Command::new("SELECT", self.new_tag()).arg(mailbox);
        let response = self.with_timeout(self.execute(command)).await?;
        if response.result == Status::Ok {
            lock(&self.inner.engine).set_state(ConnectionState::Selected);
        }
        Ok(response)
    }

    /// Closes the selected mailbox with the IMAP CLOSE command, returning
    /// the connection to the authenticated state. The transport stays up;
    /// use [`Client::logout`] to disconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn close(&self) -> Result<Response> {
        let command = Command::new("CLOSE", self.new_tag());
        let response = self.with_timeout(self.execute(command)).await?;
        if response.result == Status::Ok {
            lock(&self.inner.engine).set_state(ConnectionState::Auth);
        }
        Ok(response)
    }

    /// Opens a mailbox read-only with EXAMINE.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn examine(&self, mailbox: &str) -> Result<Response> {
        self.simple("EXAMINE", &[mailbox]).await
    }

    // === Mailbox verbs ===

    /// Searches the selected mailbox by message sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn search(&self, criteria: &[&str], charset: Option<&str>) -> Result<Response> {
        self.search_by(criteria, charset, false).await
    }

    /// Searches the selected mailbox by UID.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn uid_search(&self, criteria: &[&str], charset: Option<&str>) -> Result<Response> {
        self.search_by(criteria, charset, true).await
    }

    async fn search_by(
        &self,
        criteria: &[&str],
        charset: Option<&str>,
        by_uid: bool,
    ) -> Result<Response> {
        let mut command = Command::new("SEARCH", self.new_tag());
        if by_uid {
            command = command.prefix("UID");
        }
        if let Some(charset) = charset {
            command = command.arg("CHARSET").arg(charset);
        }
        command = command.args(criteria.iter().copied());
        self.with_timeout(self.execute(command)).await
    }

    /// Fetches message data. The response is held open across literals
    /// and multi-line payloads until its parentheses balance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandTimeout`] if the per-command deadline
    /// expires, or an error if no mailbox is selected.
    pub async fn fetch(&self, message_set: &str, message_parts: &str) -> Result<Response> {
        self.fetch_by(message_set, message_parts, false).await
    }

    async fn fetch_by(
        &self,
        message_set: &str,
        message_parts: &str,
        by_uid: bool,
    ) -> Result<Response> {
        let mut command = Command::fetch(self.new_tag())
            .arg(message_set)
            .arg(message_parts)
            .timeout(Some(self.inner.timeout));
        if by_uid {
            command = command.prefix("UID");
        }
        self.execute(command).await
    }

    /// Alters message flags with STORE; untagged replies arrive as FETCH.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn store(&self, args: &[&str]) -> Result<Response> {
        self.store_by(args, false).await
    }

    async fn store_by(&self, args: &[&str], by_uid: bool) -> Result<Response> {
        let mut command = Command::new("STORE", self.new_tag())
            .untagged_name("FETCH")
            .args(args.iter().copied());
        if by_uid {
            command = command.prefix("UID");
        }
        self.with_timeout(self.execute(command)).await
    }

    /// Copies messages to another mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn copy(&self, args: &[&str]) -> Result<Response> {
        self.copy_by(args, false).await
    }

    async fn copy_by(&self, args: &[&str], by_uid: bool) -> Result<Response> {
        let mut command = Command::new("COPY", self.new_tag()).args(args.iter().copied());
        if by_uid {
            command = command.prefix("UID");
        }
        self.with_timeout(self.execute(command)).await
    }

    /// Moves messages to another mailbox (RFC 6851).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the server lacks the MOVE
    /// capability, or an error if the command times out.
    pub async fn r#move(&self, uid_set: &str, mailbox: &str) -> Result<Response> {
        self.move_by(uid_set, mailbox, false).await
    }

    async fn move_by(&self, uid_set: &str, mailbox: &str, by_uid: bool) -> Result<Response> {
        if !self.has_capability("MOVE") {
            return Err(Error::Protocol("server has not MOVE capability".to_string()));
        }
        let mut command = Command::new("MOVE", self.new_tag()).arg(uid_set).arg(mailbox);
        if by_uid {
            command = command.prefix("UID");
        }
        self.with_timeout(self.execute(command)).await
    }

    /// Permanently removes messages flagged `\Deleted`.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn expunge(&self) -> Result<Response> {
        self.expunge_by(&[], false).await
    }

    async fn expunge_by(&self, args: &[&str], by_uid: bool) -> Result<Response> {
        let mut command = Command::new("EXPUNGE", self.new_tag()).args(args.iter().copied());
        if by_uid {
            command = command.prefix("UID");
        }
        self.with_timeout(self.execute(command)).await
    }

    /// Dispatches a `UID` meta-command to its underlying verb.
    ///
    /// Supported subcommands: FETCH, STORE, COPY, MOVE, and EXPUNGE (the
    /// last requires UIDPLUS).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an unknown subcommand, a missing
    /// UIDPLUS capability on EXPUNGE, or missing arguments — in every case
    /// before anything is written to the wire.
    pub async fn uid(&self, subcommand: &str, criteria: &[&str]) -> Result<Response> {
        {
            let engine = lock(&self.inner.engine);
            let state = engine.state();
            let spec = command_spec("UID")
                .ok_or_else(|| Error::Protocol("unknown command UID".to_string()))?;
            if !spec.allows(state) {
                return Err(Error::Protocol(format!(
                    "command UID illegal in state {state}"
                )));
            }
        }
        match subcommand.to_ascii_uppercase().as_str() {
            "FETCH" => {
                let [message_set, message_parts, ..] = criteria else {
                    return Err(Error::Protocol(
                        "UID FETCH needs a message set and message parts".to_string(),
                    ));
                };
                self.fetch_by(message_set, message_parts, true).await
            }
            "STORE" => self.store_by(criteria, true).await,
            "COPY" => self.copy_by(criteria, true).await,
            "MOVE" => {
                let [uid_set, mailbox, ..] = criteria else {
                    return Err(Error::Protocol(
                        "UID MOVE needs a uid set and a mailbox".to_string(),
                    ));
                };
                self.move_by(uid_set, mailbox, true).await
            }
            "EXPUNGE" => {
                if !self.has_capability("UIDPLUS") {
                    return Err(Error::Protocol(
                        "EXPUNGE with uids is only valid with UIDPLUS capability".to_string(),
                    ));
                }
                self.expunge_by(criteria, true).await
            }
            other => Err(Error::Protocol(format!(
                "command UID only possible with COPY, FETCH, MOVE, EXPUNGE (w/UIDPLUS) or STORE (was {other})"
            ))),
        }
    }

    /// Appends a message to a mailbox; the body is uploaded as a literal
    /// when the server sends its continuation prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandTimeout`] if the per-command deadline
    /// expires, or [`Error::Protocol`] for an invalid date.
    pub async fn append(
        &self,
        message: &[u8],
        mailbox: &str,
        flags: Option<&str>,
        date: Option<InternalDate>,
    ) -> Result<Response> {
        let mut args = vec![mailbox.to_string()];
        if let Some(flags) = flags {
            if flags.starts_with('(') && flags.ends_with(')') {
                args.push(flags.to_string());
            } else {
                args.push(format!("({flags})"));
            }
        }
        if let Some(date) = date {
            args.push(internaldate(&date)?);
        }
        args.push(format!("{{{}}}", message.len()));
        lock(&self.inner.engine).stage_append_literal(message.to_vec());
        let command = Command::new("APPEND", self.new_tag())
            .args(args)
            .timeout(Some(self.inner.timeout));
        self.execute(command).await
    }

    // === Simple verbs ===

    /// Keeps the connection alive; also the designated catch-all for
    /// unsolicited untagged responses.
    ///
    /// # Errors
    ///
    /// Returns an error if the command times out.
    pub async fn noop(&self) -> Result<Response> {
        self.simple("NOOP", &[]).await
    }

    /// Requests a server checkpoint of the selected mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if no mailbox is selected or the command times
    /// out.
    pub async fn check(&self) -> Result<Response> {
        self.simple("CHECK", &[]).await
    }

    /// Queries mailbox status attributes, e.g. `(MESSAGES UNSEEN)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn status(&self, mailbox: &str, names: &str) -> Result<Response> {
        self.simple("STATUS", &[mailbox, names]).await
    }

    /// Subscribes to a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn subscribe(&self, mailbox: &str) -> Result<Response> {
        self.simple("SUBSCRIBE", &[mailbox]).await
    }

    /// Unsubscribes from a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn unsubscribe(&self, mailbox: &str) -> Result<Response> {
        self.simple("UNSUBSCRIBE", &[mailbox]).await
    }

    /// Lists subscribed mailboxes.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn lsub(&self, reference_name: &str, mailbox_pattern: &str) -> Result<Response> {
        self.simple("LSUB", &[reference_name, mailbox_pattern]).await
    }

    /// Lists mailboxes matching a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn list(&self, reference_name: &str, mailbox_pattern: &str) -> Result<Response> {
        self.simple("LIST", &[reference_name, mailbox_pattern]).await
    }

    /// Creates a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn create(&self, mailbox: &str) -> Result<Response> {
        self.simple("CREATE", &[mailbox]).await
    }

    /// Deletes a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn delete(&self, mailbox: &str) -> Result<Response> {
        self.simple("DELETE", &[mailbox]).await
    }

    /// Renames a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn rename(&self, old_mailbox: &str, new_mailbox: &str) -> Result<Response> {
        self.simple("RENAME", &[old_mailbox, new_mailbox]).await
    }

    /// Queries the quota roots of a mailbox; untagged replies arrive as
    /// QUOTA.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is illegal in the current state or
    /// times out.
    pub async fn getquotaroot(&self, mailbox: &str) -> Result<Response> {
        let command = Command::new("GETQUOTAROOT", self.new_tag())
            .untagged_name("QUOTA")
            .arg(mailbox);
        self.with_timeout(self.execute(command)).await
    }

    /// Queries the server namespaces (RFC 2342).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the server lacks the NAMESPACE
    /// capability, or an error if the command times out.
    pub async fn namespace(&self) -> Result<Response> {
        if !self.has_capability("NAMESPACE") {
            return Err(Error::Protocol(
                "server has not NAMESPACE capability".to_string(),
            ));
        }
        let command = Command::new("NAMESPACE", self.new_tag());
        self.with_timeout(self.execute(command)).await
    }

    /// Enables a capability (RFC 5161).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the server lacks the ENABLE
    /// capability, or an error if the command times out.
    pub async fn enable(&self, capability: &str) -> Result<Response> {
        if !self.has_capability("ENABLE") {
            return Err(Error::Protocol(
                "server has not ENABLE capability".to_string(),
            ));
        }
        self.simple("ENABLE", &[capability]).await
    }

    /// Identifies the client to the server (RFC 2971).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the field list exceeds the RFC
    /// limits, or an error if the command times out.
    pub async fn id(&self, fields: &[(&str, Option<&str>)]) -> Result<Response> {
        let arg = id_fields(fields)?;
        let command = Command::new("ID", self.new_tag()).arg(arg);
        self.with_timeout(self.execute(command)).await
    }

    // === IDLE ===

    /// Submits an IDLE command and waits for its termination. Prefer
    /// [`Client::idle_start`], which also waits for activation and arms
    /// the inactivity watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the server lacks the IDLE
    /// capability.
    pub async fn idle(&self) -> Result<Response> {
        let (tag, queue, has_idle) = {
            let mut engine = lock(&self.inner.engine);
            (
                engine.new_tag(),
                engine.push_sender(),
                engine.capabilities().has("IDLE"),
            )
        };
        if !has_idle {
            return Err(Error::Protocol("server has not IDLE capability".to_string()));
        }
        lock(&self.inner.engine).set_idling(false);
        self.execute(Command::idle(tag, queue)).await
    }

    /// Enters IDLE: submits the command, waits for the server's
    /// continuation, and arms an inactivity waiter (capped at 29 minutes)
    /// that enqueues [`ServerPush::Stop`] when it fires.
    ///
    /// Returns the task driving the IDLE command; await it after
    /// [`Client::idle_done`] for the final tagged status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the server refuses IDLE or lacks
    /// the capability.
    pub async fn idle_start(&self, timeout: Duration) -> Result<JoinHandle<Result<Response>>> {
        if let Some(waiter) = lock(&self.inner.idle_waiter).take() {
            waiter.abort();
        }
        lock(&self.inner.engine).set_idling(false);
        let mut idling_rx = lock(&self.inner.engine).idling_rx();
        let mut idle_task = {
            let client = self.clone();
            tokio::spawn(async move { client.idle().await })
        };
        tokio::select! {
            res = &mut idle_task => {
                return match res {
                    Ok(Err(err)) => Err(err),
                    _ => Err(Error::Protocol(
                        "server returned error to IDLE command".to_string(),
                    )),
                };
            }
            res = idling_rx.wait_for(|idling| *idling) => {
                if res.is_err() {
                    return Err(Error::ConnectionLost(
                        "connection dropped before IDLE activation".to_string(),
                    ));
                }
            }
        }
        let waiter = {
            let client = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout.min(TWENTY_NINE_MINUTES)).await;
                client.stop_wait_server_push();
            })
        };
        *lock(&self.inner.idle_waiter) = Some(waiter);
        Ok(idle_task)
    }

    /// Ends IDLE: cancels the inactivity waiter and writes `DONE`; the
    /// server's tagged status then terminates the IDLE command normally.
    pub fn idle_done(&self) {
        if let Some(waiter) = lock(&self.inner.idle_waiter).take() {
            waiter.abort();
        }
        lock(&self.inner.engine).send_line("DONE", None);
    }

    /// Receives one batch of unsolicited server events from the IDLE push
    /// queue. [`ServerPush::Stop`] means the inactivity waiter fired and
    /// the caller should [`Client::idle_done`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandTimeout`] if nothing arrives in time.
    pub async fn wait_server_push(&self, timeout: Duration) -> Result<ServerPush> {
        let mut rx = self.inner.push_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(push)) => Ok(push),
            Ok(None) => Err(Error::ConnectionLost("push queue closed".to_string())),
            Err(_) => Err(Error::CommandTimeout("no server push".to_string())),
        }
    }

    /// Wakes the push-queue consumer with the stop sentinel if an IDLE
    /// command is in flight. Returns whether the sentinel was enqueued.
    pub fn stop_wait_server_push(&self) -> bool {
        let engine = lock(&self.inner.engine);
        if engine.has_pending_idle_command() {
            engine.push_stop();
            true
        } else {
            false
        }
    }

    /// Returns `true` while an IDLE command is in flight.
    #[must_use]
    pub fn has_pending_idle_command(&self) -> bool {
        lock(&self.inner.engine).has_pending_idle_command()
    }

    /// Returns `true` once the server acknowledged IDLE with its
    /// continuation (checked locally, not on the server).
    #[must_use]
    pub fn is_idling(&self) -> bool {
        lock(&self.inner.engine).is_idling()
    }

    // === Introspection ===

    /// Returns `true` if the server advertised the capability.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        lock(&self.inner.engine).capabilities().has(name)
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        lock(&self.inner.engine).state()
    }

    /// Returns the negotiated protocol version, once CAPABILITY has been
    /// processed.
    #[must_use]
    pub fn imap_version(&self) -> Option<ImapVersion> {
        lock(&self.inner.engine).imap_version()
    }

    /// Gracefully terminates the session: ends IDLE if active, closes the
    /// selected mailbox, then logs out.
    ///
    /// # Errors
    ///
    /// Returns an error if CLOSE or LOGOUT fails or times out.
    pub async fn shutdown(&self) -> Result<()> {
        if self.has_pending_idle_command() {
            self.idle_done();
        }
        if self.get_state() == ConnectionState::Selected {
            self.close().await?;
        }
        self.logout().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.get_state())
            .field("idling", &self.is_idling())
            .finish_non_exhaustive()
    }
}

/// Extracts the message count from an `EXISTS` line of a SELECT, EXAMINE,
/// or NOOP response.
#[must_use]
pub fn extract_exists(response: &Response) -> Option<u32> {
    response.lines.iter().find_map(|line| {
        let text = std::str::from_utf8(line).ok()?;
        text.strip_suffix(" EXISTS")?.trim().parse().ok()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_exists() {
        let response = Response {
            result: Status::Ok,
            lines: vec![
                b"FLAGS (\\Seen \\Deleted)".to_vec(),
                b"172 EXISTS".to_vec(),
                b"SELECT completed".to_vec(),
            ],
        };
        assert_eq!(extract_exists(&response), Some(172));
    }

    #[test]
    fn test_extract_exists_absent() {
        let response = Response {
            result: Status::Ok,
            lines: vec![b"NOOP completed".to_vec()],
        };
        assert_eq!(extract_exists(&response), None);
    }
}

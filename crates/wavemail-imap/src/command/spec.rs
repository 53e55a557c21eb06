//! Static command admission table.
//!
//! Maps every supported command name to the connection states it may be
//! issued from and its execution mode. This table is the sole source of
//! truth for command admissibility; commands not listed here cannot be
//! executed.

use crate::protocol::ConnectionState;

/// Execution mode of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Holds the pipeline exclusively for its duration.
    Sync,
    /// May run concurrently with other async commands whose
    /// untagged-response name differs.
    Async,
}

/// Admission entry for a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Canonical command name.
    pub name: &'static str,
    /// States the command may be issued from.
    pub valid_states: &'static [ConnectionState],
    /// Execution mode.
    pub mode: ExecMode,
}

impl CommandSpec {
    /// Returns `true` if the command may be issued from `state`.
    #[must_use]
    pub fn allows(&self, state: ConnectionState) -> bool {
        self.valid_states.contains(&state)
    }
}

use ConnectionState::{Auth, Logout, NonAuth, Selected};
use ExecMode::{Async, Sync};

const ANY: &[ConnectionState] = &[NonAuth, Auth, Logout, Selected];
const AUTHENTICATED: &[ConnectionState] = &[Auth, Selected];
const SELECTED: &[ConnectionState] = &[Selected];
const NON_AUTH: &[ConnectionState] = &[NonAuth];
const AUTH_ONLY: &[ConnectionState] = &[Auth];
const GREETED: &[ConnectionState] = &[NonAuth, Auth, Selected];

const fn entry(
    name: &'static str,
    valid_states: &'static [ConnectionState],
    mode: ExecMode,
) -> CommandSpec {
    CommandSpec {
        name,
        valid_states,
        mode,
    }
}

/// Looks up the admission entry for a command name (case-insensitive).
#[must_use]
pub fn command_spec(name: &str) -> Option<CommandSpec> {
    let spec = match name.to_ascii_uppercase().as_str() {
        "APPEND" => entry("APPEND", AUTHENTICATED, Sync),
        "AUTHENTICATE" => entry("AUTHENTICATE", NON_AUTH, Sync),
        "CAPABILITY" => entry("CAPABILITY", GREETED, Async),
        "CHECK" => entry("CHECK", SELECTED, Async),
        "CLOSE" => entry("CLOSE", SELECTED, Sync),
        "COMPRESS" => entry("COMPRESS", AUTH_ONLY, Sync),
        "COPY" => entry("COPY", SELECTED, Async),
        "CREATE" => entry("CREATE", AUTHENTICATED, Async),
        "DELETE" => entry("DELETE", AUTHENTICATED, Async),
        "DELETEACL" => entry("DELETEACL", AUTHENTICATED, Async),
        "ENABLE" => entry("ENABLE", AUTH_ONLY, Sync),
        "EXAMINE" => entry("EXAMINE", AUTHENTICATED, Sync),
        "EXPUNGE" => entry("EXPUNGE", SELECTED, Async),
        "FETCH" => entry("FETCH", SELECTED, Async),
        "GETACL" => entry("GETACL", AUTHENTICATED, Async),
        "GETQUOTA" => entry("GETQUOTA", AUTHENTICATED, Async),
        "GETQUOTAROOT" => entry("GETQUOTAROOT", AUTHENTICATED, Async),
        "ID" => entry("ID", ANY, Async),
        "IDLE" => entry("IDLE", SELECTED, Sync),
        "LIST" => entry("LIST", AUTHENTICATED, Async),
        "LOGIN" => entry("LOGIN", NON_AUTH, Sync),
        "LOGOUT" => entry("LOGOUT", ANY, Sync),
        "LSUB" => entry("LSUB", AUTHENTICATED, Async),
        "MYRIGHTS" => entry("MYRIGHTS", AUTHENTICATED, Async),
        "MOVE" => entry("MOVE", SELECTED, Sync),
        "NAMESPACE" => entry("NAMESPACE", AUTHENTICATED, Async),
        "NOOP" => entry("NOOP", GREETED, Async),
        "RENAME" => entry("RENAME", AUTHENTICATED, Async),
        "SEARCH" => entry("SEARCH", SELECTED, Async),
        "SELECT" => entry("SELECT", AUTHENTICATED, Sync),
        "SETACL" => entry("SETACL", AUTHENTICATED, Sync),
        "SETQUOTA" => entry("SETQUOTA", AUTHENTICATED, Sync),
        "SORT" => entry("SORT", SELECTED, Async),
        "STARTTLS" => entry("STARTTLS", NON_AUTH, Sync),
        "STATUS" => entry("STATUS", AUTHENTICATED, Async),
        "STORE" => entry("STORE", SELECTED, Async),
        "SUBSCRIBE" => entry("SUBSCRIBE", AUTHENTICATED, Sync),
        "THREAD" => entry("THREAD", SELECTED, Async),
        "UID" => entry("UID", SELECTED, Async),
        "UNSUBSCRIBE" => entry("UNSUBSCRIBE", AUTHENTICATED, Sync),
        _ => return None,
    };
    Some(spec)
}

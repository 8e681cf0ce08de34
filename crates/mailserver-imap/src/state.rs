//! Session state (C4), a sum type mirroring
//! `mailserver-smtp/src/state.rs`'s `Session` — one server-owned enum per
//! connection rather than a struct of optional fields, since the engine
//! holds exactly one session value across an indefinitely long-lived
//! connection and each state legalizes a different command set (spec.md
//! §4.5's `NOT_AUTHENTICATED` / `AUTHENTICATED` / `SELECTED` / `LOGOUT`).
//!
//! `IDLE` and the `APPEND` literal read don't get their own variants: both
//! complete within a single command-handling call (a `+` continuation
//! followed immediately by more framer reads) rather than spanning a return
//! to the top-level command-dispatch loop, so they're local control flow in
//! `engine.rs`, not persisted state. `AUTHENTICATE`'s continuation does span
//! that loop (the next line is a bare base64 fragment, not a tagged
//! command), so it gets the `Authenticating` variant below, just as
//! `mailserver-smtp`'s `Session::Authenticating` does.

use mailserver_core::model::Mailbox;

use crate::session_cache::SessionCache;

/// Which step of an `AUTHENTICATE` exchange the next continuation line
/// supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// `AUTHENTICATE PLAIN`: the next line is the full SASL PLAIN blob.
    Plain,
    /// `AUTHENTICATE LOGIN`, waiting for the base64 username.
    LoginUsername,
    /// `AUTHENTICATE LOGIN`, username already read; waiting for the
    /// base64 password.
    LoginPassword,
}

/// One connection's IMAP session state.
#[derive(Debug, Clone)]
pub enum Session {
    /// Just connected, or greeted but not yet authenticated. `CAPABILITY`,
    /// `NOOP`, `LOGOUT`, `STARTTLS`, `LOGIN`, and `AUTHENTICATE` are legal.
    NotAuthenticated,
    /// Mid-`AUTHENTICATE` continuation: the next line is a base64 SASL
    /// fragment, not a command.
    Authenticating {
        /// Tag of the original `AUTHENTICATE` command, echoed on the
        /// eventual tagged completion.
        tag: crate::types::Tag,
        step: AuthStep,
        /// Username already decoded, once `AUTHENTICATE LOGIN`'s first
        /// continuation line arrives.
        pending_username: Option<String>,
    },
    /// Authenticated but no mailbox selected. Mailbox-management commands
    /// (`CREATE`, `DELETE`, `RENAME`, `LIST`, `LSUB`, `SUBSCRIBE`,
    /// `UNSUBSCRIBE`, `STATUS`, `APPEND`, `SELECT`, `EXAMINE`) are legal.
    Authenticated {
        /// Login identifier (email).
        user: String,
    },
    /// A mailbox is open. Message commands (`FETCH`, `STORE`, `SEARCH`,
    /// `COPY`, `MOVE`, `EXPUNGE`, `CLOSE`, `UNSELECT`) are additionally
    /// legal; everything legal in `Authenticated` remains legal too.
    Selected {
        user: String,
        /// The open mailbox's repository row.
        mailbox: Mailbox,
        /// Whether this mailbox was opened via `EXAMINE` (read-only) rather
        /// than `SELECT`.
        read_only: bool,
        /// UID-ascending sequence-number view, rebuilt on open and on
        /// every `EXPUNGE`/`CLOSE`/re-`SELECT`.
        cache: SessionCache,
    },
}

impl Default for Session {
    fn default() -> Self {
        Self::NotAuthenticated
    }
}

impl Session {
    /// The authenticated user's login email, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::NotAuthenticated | Self::Authenticating { .. } => None,
            Self::Authenticated { user } | Self::Selected { user, .. } => Some(user),
        }
    }

    /// Whether a mailbox is currently open.
    #[must_use]
    pub const fn is_selected(&self) -> bool {
        matches!(self, Self::Selected { .. })
    }

    /// Drops back to `Authenticated`, discarding the open mailbox — used by
    /// `CLOSE` and `UNSELECT`.
    #[must_use]
    pub fn unselect(self) -> Self {
        match self {
            Self::Selected { user, .. } => Self::Authenticated { user },
            other => other,
        }
    }
}

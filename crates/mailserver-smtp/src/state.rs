//! Session state (C4), a sum type per spec.md §9's "mutable session bag"
//! re-architecture note rather than a struct of optional fields.
//!
//! Modeled after the teacher's type-state client (`Connected`,
//! `MailTransaction`, `RecipientAdded`, `Data` structs in
//! `connection/client.rs`), turned into one server-side enum the way
//! `empath-smtp`'s `state::State` wraps per-phase structs — a sum type is a
//! better fit server-side since the engine owns one session value across an
//! indefinitely long-lived connection rather than moving a typed value
//! through a chain of method calls.

use crate::types::Address;

/// An in-progress mail transaction: sender plus accumulated recipients.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    /// `MAIL FROM` sender, with angle brackets and parameters stripped.
    pub sender: Option<Address>,
    /// `RCPT TO` recipients accepted so far, in order.
    pub recipients: Vec<Address>,
}

impl Transaction {
    /// Returns `true` once `MAIL FROM` has been accepted.
    #[must_use]
    pub const fn started(&self) -> bool {
        self.sender.is_some()
    }
}

/// The `AUTH LOGIN` continuation sub-state: which piece of the credential
/// the next base64 line supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLoginStep {
    /// Waiting for the base64-encoded username.
    Username,
    /// Waiting for the base64-encoded password, `username` already read.
    Password,
}

/// One connection's SMTP session state.
#[derive(Debug, Clone)]
pub enum Session {
    /// Just connected; no `EHLO`/`HELO` yet.
    Connected,
    /// `EHLO`/`HELO` completed. Carries the transaction accumulated so far
    /// (empty until `MAIL FROM`) rather than splitting `GREETED`,
    /// `MAIL_FROM`, and `RCPT_TO` into distinct variants, since spec.md's
    /// three states share every field and differ only in which commands are
    /// currently legal — a property [`Session::allows`] encodes directly.
    Greeted {
        /// Client hostname from `EHLO`/`HELO`.
        client_hostname: String,
        /// Whether `EHLO` (vs. plain `HELO`) was used; gates extended
        /// features like multi-line capability advertisement.
        extended: bool,
        /// Whether this session has completed `AUTH`.
        authenticated: bool,
        /// Authenticated user's email, if any.
        auth_user: Option<String>,
        /// The in-progress transaction, empty before `MAIL FROM`.
        transaction: Transaction,
    },
    /// `DATA` was accepted; accumulating body lines until the bare `.`
    /// terminator.
    Data {
        /// Session fields carried over from `Greeted`, restored on return.
        client_hostname: String,
        extended: bool,
        authenticated: bool,
        auth_user: Option<String>,
        transaction: Transaction,
        /// Body bytes accumulated so far, already dot-unstuffed.
        buffer: Vec<u8>,
        /// Set once `buffer` would exceed the configured maximum message
        /// size; further body lines are discarded rather than buffered, but
        /// the engine keeps reading until the terminator so it stays in
        /// sync with the client before replying `552`.
        oversized: bool,
    },
    /// Mid-`AUTH PLAIN` or `AUTH LOGIN` continuation: the next line is a
    /// base64 credential fragment, not a command.
    Authenticating {
        client_hostname: String,
        extended: bool,
        transaction: Transaction,
        /// `None` for `AUTH PLAIN`'s single continuation line; `Some` for
        /// `AUTH LOGIN`'s two-step username/password exchange.
        login_step: Option<AuthLoginStep>,
        /// Username already decoded, set once `AUTH LOGIN`'s first line
        /// arrives.
        pending_username: Option<String>,
    },
}

impl Default for Session {
    fn default() -> Self {
        Self::Connected
    }
}

impl Session {
    /// Resets to the post-greeting state, clearing any in-progress
    /// transaction and AUTH continuation — used by `RSET` and by `STARTTLS`
    /// (which additionally discards EHLO/auth state entirely, so it returns
    /// to `Connected` instead; see [`Session::reset_to_connected`]).
    #[must_use]
    pub fn reset_transaction(self) -> Self {
        match self {
            Self::Connected => Self::Connected,
            Self::Greeted { client_hostname, extended, authenticated, auth_user, .. }
            | Self::Data { client_hostname, extended, authenticated, auth_user, .. } => {
                Self::Greeted { client_hostname, extended, authenticated, auth_user, transaction: Transaction::default() }
            }
            Self::Authenticating { client_hostname, extended, .. } => {
                Self::Greeted { client_hostname, extended, authenticated: false, auth_user: None, transaction: Transaction::default() }
            }
        }
    }

    /// Discards all session state after a `STARTTLS` upgrade, per spec.md
    /// §4.2: "After STARTTLS, SMTP must discard prior EHLO and
    /// authentication state."
    #[must_use]
    pub const fn reset_to_connected() -> Self {
        Self::Connected
    }

    /// Whether this session has completed `AUTH`.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(
            self,
            Self::Greeted { authenticated: true, .. } | Self::Data { authenticated: true, .. }
        )
    }

    /// The authenticated user's email, if any.
    #[must_use]
    pub fn auth_user(&self) -> Option<&str> {
        match self {
            Self::Greeted { auth_user, .. } | Self::Data { auth_user, .. } => auth_user.as_deref(),
            Self::Connected | Self::Authenticating { .. } => None,
        }
    }

    /// Whether `EHLO` (rather than `HELO`) greeted this session.
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        matches!(
            self,
            Self::Greeted { extended: true, .. }
                | Self::Data { extended: true, .. }
                | Self::Authenticating { extended: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_connected() {
        assert!(matches!(Session::default(), Session::Connected));
    }

    #[test]
    fn reset_transaction_clears_recipients_but_keeps_greeting() {
        let session = Session::Greeted {
            client_hostname: "c".to_string(),
            extended: true,
            authenticated: true,
            auth_user: Some("bob@example.com".to_string()),
            transaction: Transaction {
                sender: Some(Address::new("a@example.com").unwrap()),
                recipients: vec![Address::new("b@example.com").unwrap()],
            },
        };
        let reset = session.reset_transaction();
        assert!(reset.is_authenticated());
        assert_eq!(reset.auth_user(), Some("bob@example.com"));
        match reset {
            Session::Greeted { transaction, .. } => assert!(!transaction.started()),
            _ => panic!("expected Greeted"),
        }
    }

    #[test]
    fn starttls_discards_everything() {
        let session = Session::Greeted {
            client_hostname: "c".to_string(),
            extended: true,
            authenticated: true,
            auth_user: Some("bob@example.com".to_string()),
            transaction: Transaction::default(),
        };
        drop(session);
        let reset = Session::reset_to_connected();
        assert!(matches!(reset, Session::Connected));
        assert!(!reset.is_authenticated());
    }
}

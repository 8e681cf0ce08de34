//! # mailserver-core
//!
//! Shared foundation for the SMTP and IMAP protocol engines: the
//! persistence data model, the repository/policy trait objects each engine
//! is constructed with, server configuration, the line/literal framer, and
//! the TLS acceptor.
//!
//! This crate contains no protocol logic of its own — see
//! `mailserver-smtp` and `mailserver-imap` for the engines that consume it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod fake;
pub mod framer;
pub mod model;
pub mod repository;
pub mod tls;

pub use config::{ConfigFile, ListenerConfig, Security, ServerConfig, ServerConfigBuilder};
pub use error::{Error, Result};
pub use framer::Framer;
pub use model::{EntryFlags, MailEntry, Mailbox, Message, Recipient, User};
pub use repository::{
    BlobStore, Event, EventSink, MailEntryRepository, MailboxRepository, MessageRepository,
    RelayDecision, RelayPolicy, Repository, UserRepository,
};

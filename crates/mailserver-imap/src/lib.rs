//! # mailserver-imap
//!
//! IMAP4rev1 (RFC 3501) protocol engine: the server side of an IMAP
//! connection, mediating between a TCP/TLS client and the
//! `mailserver_core::repository::Repository` abstraction.
//!
//! ## Modules
//!
//! - [`engine`]: the connection driver — greeting, idle-timeout command
//!   loop, per-state dispatch (`NOT_AUTHENTICATED` / `AUTHENTICATED` /
//!   `SELECTED`)
//! - [`state`]: the per-connection [`state::Session`] state machine
//! - [`command`]: command-line parsing, built on [`lexer`]
//! - [`fetch`], [`store`], [`search`]: `FETCH`/`STORE`/`SEARCH` argument
//!   parsing and response rendering
//! - [`append`]: `APPEND` delivery
//! - [`copy_move`], [`expunge`]: `COPY`/`MOVE`/`EXPUNGE` response-code and
//!   sequence-renumbering helpers
//! - [`idle`]: `IDLE` (RFC 2177) continuation/termination
//! - [`capability`]: the `CAPABILITY` list
//! - [`session_cache`]: the per-connection UID-ascending sequence-number
//!   view built at `SELECT` time
//! - [`response`]: tagged/untagged response rendering
//! - [`types`]: flags, mailbox names, sequence sets, and other IMAP value
//!   types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod append;
pub mod capability;
pub mod command;
pub mod copy_move;
mod engine;
mod error;
pub mod expunge;
pub mod fetch;
pub mod idle;
mod lexer;
pub mod response;
pub mod search;
pub mod session_cache;
pub mod state;
pub mod store;
pub mod types;

pub use engine::{run, ImapServer};
pub use error::{Error, Result};
pub use response::Response;
pub use state::{AuthStep, Session};

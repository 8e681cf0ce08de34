//! # mailserver-smtp
//!
//! SMTP submission and relay engine implementing RFC 5321/5321bis: the
//! server side of the greeting/`MAIL`/`RCPT`/`DATA` transaction, `STARTTLS`,
//! `AUTH PLAIN`/`LOGIN`, and the relay policy that decides which recipients
//! may be accepted.
//!
//! ## Modules
//!
//! - [`state`]: the session state sum type
//! - [`command`]: command-line parsing
//! - [`capability`]: `EHLO` extension advertisement
//! - [`relay`]: the `RCPT TO` relay-policy decision tree
//! - [`engine`]: the connection driver — banner timing and command dispatch
//! - [`types`]: addresses, extensions, replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod capability;
pub mod command;
pub mod engine;
mod error;
pub mod relay;
pub mod state;
pub mod types;

pub use engine::{run, SmtpServer};
pub use error::{Error, Result};
pub use state::{AuthLoginStep, Session, Transaction};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

//! Error types for the SMTP engine.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP engine error types.
///
/// These are internal/fatal conditions that end a connection task; protocol
/// and semantic failures a client can recover from (bad command, relay
/// denied, mailbox missing) are represented as [`crate::types::Reply`]
/// values sent back to the client, not as `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Error from the shared framer/TLS/repository layer.
    #[error(transparent)]
    Core(#[from] mailserver_core::Error),

    /// Invalid email address.
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// The connection was closed by the peer or by `QUIT`.
    #[error("connection closed")]
    Closed,
}

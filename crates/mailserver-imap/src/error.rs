//! Error type for the IMAP engine.
//!
//! These are internal/fatal conditions that end a connection task; protocol
//! and semantic failures a client can recover from (unknown command, wrong
//! state, storage failure mid-command) are represented as
//! [`crate::response::Response`] values sent back to the client, not as
//! [`Error`].

use thiserror::Error;

/// Errors that can occur while driving an IMAP connection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Command-line grammar error; the lexer couldn't tokenize the input.
    #[error("protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Error from the shared server runtime (framing, repository, TLS setup).
    #[error(transparent)]
    Core(#[from] mailserver_core::Error),

    /// Error from the MIME layer while assembling a FETCH response.
    #[error(transparent)]
    Mime(#[from] mailserver_mime::Error),

    /// The connection was closed (client `LOGOUT` or EOF); not a failure.
    #[error("connection closed")]
    Closed,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

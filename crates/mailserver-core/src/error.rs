//! Error types shared by the core crate.

use thiserror::Error;

/// Errors that can occur in core operations: framing, TLS setup, and
/// repository access.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or configuration error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The client exceeded the configured maximum line length.
    #[error("line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    /// A declared literal byte count was invalid or the connection closed
    /// before all literal bytes arrived.
    #[error("invalid or truncated literal: {0}")]
    Literal(String),

    /// A repository call failed.
    #[error("repository error: {0}")]
    Repository(String),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

//! Line/literal framer (C1).
//!
//! Splits a TCP byte stream into complete command lines, and — on explicit
//! request from an engine — into byte-counted literals. Exactly one frame is
//! produced per [`Framer::read_line`]/[`Framer::read_literal`] call so the
//! caller can switch modes before the next read, matching how both the SMTP
//! and IMAP engines need to interleave line-oriented commands with
//! byte-counted payloads (SMTP DATA is handled entirely in line mode with
//! dot-stuffing; IMAP literals use byte counts).

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const DEFAULT_READ_CAPACITY: usize = 8192;

/// Buffered line/literal reader and writer over an async duplex stream.
pub struct Framer<S> {
    reader: BufReader<S>,
    max_line_len: usize,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framer with the given maximum line length (in bytes,
    /// before CRLF stripping).
    pub fn new(stream: S, max_line_len: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_READ_CAPACITY, stream),
            max_line_len,
        }
    }

    /// Reads one complete line, terminated by `\n` with an optional
    /// preceding `\r`. Both terminators are stripped. Fails the connection
    /// with [`Error::LineTooLong`] if the accumulated line (including any
    /// terminator already seen) exceeds the configured maximum.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = BytesMut::with_capacity(256);
        let mut byte = [0u8; 1];
        loop {
            let n = self.reader.read(&mut byte).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed while reading a line",
                )));
            }
            if byte[0] == b'\n' {
                if buf.last() == Some(&b'\r') {
                    buf.truncate(buf.len() - 1);
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                return Ok(line);
            }
            buf.extend_from_slice(&byte);
            if buf.len() > self.max_line_len {
                return Err(Error::LineTooLong(self.max_line_len));
            }
        }
    }

    /// Reads exactly `n` bytes as a literal payload, then consumes at most
    /// one trailing `\r` and one trailing `\n` before returning to line
    /// mode. Cancelling the returned future (dropping it) releases any
    /// partially filled buffer with no lingering state in `self`.
    pub async fn read_literal(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; n];
        self.reader
            .read_exact(&mut data)
            .await
            .map_err(|e| Error::Literal(e.to_string()))?;

        let mut trailer = [0u8; 1];
        if self.peek_byte(&mut trailer).await? == Some(b'\r') {
            self.reader.read_exact(&mut trailer).await?;
            if self.peek_byte(&mut trailer).await? == Some(b'\n') {
                self.reader.read_exact(&mut trailer).await?;
            }
        } else if self.peek_byte(&mut trailer).await? == Some(b'\n') {
            self.reader.read_exact(&mut trailer).await?;
        }

        Ok(data)
    }

    /// Writes raw bytes and flushes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.reader.get_mut().write_all(data).await?;
        self.reader.get_mut().flush().await?;
        Ok(())
    }

    /// Peeks at the next byte without consuming it, reading more from the
    /// socket if the internal buffer is empty. Returns `None` at EOF.
    async fn peek_byte(&mut self, scratch: &mut [u8; 1]) -> Result<Option<u8>> {
        use tokio::io::AsyncBufReadExt;
        let buf = self.reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(None);
        }
        scratch[0] = buf[0];
        Ok(Some(buf[0]))
    }

    /// Replaces the underlying stream, preserving buffered state that
    /// precedes it (used when upgrading to TLS mid-connection via
    /// STARTTLS — any bytes already read from the plaintext socket but not
    /// yet consumed are discarded, since STARTTLS requires the next byte on
    /// the wire to be the TLS handshake).
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

//! TLS acceptor (C2): implicit TLS, `STARTTLS` upgrade, and dual-mode
//! ClientHello sniffing.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::{Error, Result};

/// A connection that may be plaintext or TLS-encrypted, uniform to the
/// protocol engines above it.
pub enum Stream {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS-encrypted (boxed to keep the enum small).
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Returns `true` if this connection is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a plaintext stream to TLS in place, for `STARTTLS`. The
    /// caller must already have written the plaintext positive response
    /// before calling this, since the next byte on the wire is expected to
    /// be the client's TLS handshake.
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let tls = acceptor.accept(tcp).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::Literal("stream is already TLS".to_string())),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Loads a PEM certificate chain and private key into a server-side
/// [`TlsAcceptor`].
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_bytes = std::fs::read(cert_path)?;
    let key_bytes = std::fs::read(key_path)?;

    let certs = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())?
        .ok_or_else(|| Error::Literal("no private key found in key file".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Outcome of sniffing the first bytes of a dual-mode connection (spec.md
/// §4.2: "a record whose leading byte is 0x16 and second byte is 0x03 is
/// treated as TLS ClientHello; otherwise plain").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    /// The connection opened with a TLS record header.
    Tls,
    /// The connection opened with plaintext protocol bytes.
    Plain,
}

/// A TCP stream peeked but not yet consumed, carrying the sniff result and
/// the peeked bytes forward so they aren't lost to the protocol engine.
pub struct SniffedStream {
    /// The sniff outcome.
    pub sniffed: Sniffed,
    /// The underlying, still-unconsumed TCP stream.
    pub tcp: TcpStream,
}

/// Peeks the first two bytes of a newly accepted dual-mode connection to
/// decide whether it opens with a TLS ClientHello or plaintext.
///
/// Uses `TcpStream::peek`, which does not consume the bytes, so the
/// subsequent TLS accept (or plaintext framer) sees the full stream from
/// the start.
pub async fn sniff(tcp: TcpStream) -> Result<SniffedStream> {
    let mut probe = [0u8; 2];
    let n = peek_exact(&tcp, &mut probe).await?;
    let sniffed = if n == 2 && probe[0] == 0x16 && probe[1] == 0x03 {
        Sniffed::Tls
    } else {
        Sniffed::Plain
    };
    Ok(SniffedStream { sniffed, tcp })
}

async fn peek_exact(tcp: &TcpStream, buf: &mut [u8; 2]) -> Result<usize> {
    loop {
        let n = tcp.peek(buf).await?;
        if n >= buf.len() || n == 0 {
            return Ok(n);
        }
        tokio::task::yield_now().await;
    }
}

//! Binary entry point: loads configuration, wires the repository and event
//! sink, and spawns one accept loop per configured SMTP/IMAP listener.
//!
//! Persistence is an external collaborator (spec.md §1) reached only
//! through `mailserver_core::repository::Repository`; this binary injects
//! `mailserver_core::fake::FakeRepository`, an in-memory implementation,
//! since no concrete database driver is part of this workspace's stack. A
//! deployment backed by a real store would supply its own `Repository`
//! impl here without touching either protocol engine.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mailserver_core::fake::{FakeRepository, TracingEventSink};
use mailserver_core::tls;
use mailserver_core::{ConfigFile, EventSink, ListenerConfig, Repository, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// SMTP + IMAP4rev1 mail server.
#[derive(Parser)]
#[command(name = "mailserver")]
#[command(about = "SMTP submission/relay and IMAP4rev1 mailbox server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "mailserver.toml")]
    config: PathBuf,

    /// Runs against the bundled in-memory repository instead of a
    /// persistent backend. This workspace ships no persistent
    /// `Repository` implementation, so this flag is required; it exists
    /// to make that explicit rather than defaulting to it silently.
    #[arg(long)]
    ephemeral: bool,

    /// Registers a test user as `email:password` (repeatable), valid only
    /// alongside `--ephemeral`.
    #[arg(long = "add-user", value_name = "EMAIL:PASSWORD")]
    add_user: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailserver=info,mailserver_smtp=info,mailserver_imap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if !args.ephemeral {
        anyhow::bail!(
            "no persistent repository backend is implemented in this build; pass --ephemeral to run against the in-memory one"
        );
    }
    let config = load_config(&args.config)?;

    let repository: Arc<dyn Repository> = {
        let fake = FakeRepository::new(config.local_domains.clone());
        for entry in &args.add_user {
            let Some((email, password)) = entry.split_once(':') else {
                anyhow::bail!("--add-user expects EMAIL:PASSWORD, got {entry:?}");
            };
            fake.add_user(email, password);
        }
        Arc::new(fake)
    };
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let tls_acceptor = build_tls_acceptor(&config)?;

    info!(hostname = %config.hostname, "starting mailserver");
    let config = Arc::new(config);

    let mut tasks = Vec::new();
    for listener in config.smtp_listeners.clone() {
        let server = mailserver_smtp::SmtpServer {
            config: Arc::clone(&config),
            repository: Arc::clone(&repository),
            events: Arc::clone(&events),
        };
        let acceptor = tls_acceptor.clone();
        tasks.push(tokio::spawn(accept_loop(listener, acceptor, move |tcp, peer, listener, acceptor| {
            let server = server.clone();
            async move { mailserver_smtp::run(tcp, peer, &listener, acceptor.as_ref(), &server).await.map_err(Into::into) }
        })));
    }
    for listener in config.imap_listeners.clone() {
        let server = mailserver_imap::ImapServer {
            config: Arc::clone(&config),
            repository: Arc::clone(&repository),
            events: Arc::clone(&events),
        };
        let acceptor = tls_acceptor.clone();
        tasks.push(tokio::spawn(accept_loop(listener, acceptor, move |tcp, peer, listener, acceptor| {
            let server = server.clone();
            async move { mailserver_imap::run(tcp, peer, &listener, acceptor.as_ref(), &server).await.map_err(Into::into) }
        })));
    }

    for task in tasks {
        task.await.context("listener task panicked")?;
    }
    Ok(())
}

/// Reads and parses the configuration file, falling back to the standard
/// port-set defaults (seeded with the bare hostname) if the file is
/// missing, so a first run against `FakeRepository` needs no setup file.
fn load_config(path: &std::path::Path) -> Result<ServerConfig> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let file: ConfigFile = toml::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(file.into_server_config())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no configuration file found, using default port set");
            Ok(ServerConfig::builder("localhost").build())
        }
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Builds the shared TLS acceptor from the configured certificate/key pair,
/// if any listener needs one. `Implicit`/`Dual` listeners without a
/// configured pair are still bound (to fail loudly per-connection rather
/// than refuse to start), but `STARTTLS` and implicit TLS won't be usable.
fn build_tls_acceptor(config: &ServerConfig) -> Result<Option<TlsAcceptor>> {
    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            let acceptor = tls::load_acceptor(std::path::Path::new(cert), std::path::Path::new(key))
                .context("loading TLS certificate/key")?;
            Ok(Some(acceptor))
        }
        _ => {
            warn!("no tls_cert_path/tls_key_path configured; STARTTLS and implicit TLS are unavailable");
            Ok(None)
        }
    }
}

/// Binds one listener and hands every accepted connection to `run_conn` on
/// its own task, logging and continuing past per-connection errors so one
/// bad client can't take the listener down.
async fn accept_loop<F, Fut>(listener: ListenerConfig, tls_acceptor: Option<TlsAcceptor>, run_conn: F)
where
    F: Fn(tokio::net::TcpStream, std::net::SocketAddr, ListenerConfig, Option<TlsAcceptor>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let addr = format!("{}:{}", listener.bind_address, listener.port);
    let tcp_listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(%addr, %err, "failed to bind listener");
            return;
        }
    };
    info!(%addr, security = ?listener.security, "listening");

    loop {
        let (tcp, peer) = match tcp_listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(%addr, %err, "accept failed");
                continue;
            }
        };
        let listener = listener.clone();
        let tls_acceptor = tls_acceptor.clone();
        let run_conn = run_conn.clone();
        tokio::spawn(async move {
            if let Err(err) = run_conn(tcp, peer, listener, tls_acceptor).await {
                warn!(%peer, %err, "connection ended with error");
            }
        });
    }
}

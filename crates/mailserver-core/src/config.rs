//! Server configuration.

use std::net::IpAddr;
use std::time::Duration;

/// The TLS posture of one listening port (spec.md §6 "Three port
/// personalities").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// No encryption; `STARTTLS` is offered where the protocol supports it.
    Plain,
    /// TLS handshake required before any protocol byte (port 465/993).
    Implicit,
    /// First-byte ClientHello sniff: TLS if the connection opens with a TLS
    /// record header, plain otherwise (SMTP submission port 587).
    Dual,
}

/// One TCP listener: an address, port, and the security posture to apply
/// to connections accepted on it.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address, e.g. `"0.0.0.0"`.
    pub bind_address: String,
    /// Bind port.
    pub port: u16,
    /// Security posture for this port.
    pub security: Security,
}

/// Top-level server configuration, deserializable from a TOML file and
/// overridable from CLI flags in the binary crate.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hostname advertised in SMTP banners/EHLO and IMAP greetings.
    pub hostname: String,
    /// Domains for which mail is delivered locally rather than relayed.
    pub local_domains: Vec<String>,
    /// SMTP listeners.
    pub smtp_listeners: Vec<ListenerConfig>,
    /// IMAP listeners.
    pub imap_listeners: Vec<ListenerConfig>,
    /// Path to a PEM certificate chain, required if any listener uses
    /// `Implicit` or `Dual` security, or if `STARTTLS` should be offered.
    pub tls_cert_path: Option<String>,
    /// Path to the PEM private key matching `tls_cert_path`.
    pub tls_key_path: Option<String>,
    /// Maximum command line length, in bytes, before `LineTooLong`.
    pub max_line_len: usize,
    /// Maximum accepted message size, in bytes (SMTP `SIZE` extension,
    /// APPEND literal size).
    pub max_message_size: u64,
    /// Delay before the SMTP dual-mode port emits its banner if neither
    /// `TLS_ESTABLISHED` nor `PLAINTEXT_DETECTED` has fired yet.
    pub dual_port_banner_delay: Duration,
    /// Idle timeout after which an SMTP connection is closed. Defaults to 5
    /// minutes (spec.md §5).
    pub io_timeout: Duration,
    /// Idle timeout after which an IMAP connection is closed. Defaults to 30
    /// minutes (spec.md §5) — IMAP clients routinely sit idle between polls,
    /// so it carries a much longer grace period than SMTP's transactional
    /// `io_timeout`.
    pub imap_io_timeout: Duration,
    /// Remote IPs allowed to relay mail to non-local domains without
    /// authenticating (spec.md §4.4/§6).
    pub trusted_relay_ips: Vec<IpAddr>,
    /// `AUTH` failures allowed before the SMTP session is dropped with
    /// `421` (spec.md §4.4 "AUTH failure tarpit").
    pub max_auth_failures: u32,
    /// Delay applied to a negative `AUTH` response, to slow credential
    /// stuffing.
    pub auth_tarpit_delay: Duration,
    /// Maximum `RCPT TO` recipients accepted per mail transaction.
    pub max_recipients: usize,
}

impl ServerConfig {
    /// Creates a configuration builder seeded with the given hostname.
    #[must_use]
    pub fn builder(hostname: impl Into<String>) -> ServerConfigBuilder {
        ServerConfigBuilder::new(hostname)
    }
}

/// Builder for [`ServerConfig`], mirroring the defaults spec.md §6 assigns
/// to each standard port.
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    hostname: String,
    local_domains: Vec<String>,
    smtp_listeners: Vec<ListenerConfig>,
    imap_listeners: Vec<ListenerConfig>,
    tls_cert_path: Option<String>,
    tls_key_path: Option<String>,
    max_line_len: usize,
    max_message_size: u64,
    dual_port_banner_delay: Duration,
    io_timeout: Duration,
    imap_io_timeout: Duration,
    trusted_relay_ips: Vec<IpAddr>,
    max_auth_failures: u32,
    auth_tarpit_delay: Duration,
    max_recipients: usize,
}

impl ServerConfigBuilder {
    /// Creates a new builder. Defaults to the standard port set (SMTP
    /// 25/587/465, IMAP 143/993) bound on all interfaces.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            local_domains: Vec::new(),
            smtp_listeners: vec![
                ListenerConfig { bind_address: "0.0.0.0".to_string(), port: 25, security: Security::Plain },
                ListenerConfig { bind_address: "0.0.0.0".to_string(), port: 587, security: Security::Dual },
                ListenerConfig { bind_address: "0.0.0.0".to_string(), port: 465, security: Security::Implicit },
            ],
            imap_listeners: vec![
                ListenerConfig { bind_address: "0.0.0.0".to_string(), port: 143, security: Security::Plain },
                ListenerConfig { bind_address: "0.0.0.0".to_string(), port: 993, security: Security::Implicit },
            ],
            tls_cert_path: None,
            tls_key_path: None,
            max_line_len: 8192,
            max_message_size: 25 * 1024 * 1024,
            dual_port_banner_delay: Duration::from_millis(300),
            io_timeout: Duration::from_secs(300),
            imap_io_timeout: Duration::from_secs(1800),
            trusted_relay_ips: Vec::new(),
            max_auth_failures: 5,
            auth_tarpit_delay: Duration::from_secs(3),
            max_recipients: 100,
        }
    }

    /// Sets the domains delivered locally.
    #[must_use]
    pub fn local_domains(mut self, domains: Vec<String>) -> Self {
        self.local_domains = domains;
        self
    }

    /// Replaces the SMTP listener set.
    #[must_use]
    pub fn smtp_listeners(mut self, listeners: Vec<ListenerConfig>) -> Self {
        self.smtp_listeners = listeners;
        self
    }

    /// Replaces the IMAP listener set.
    #[must_use]
    pub fn imap_listeners(mut self, listeners: Vec<ListenerConfig>) -> Self {
        self.imap_listeners = listeners;
        self
    }

    /// Sets the TLS certificate and key paths.
    #[must_use]
    pub fn tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.tls_cert_path = Some(cert_path.into());
        self.tls_key_path = Some(key_path.into());
        self
    }

    /// Sets the maximum command line length.
    #[must_use]
    pub const fn max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }

    /// Sets the maximum accepted message size.
    #[must_use]
    pub const fn max_message_size(mut self, size: u64) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the dual-port banner delay.
    #[must_use]
    pub const fn dual_port_banner_delay(mut self, delay: Duration) -> Self {
        self.dual_port_banner_delay = delay;
        self
    }

    /// Sets the SMTP idle I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the IMAP idle I/O timeout.
    #[must_use]
    pub const fn imap_io_timeout(mut self, timeout: Duration) -> Self {
        self.imap_io_timeout = timeout;
        self
    }

    /// Sets the remote IPs allowed to relay without authenticating.
    #[must_use]
    pub fn trusted_relay_ips(mut self, ips: Vec<IpAddr>) -> Self {
        self.trusted_relay_ips = ips;
        self
    }

    /// Sets the `AUTH` failure count that drops the session with `421`.
    #[must_use]
    pub const fn max_auth_failures(mut self, n: u32) -> Self {
        self.max_auth_failures = n;
        self
    }

    /// Sets the delay applied to a negative `AUTH` response.
    #[must_use]
    pub const fn auth_tarpit_delay(mut self, delay: Duration) -> Self {
        self.auth_tarpit_delay = delay;
        self
    }

    /// Sets the maximum `RCPT TO` recipients per transaction.
    #[must_use]
    pub const fn max_recipients(mut self, n: usize) -> Self {
        self.max_recipients = n;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            hostname: self.hostname,
            local_domains: self.local_domains,
            smtp_listeners: self.smtp_listeners,
            imap_listeners: self.imap_listeners,
            tls_cert_path: self.tls_cert_path,
            tls_key_path: self.tls_key_path,
            max_line_len: self.max_line_len,
            max_message_size: self.max_message_size,
            dual_port_banner_delay: self.dual_port_banner_delay,
            io_timeout: self.io_timeout,
            imap_io_timeout: self.imap_io_timeout,
            trusted_relay_ips: self.trusted_relay_ips,
            max_auth_failures: self.max_auth_failures,
            auth_tarpit_delay: self.auth_tarpit_delay,
            max_recipients: self.max_recipients,
        }
    }
}

/// The file shape for [`ServerConfig`] loaded via `toml` (see the binary's
/// `main.rs`). Kept separate from [`ServerConfig`] so the on-disk schema
/// can evolve independently of the in-memory type and its `Duration`
/// fields.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConfigFile {
    /// See [`ServerConfig::hostname`].
    pub hostname: String,
    /// See [`ServerConfig::local_domains`].
    #[serde(default)]
    pub local_domains: Vec<String>,
    /// See [`ServerConfig::tls_cert_path`].
    pub tls_cert_path: Option<String>,
    /// See [`ServerConfig::tls_key_path`].
    pub tls_key_path: Option<String>,
    /// See [`ServerConfig::max_line_len`]. Defaults to 8192 if absent.
    pub max_line_len: Option<usize>,
    /// See [`ServerConfig::max_message_size`]. Defaults to 25 MiB if absent.
    pub max_message_size: Option<u64>,
    /// See [`ServerConfig::trusted_relay_ips`].
    #[serde(default)]
    pub trusted_relay_ips: Vec<IpAddr>,
    /// See [`ServerConfig::max_auth_failures`]. Defaults to 5 if absent.
    pub max_auth_failures: Option<u32>,
    /// See [`ServerConfig::auth_tarpit_delay`], in milliseconds. Defaults to
    /// 3000 if absent.
    pub auth_tarpit_delay_ms: Option<u64>,
    /// See [`ServerConfig::max_recipients`]. Defaults to 100 if absent.
    pub max_recipients: Option<usize>,
    /// See [`ServerConfig::imap_io_timeout`], in seconds. Defaults to 1800
    /// (30 minutes) if absent.
    pub imap_io_timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Applies the loaded file on top of the standard port-set defaults.
    #[must_use]
    pub fn into_server_config(self) -> ServerConfig {
        let mut builder = ServerConfig::builder(self.hostname).local_domains(self.local_domains);
        if let (Some(cert), Some(key)) = (self.tls_cert_path.clone(), self.tls_key_path.clone()) {
            builder = builder.tls(cert, key);
        }
        if let Some(len) = self.max_line_len {
            builder = builder.max_line_len(len);
        }
        if let Some(size) = self.max_message_size {
            builder = builder.max_message_size(size);
        }
        if !self.trusted_relay_ips.is_empty() {
            builder = builder.trusted_relay_ips(self.trusted_relay_ips);
        }
        if let Some(n) = self.max_auth_failures {
            builder = builder.max_auth_failures(n);
        }
        if let Some(ms) = self.auth_tarpit_delay_ms {
            builder = builder.auth_tarpit_delay(Duration::from_millis(ms));
        }
        if let Some(n) = self.max_recipients {
            builder = builder.max_recipients(n);
        }
        if let Some(secs) = self.imap_io_timeout_secs {
            builder = builder.imap_io_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }
}

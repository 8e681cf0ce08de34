//! Connection driver (C4): banner timing, command dispatch, and DATA
//! framing, wired against [`Session`] and the `mailserver_core`
//! framer/TLS/repository layer.
//!
//! Grounded on the teacher's `connection/client.rs` read-reply/send-command
//! loop, turned inside out: instead of a client driving a remote server
//! through type-state methods, [`run`] drives one accepted connection
//! through [`Session`] transitions in response to parsed [`Command`]s.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mailserver_core::tls::{self, Sniffed, Stream as CoreStream};
use mailserver_core::{Event, EventSink, Framer, ListenerConfig, Repository, Security, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::capability::ehlo_extensions;
use crate::command::{Command, ParseError};
use crate::error::{Error, Result};
use crate::relay::{self, RelayOutcome};
use crate::state::{AuthLoginStep, Session, Transaction};
use crate::types::{Address, Extension, Reply, ReplyCode};

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// The shared, long-lived handles every connection task needs: server
/// configuration, the persistence/policy repository, and the event sink.
/// Built once in the binary crate and cloned (cheaply, behind `Arc`) into
/// each spawned connection task.
#[derive(Clone)]
pub struct SmtpServer {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Persistence and relay-policy backend.
    pub repository: Arc<dyn Repository>,
    /// Observability event sink.
    pub events: Arc<dyn EventSink>,
}

/// Whether a listener is one of the submission ports, where `AUTH` is
/// gated behind an active TLS session (spec.md §4.4).
const fn is_submission_port(listener: &ListenerConfig) -> bool {
    matches!(listener.port, 587 | 465)
}

/// Drives one accepted connection to completion: banner timing per port
/// personality, then the command loop, until `QUIT` or a fatal I/O error.
pub async fn run(tcp: TcpStream, peer: SocketAddr, listener: &ListenerConfig, tls_acceptor: Option<&TlsAcceptor>, server: &SmtpServer) -> Result<()> {
    let submission_port = is_submission_port(listener);
    match listener.security {
        Security::Plain => {
            let mut framer = Framer::new(CoreStream::Plain(tcp), server.config.max_line_len);
            write_banner(&mut framer, &server.config).await?;
            run_session(framer, peer, server, false, submission_port, None).await
        }
        Security::Implicit => {
            let acceptor = tls_acceptor.ok_or(Error::Closed)?;
            let tls_stream = CoreStream::Plain(tcp).upgrade(acceptor).await?;
            server.events.record(Event::TlsEstablished { peer: peer.ip() });
            let mut framer = Framer::new(tls_stream, server.config.max_line_len);
            write_banner(&mut framer, &server.config).await?;
            run_session(framer, peer, server, true, submission_port, Some(acceptor)).await
        }
        Security::Dual => run_dual(tcp, peer, tls_acceptor, server, submission_port).await,
    }
}

/// The dual-mode submission port: race a first-byte TLS sniff against the
/// configured banner delay. Whichever resolves first decides how the
/// banner is emitted (spec.md §4.4 "schedule a banner emission after
/// 300 ms; cancel it if `TLS_ESTABLISHED` or `PLAINTEXT_DETECTED` fires
/// first").
async fn run_dual(tcp: TcpStream, peer: SocketAddr, tls_acceptor: Option<&TlsAcceptor>, server: &SmtpServer, submission_port: bool) -> Result<()> {
    let acceptor = tls_acceptor.ok_or(Error::Closed)?;
    match timeout(server.config.dual_port_banner_delay, tls::sniff(tcp)).await {
        Ok(Ok(sniffed)) => match sniffed.sniffed {
            Sniffed::Tls => {
                let tls_stream = CoreStream::Plain(sniffed.tcp).upgrade(acceptor).await?;
                server.events.record(Event::TlsEstablished { peer: peer.ip() });
                let mut framer = Framer::new(tls_stream, server.config.max_line_len);
                write_banner(&mut framer, &server.config).await?;
                run_session(framer, peer, server, true, submission_port, Some(acceptor)).await
            }
            Sniffed::Plain => {
                server.events.record(Event::PlaintextDetected { peer: peer.ip() });
                let mut framer = Framer::new(CoreStream::Plain(sniffed.tcp), server.config.max_line_len);
                write_banner(&mut framer, &server.config).await?;
                run_session(framer, peer, server, false, submission_port, Some(acceptor)).await
            }
        },
        Ok(Err(e)) => Err(e.into()),
        Err(_elapsed) => {
            // Neither event fired within the delay: emit the banner blind,
            // assuming plaintext, matching well-behaved clients that wait
            // for the greeting before speaking.
            let mut framer = Framer::new(CoreStream::Plain(tcp), server.config.max_line_len);
            write_banner(&mut framer, &server.config).await?;
            run_session(framer, peer, server, false, submission_port, Some(acceptor)).await
        }
    }
}

async fn write_banner(framer: &mut Framer<CoreStream>, config: &ServerConfig) -> Result<()> {
    let reply = Reply::single(ReplyCode::SERVICE_READY, format!("{} ESMTP", config.hostname));
    framer.write_all(&reply.render()).await?;
    Ok(())
}

/// The command loop: reads one line per iteration and dispatches on
/// [`Session`], until `QUIT`, a protocol-fatal condition, or the
/// connection closing. `Error::Closed` bubbling out of a handler is a
/// normal session end, not a failure, and is converted to `Ok(())` below.
async fn run_session(mut framer: Framer<CoreStream>, peer: SocketAddr, server: &SmtpServer, mut tls_active: bool, submission_port: bool, tls_acceptor: Option<&TlsAcceptor>) -> Result<()> {
    let mut session = Session::default();
    let mut auth_failures: u32 = 0;

    let outcome: Result<()> = loop {
        let line = match framer.read_line().await {
            Ok(line) => line,
            Err(e) => break Err(e.into()),
        };

        session = match session {
            Session::Connected => match handle_pre_greeting(&mut framer, &server.config, tls_active, submission_port, &line).await {
                Ok(s) => s,
                Err(e) => break Err(e),
            },
            Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction } => {
                match handle_greeted(
                    framer,
                    server,
                    peer,
                    tls_active,
                    tls_acceptor,
                    submission_port,
                    &mut auth_failures,
                    client_hostname,
                    extended,
                    authenticated,
                    auth_user,
                    transaction,
                    &line,
                )
                .await
                {
                    Ok((session, new_framer, new_tls_active)) => {
                        framer = new_framer;
                        tls_active = new_tls_active;
                        session
                    }
                    Err(e) => break Err(e),
                }
            }
            Session::Data { client_hostname, extended, authenticated, auth_user, transaction, buffer, oversized } => {
                match handle_data_line(&mut framer, server, transaction, client_hostname, extended, authenticated, auth_user, buffer, oversized, &line).await {
                    Ok(s) => s,
                    Err(e) => break Err(e),
                }
            }
            Session::Authenticating { client_hostname, extended, transaction, login_step, pending_username } => {
                match handle_auth_continuation(&mut framer, server, peer, &mut auth_failures, client_hostname, extended, transaction, login_step, pending_username, &line).await {
                    Ok(s) => s,
                    Err(e) => break Err(e),
                }
            }
        };
    };

    match outcome {
        Err(Error::Closed) => Ok(()),
        other => other,
    }
}

async fn handle_pre_greeting(framer: &mut Framer<CoreStream>, config: &ServerConfig, tls_active: bool, submission_port: bool, line: &str) -> Result<Session> {
    match Command::parse(line) {
        Ok(Command::Helo { hostname }) => {
            framer.write_all(&Reply::single(ReplyCode::OK, format!("{} Hello {hostname}", config.hostname)).render()).await?;
            Ok(Session::Greeted { client_hostname: hostname, extended: false, authenticated: false, auth_user: None, transaction: Transaction::default() })
        }
        Ok(Command::Ehlo { hostname }) => {
            send_ehlo_reply(framer, config, tls_active, submission_port, &hostname).await?;
            Ok(Session::Greeted { client_hostname: hostname, extended: true, authenticated: false, auth_user: None, transaction: Transaction::default() })
        }
        Ok(Command::Quit) => {
            framer.write_all(&Reply::single(ReplyCode::CLOSING, "bye").render()).await?;
            Err(Error::Closed)
        }
        Ok(Command::Noop) => {
            framer.write_all(&Reply::single(ReplyCode::OK, "OK").render()).await?;
            Ok(Session::Connected)
        }
        Ok(_) => {
            framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "send EHLO/HELO first").render()).await?;
            Ok(Session::Connected)
        }
        Err(err) => {
            framer.write_all(&reply_for_parse_error(&err).render()).await?;
            Ok(Session::Connected)
        }
    }
}

async fn send_ehlo_reply(framer: &mut Framer<CoreStream>, config: &ServerConfig, tls_active: bool, submission_port: bool, client_hostname: &str) -> Result<()> {
    let extensions = ehlo_extensions(tls_active, config.tls_cert_path.is_some(), submission_port, config.max_message_size);
    let mut lines = vec![format!("{} Hello {client_hostname}", config.hostname)];
    lines.extend(extensions.iter().map(Extension::to_line));
    framer.write_all(&Reply::new(ReplyCode::OK, lines).render()).await?;
    Ok(())
}

/// Dispatches one command from the `GREETED`/`MAIL_FROM`/`RCPT_TO` states.
/// Takes `framer` by value since `STARTTLS` must replace the underlying
/// stream; every other branch hands the same framer straight back.
#[allow(clippy::too_many_arguments)]
async fn handle_greeted(
    mut framer: Framer<CoreStream>,
    server: &SmtpServer,
    peer: SocketAddr,
    tls_active: bool,
    tls_acceptor: Option<&TlsAcceptor>,
    submission_port: bool,
    auth_failures: &mut u32,
    client_hostname: String,
    extended: bool,
    authenticated: bool,
    auth_user: Option<String>,
    transaction: Transaction,
    line: &str,
) -> Result<(Session, Framer<CoreStream>, bool)> {
    let config = &server.config;

    macro_rules! stay {
        ($session:expr) => {
            Ok(($session, framer, tls_active))
        };
    }

    match Command::parse(line) {
        Ok(Command::Helo { hostname }) => {
            framer.write_all(&Reply::single(ReplyCode::OK, format!("{} Hello {hostname}", config.hostname)).render()).await?;
            stay!(Session::Greeted { client_hostname: hostname, extended: false, authenticated, auth_user, transaction: Transaction::default() })
        }
        Ok(Command::Ehlo { hostname }) => {
            send_ehlo_reply(&mut framer, config, tls_active, submission_port, &hostname).await?;
            stay!(Session::Greeted { client_hostname: hostname, extended: true, authenticated, auth_user, transaction: Transaction::default() })
        }
        Ok(Command::StartTls) => {
            if tls_active {
                framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "TLS already active").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            }
            let Some(acceptor) = tls_acceptor else {
                framer.write_all(&Reply::single(ReplyCode::NOT_IMPLEMENTED, "STARTTLS not available").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            };
            framer.write_all(&Reply::single(ReplyCode::SERVICE_READY, "go ahead").render()).await?;
            let stream = framer.into_inner();
            let tls_stream = stream.upgrade(acceptor).await?;
            server.events.record(Event::TlsEstablished { peer: peer.ip() });
            let new_framer = Framer::new(tls_stream, config.max_line_len);
            Ok((Session::reset_to_connected(), new_framer, true))
        }
        Ok(Command::AuthPlain { initial_response }) => {
            if transaction.started() {
                framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "AUTH not allowed mid-transaction").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            }
            match initial_response {
                Some(resp) => {
                    let outcome = verify_auth_plain(server, &resp).await?;
                    let session = finish_auth(&mut framer, server, peer, auth_failures, client_hostname, extended, Transaction::default(), outcome).await?;
                    stay!(session)
                }
                None => {
                    framer.write_all(&Reply::single(ReplyCode::AUTH_CONTINUE, String::new()).render()).await?;
                    stay!(Session::Authenticating { client_hostname, extended, transaction, login_step: None, pending_username: None })
                }
            }
        }
        Ok(Command::AuthLogin) => {
            if transaction.started() {
                framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "AUTH not allowed mid-transaction").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            }
            framer.write_all(&Reply::single(ReplyCode::AUTH_CONTINUE, BASE64.encode("Username:")).render()).await?;
            stay!(Session::Authenticating { client_hostname, extended, transaction, login_step: Some(AuthLoginStep::Username), pending_username: None })
        }
        Ok(Command::MailFrom { from, size }) => {
            if transaction.started() {
                framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "MAIL FROM already in progress").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            }
            if let Some(size) = size {
                if size > config.max_message_size {
                    framer.write_all(&Reply::single(ReplyCode::EXCEEDED_STORAGE, "5.3.4 message too large").render()).await?;
                    return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
                }
            }
            framer.write_all(&Reply::single(ReplyCode::OK, "OK").render()).await?;
            stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction: Transaction { sender: Some(from), recipients: Vec::new() } })
        }
        Ok(Command::RcptTo { to }) => {
            let Some(sender) = transaction.sender.clone() else {
                framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "send MAIL FROM first").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            };
            let decision = relay::decide(config, &server.repository, &sender, &to, authenticated, peer.ip(), transaction.recipients.len()).await?;
            match decision {
                RelayOutcome::Accept => {
                    framer.write_all(&Reply::single(ReplyCode::OK, "OK").render()).await?;
                    let mut transaction = transaction;
                    transaction.recipients.push(to);
                    stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction })
                }
                RelayOutcome::Reject(reply) => {
                    server.events.record(Event::RelayRejected { recipient: to.as_str().to_string(), peer: peer.ip() });
                    framer.write_all(&reply.render()).await?;
                    stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction })
                }
            }
        }
        Ok(Command::Data) => {
            if transaction.recipients.is_empty() {
                framer.write_all(&Reply::single(ReplyCode::BAD_SEQUENCE, "send RCPT TO first").render()).await?;
                return stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction });
            }
            framer.write_all(&Reply::single(ReplyCode::START_DATA, "start mail input; end with <CRLF>.<CRLF>").render()).await?;
            stay!(Session::Data { client_hostname, extended, authenticated, auth_user, transaction, buffer: Vec::new(), oversized: false })
        }
        Ok(Command::Rset) => {
            framer.write_all(&Reply::single(ReplyCode::OK, "OK").render()).await?;
            stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction: Transaction::default() })
        }
        Ok(Command::Noop) => {
            framer.write_all(&Reply::single(ReplyCode::OK, "OK").render()).await?;
            stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction })
        }
        Ok(Command::Quit) => {
            framer.write_all(&Reply::single(ReplyCode::CLOSING, "bye").render()).await?;
            Err(Error::Closed)
        }
        Err(err) => {
            framer.write_all(&reply_for_parse_error(&err).render()).await?;
            stay!(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction })
        }
    }
}

/// Accumulates one `DATA` body line, undoing dot-stuffing, until the bare
/// `.` terminator delivers the message.
#[allow(clippy::too_many_arguments)]
async fn handle_data_line(
    framer: &mut Framer<CoreStream>,
    server: &SmtpServer,
    transaction: Transaction,
    client_hostname: String,
    extended: bool,
    authenticated: bool,
    auth_user: Option<String>,
    mut buffer: Vec<u8>,
    mut oversized: bool,
    line: &str,
) -> Result<Session> {
    if line == "." {
        if oversized {
            framer.write_all(&Reply::single(ReplyCode::EXCEEDED_STORAGE, "5.3.4 message too large").render()).await?;
            return Ok(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction: Transaction::default() });
        }
        let message_id = deliver_message(server, &transaction, &buffer).await?;
        framer.write_all(&Reply::single(ReplyCode::OK, format!("OK queued as {message_id}")).render()).await?;
        return Ok(Session::Greeted { client_hostname, extended, authenticated, auth_user, transaction: Transaction::default() });
    }

    let unstuffed = unstuff_dot_line(line);
    if oversized {
        // Already over budget; keep reading lines (to stay in sync with the
        // client) without growing the buffer further.
    } else if u64::try_from(buffer.len() + unstuffed.len() + 2).unwrap_or(u64::MAX) > server.config.max_message_size {
        oversized = true;
    } else {
        buffer.extend_from_slice(unstuffed.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    Ok(Session::Data { client_hostname, extended, authenticated, auth_user, transaction, buffer, oversized })
}

/// Undoes DATA dot-stuffing on one line: a leading `..` becomes `.`, a lone
/// leading `.` with more following it is left alone, everything else passes
/// through unchanged. The bare `.` terminator line is handled by the caller
/// before this is reached.
fn unstuff_dot_line(line: &str) -> &str {
    line.strip_prefix('.').unwrap_or(line)
}

async fn deliver_message(server: &SmtpServer, transaction: &Transaction, body: &[u8]) -> Result<String> {
    let sender = transaction.sender.as_ref().map(Address::as_str).unwrap_or_default().to_string();
    let subject = mailserver_mime::Message::parse(body).ok().and_then(|m| m.subject().map(str::to_string));
    let message_id = generate_message_id(&server.config.hostname);
    let blob_path = server.repository.put(body.to_vec()).await?;

    let message = mailserver_core::Message {
        message_id: message_id.clone(),
        subject,
        sender,
        send_date: chrono::Utc::now(),
        primary_recipient: transaction.recipients.first().map(|r| r.as_str().to_string()),
        blob_path,
    };
    server.repository.insert_message(message).await?;
    server
        .repository
        .add_recipients(transaction.recipients.iter().map(|r| mailserver_core::Recipient { message_id: message_id.clone(), email: r.as_str().to_string() }).collect())
        .await?;

    for recipient in &transaction.recipients {
        let domain = recipient.domain();
        let is_local = server.config.local_domains.iter().any(|d| d.eq_ignore_ascii_case(domain));
        if !is_local {
            continue; // external delivery/MX relay is out of scope
        }
        let mailbox = match server.repository.find_mailbox(recipient.as_str(), "INBOX").await? {
            Some(mailbox) => mailbox,
            None => server.repository.create_mailbox(recipient.as_str(), "INBOX").await?,
        };
        let uid = server.repository.next_uid(mailbox.mailbox_id).await?;
        let size = u64::try_from(body.len()).unwrap_or(u64::MAX);
        server.repository.append_entry(mailbox.mailbox_id, &message_id, uid, mailserver_core::EntryFlags::default(), chrono::Utc::now(), size).await?;
    }

    server.events.record(Event::MessageAccepted { message_id: message_id.clone(), recipients: transaction.recipients.len() });
    Ok(message_id)
}

fn generate_message_id(hostname: &str) -> String {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{now:x}.{seq:x}@{hostname}")
}

#[allow(clippy::too_many_arguments)]
async fn handle_auth_continuation(
    framer: &mut Framer<CoreStream>,
    server: &SmtpServer,
    peer: SocketAddr,
    auth_failures: &mut u32,
    client_hostname: String,
    extended: bool,
    transaction: Transaction,
    login_step: Option<AuthLoginStep>,
    pending_username: Option<String>,
    line: &str,
) -> Result<Session> {
    if line == "*" {
        framer.write_all(&Reply::single(ReplyCode::PARAMETER_ERROR, "authentication cancelled").render()).await?;
        return Ok(Session::Greeted { client_hostname, extended, authenticated: false, auth_user: None, transaction });
    }

    match login_step {
        None => {
            let outcome = verify_auth_plain(server, line).await?;
            finish_auth(framer, server, peer, auth_failures, client_hostname, extended, transaction, outcome).await
        }
        Some(AuthLoginStep::Username) => {
            let username = decode_base64_lossy(line);
            framer.write_all(&Reply::single(ReplyCode::AUTH_CONTINUE, BASE64.encode("Password:")).render()).await?;
            Ok(Session::Authenticating { client_hostname, extended, transaction, login_step: Some(AuthLoginStep::Password), pending_username: Some(username) })
        }
        Some(AuthLoginStep::Password) => {
            let password = decode_base64_lossy(line);
            let username = pending_username.unwrap_or_default();
            let outcome = verify_credentials(server, &username, &password).await?;
            finish_auth(framer, server, peer, auth_failures, client_hostname, extended, transaction, outcome).await
        }
    }
}

/// Outcome of verifying one set of credentials, independent of which `AUTH`
/// mechanism produced them.
enum AuthOutcome {
    Success(String),
    Failure,
}

async fn verify_auth_plain(server: &SmtpServer, encoded: &str) -> Result<AuthOutcome> {
    let Ok(decoded) = BASE64.decode(encoded) else {
        return Ok(AuthOutcome::Failure);
    };
    // SASL PLAIN: authzid \0 authcid \0 password; only the last two
    // NUL-separated fields matter here.
    let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
    if parts.len() < 2 {
        return Ok(AuthOutcome::Failure);
    }
    let username = String::from_utf8_lossy(parts[parts.len() - 2]).into_owned();
    let password = String::from_utf8_lossy(parts[parts.len() - 1]).into_owned();
    verify_credentials(server, &username, &password).await
}

async fn verify_credentials(server: &SmtpServer, username: &str, password: &str) -> Result<AuthOutcome> {
    if server.repository.verify_password(username, password).await? {
        Ok(AuthOutcome::Success(username.to_string()))
    } else {
        Ok(AuthOutcome::Failure)
    }
}

fn decode_base64_lossy(line: &str) -> String {
    BASE64.decode(line).map(|bytes| String::from_utf8_lossy(&bytes).into_owned()).unwrap_or_default()
}

/// Finalizes an `AUTH` attempt: on success, marks the session authenticated;
/// on failure, applies the tarpit delay and, past the configured failure
/// threshold, terminates the connection with `421` (spec.md §4.4 "AUTH
/// failure tarpit").
#[allow(clippy::too_many_arguments)]
async fn finish_auth(
    framer: &mut Framer<CoreStream>,
    server: &SmtpServer,
    peer: SocketAddr,
    auth_failures: &mut u32,
    client_hostname: String,
    extended: bool,
    transaction: Transaction,
    outcome: AuthOutcome,
) -> Result<Session> {
    match outcome {
        AuthOutcome::Success(email) => {
            server.events.record(Event::AuthSucceeded { email: email.clone(), peer: peer.ip() });
            framer.write_all(&Reply::single(ReplyCode::OK, "authentication successful").render()).await?;
            Ok(Session::Greeted { client_hostname, extended, authenticated: true, auth_user: Some(email), transaction })
        }
        AuthOutcome::Failure => {
            server.events.record(Event::AuthFailed { email: String::new(), peer: peer.ip() });
            *auth_failures += 1;
            tokio::time::sleep(server.config.auth_tarpit_delay).await;
            if *auth_failures >= server.config.max_auth_failures {
                framer.write_all(&Reply::single(ReplyCode::SERVICE_UNAVAILABLE, "too many authentication failures").render()).await?;
                return Err(Error::Closed);
            }
            framer.write_all(&Reply::single(ReplyCode::AUTH_FAILED, "authentication failed").render()).await?;
            Ok(Session::Greeted { client_hostname, extended, authenticated: false, auth_user: None, transaction })
        }
    }
}

fn reply_for_parse_error(err: &ParseError) -> Reply {
    match err {
        ParseError::UnknownCommand(cmd) => Reply::single(ReplyCode::SYNTAX_ERROR, format!("unrecognized command: {cmd}")),
        ParseError::Syntax(msg) => Reply::single(ReplyCode::PARAMETER_ERROR, msg.clone()),
    }
}

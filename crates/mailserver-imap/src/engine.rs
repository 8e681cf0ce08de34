//! Connection driver (C4): greeting, idle-timeout command loop, and
//! dispatch, wired against [`Session`] and the `mailserver_core`
//! framer/TLS/repository layer.
//!
//! Grounded on `mailserver-smtp/src/engine.rs`'s connection-driver shape:
//! one `run`/`run_session` pair per listener personality, a per-state
//! dispatch function that takes the framer by value only where `STARTTLS`
//! needs to replace the underlying stream, and the same
//! `Err(Error::Closed) => Ok(())` convention for a clean session end.
//! IMAP has no analogue of SMTP's dual-mode submission port sniff, so
//! `run` only branches on `Plain`/`Dual` (treated identically — plaintext
//! until `STARTTLS`) versus `Implicit`.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use mailserver_core::model::Mailbox as CoreMailbox;
use mailserver_core::repository::Repository;
use mailserver_core::tls::Stream as CoreStream;
use mailserver_core::{Event, EventSink, Framer, ListenerConfig, Security, ServerConfig};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::append;
use crate::capability;
use crate::command::{self, Command, ParseError, ParseOutcome, ParsedCommand};
use crate::copy_move;
use crate::error::{Error, Result};
use crate::expunge;
use crate::fetch;
use crate::idle;
use crate::response::Response;
use crate::search;
use crate::session_cache::SessionCache;
use crate::state::{AuthStep, Session};
use crate::store;
use crate::types::{Flag, ResponseCode, SeqNum, SequenceSet, Status, Tag, Uid, UidSet, UidValidity};

/// The shared, long-lived handles every connection task needs. Built once
/// in the binary crate and cloned (cheaply, behind `Arc`) into each
/// spawned connection task.
#[derive(Clone)]
pub struct ImapServer {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Persistence and relay-policy backend.
    pub repository: Arc<dyn Repository>,
    /// Observability event sink.
    pub events: Arc<dyn EventSink>,
}

/// Drives one accepted connection to completion: TLS posture per port
/// personality, the greeting, then the command loop, until `LOGOUT`, a
/// fatal I/O error, or the idle timeout.
pub async fn run(tcp: TcpStream, peer: SocketAddr, listener: &ListenerConfig, tls_acceptor: Option<&TlsAcceptor>, server: &ImapServer) -> Result<()> {
    let tls_available = tls_acceptor.is_some();
    match listener.security {
        Security::Implicit => {
            let acceptor = tls_acceptor.ok_or(Error::Closed)?;
            let tls_stream = CoreStream::Plain(tcp).upgrade(acceptor).await?;
            server.events.record(Event::TlsEstablished { peer: peer.ip() });
            let mut framer = Framer::new(tls_stream, server.config.max_line_len);
            write_greeting(&mut framer, &server.config).await?;
            run_session(framer, peer, server, true, tls_available, Some(acceptor)).await
        }
        // No dual-mode submission-port analogue here: both plain postures
        // start in the clear and rely on STARTTLS.
        Security::Plain | Security::Dual => {
            let mut framer = Framer::new(CoreStream::Plain(tcp), server.config.max_line_len);
            write_greeting(&mut framer, &server.config).await?;
            run_session(framer, peer, server, false, tls_available, tls_acceptor).await
        }
    }
}

async fn write_greeting(framer: &mut Framer<CoreStream>, config: &ServerConfig) -> Result<()> {
    let greeting = Response::Untagged { status: Status::Ok, code: None, text: format!("{} IMAP4rev1 ready", config.hostname) };
    framer.write_all(&greeting.render()).await?;
    Ok(())
}

/// The command loop: reads one line per iteration (subject to the IMAP
/// idle timeout, much longer than SMTP's, since clients routinely sit
/// between polls) and dispatches through [`handle_line`] until `LOGOUT`,
/// a protocol-fatal condition, or autologout. `Error::Closed` bubbling
/// out is a normal session end, not a failure.
async fn run_session(mut framer: Framer<CoreStream>, peer: SocketAddr, server: &ImapServer, mut tls_active: bool, tls_available: bool, tls_acceptor: Option<&TlsAcceptor>) -> Result<()> {
    let mut session = Session::default();

    let outcome: Result<()> = loop {
        let line = match timeout(server.config.imap_io_timeout, framer.read_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => break Err(e.into()),
            Err(_elapsed) => {
                let bye = Response::Untagged { status: Status::Bye, code: None, text: "Autologout".to_string() };
                let _ = framer.write_all(&bye.render()).await;
                break Err(Error::Closed);
            }
        };

        session = match handle_line(framer, server, peer, tls_active, tls_acceptor, tls_available, session, &line).await {
            Ok((s, new_framer, new_tls_active)) => {
                framer = new_framer;
                tls_active = new_tls_active;
                s
            }
            Err(e) => break Err(e),
        };
    };

    match outcome {
        Err(Error::Closed) => Ok(()),
        other => other,
    }
}

/// Handles one line from the client, regardless of session state. Takes
/// `framer` by value since `STARTTLS` must replace the underlying stream;
/// every other path hands the same framer straight back.
async fn handle_line(
    mut framer: Framer<CoreStream>,
    server: &ImapServer,
    peer: SocketAddr,
    tls_active: bool,
    tls_acceptor: Option<&TlsAcceptor>,
    tls_available: bool,
    session: Session,
    line: &str,
) -> Result<(Session, Framer<CoreStream>, bool)> {
    if let Session::Authenticating { tag, step, pending_username } = session {
        let updated = handle_auth_continuation(&mut framer, server, peer, tag, step, pending_username, line).await?;
        return Ok((updated, framer, tls_active));
    }

    match command::ParseOutcome::parse(line) {
        Ok(ParseOutcome::AppendLiteral { tag, mailbox, flags, date, size, non_sync }) => {
            let updated = handle_append_literal(&mut framer, server, session, tag, mailbox, flags, date, size, non_sync).await?;
            Ok((updated, framer, tls_active))
        }
        Ok(ParseOutcome::Command(ParsedCommand { tag, uid: _, command: Command::StartTls })) => {
            if tls_active {
                framer.write_all(&Response::bad(tag, "TLS already active").render()).await?;
                return Ok((session, framer, tls_active));
            }
            let Some(acceptor) = tls_acceptor else {
                framer.write_all(&Response::no(tag, "STARTTLS not available").render()).await?;
                return Ok((session, framer, tls_active));
            };
            framer.write_all(&Response::ok(tag, "begin TLS negotiation now").render()).await?;
            let stream = framer.into_inner();
            let tls_stream = stream.upgrade(acceptor).await?;
            server.events.record(Event::TlsEstablished { peer: peer.ip() });
            let new_framer = Framer::new(tls_stream, server.config.max_line_len);
            Ok((session, new_framer, true))
        }
        Ok(ParseOutcome::Command(ParsedCommand { tag, uid, command })) => {
            let updated = dispatch(&mut framer, server, peer, tls_active, tls_available, session, tag, uid, command).await?;
            Ok((updated, framer, tls_active))
        }
        Err(err) => {
            framer.write_all(&Response::bad(Tag::new("*"), reply_for_parse_error(&err)).render()).await?;
            Ok((session, framer, tls_active))
        }
    }
}

/// Dispatches one parsed command: commands legal in every session state
/// first, then delegation to the per-state handler.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    framer: &mut Framer<CoreStream>,
    server: &ImapServer,
    peer: SocketAddr,
    tls_active: bool,
    tls_available: bool,
    session: Session,
    tag: Tag,
    uid: bool,
    command: Command,
) -> Result<Session> {
    match &command {
        Command::Capability => {
            let caps = capability::capabilities(tls_active, tls_available);
            framer.write_all(&Response::ok_with_code(tag, ResponseCode::Capability(caps), "CAPABILITY completed").render()).await?;
            return Ok(session);
        }
        Command::Noop => {
            framer.write_all(&Response::ok(tag, "NOOP completed").render()).await?;
            return Ok(session);
        }
        Command::Logout => {
            framer.write_all(&Response::Untagged { status: Status::Bye, code: None, text: "logging out".to_string() }.render()).await?;
            framer.write_all(&Response::ok(tag, "LOGOUT completed").render()).await?;
            return Err(Error::Closed);
        }
        Command::Id => {
            framer.write_all(&Response::Data("ID NIL".to_string()).render()).await?;
            framer.write_all(&Response::ok(tag, "ID completed").render()).await?;
            return Ok(session);
        }
        Command::Namespace => {
            framer.write_all(&Response::Data("NAMESPACE ((\"\" \".\")) NIL NIL".to_string()).render()).await?;
            framer.write_all(&Response::ok(tag, "NAMESPACE completed").render()).await?;
            return Ok(session);
        }
        Command::Enable(_) => {
            framer.write_all(&Response::ok(tag, "ENABLE completed").render()).await?;
            return Ok(session);
        }
        _ => {}
    }

    match session {
        Session::NotAuthenticated => handle_not_authenticated(framer, server, peer, tag, command).await,
        Session::Authenticating { .. } => unreachable!("Authenticating continuations are intercepted before dispatch"),
        Session::Authenticated { user } => handle_authenticated(framer, server, tag, user, command).await,
        Session::Selected { user, mailbox, read_only, cache } => handle_selected(framer, server, tag, uid, user, mailbox, read_only, cache, command).await,
    }
}

async fn handle_not_authenticated(framer: &mut Framer<CoreStream>, server: &ImapServer, peer: SocketAddr, tag: Tag, command: Command) -> Result<Session> {
    match command {
        Command::Login { username, password } => {
            let outcome = verify_credentials(server, &username, &password).await?;
            finish_auth(framer, server, peer, tag, outcome).await
        }
        Command::AuthenticatePlain { initial: Some(resp) } => {
            let outcome = verify_auth_plain(server, &resp).await?;
            finish_auth(framer, server, peer, tag, outcome).await
        }
        Command::AuthenticatePlain { initial: None } => {
            framer.write_all(&Response::Continuation(String::new()).render()).await?;
            Ok(Session::Authenticating { tag, step: AuthStep::Plain, pending_username: None })
        }
        Command::AuthenticateLogin => {
            framer.write_all(&Response::Continuation(BASE64.encode("Username:")).render()).await?;
            Ok(Session::Authenticating { tag, step: AuthStep::LoginUsername, pending_username: None })
        }
        _ => {
            framer.write_all(&Response::bad(tag, "not permitted before authentication").render()).await?;
            Ok(Session::NotAuthenticated)
        }
    }
}

async fn handle_auth_continuation(
    framer: &mut Framer<CoreStream>,
    server: &ImapServer,
    peer: SocketAddr,
    tag: Tag,
    step: AuthStep,
    pending_username: Option<String>,
    line: &str,
) -> Result<Session> {
    if line == "*" {
        framer.write_all(&Response::bad(tag, "authentication cancelled").render()).await?;
        return Ok(Session::NotAuthenticated);
    }

    match step {
        AuthStep::Plain => {
            let outcome = verify_auth_plain(server, line).await?;
            finish_auth(framer, server, peer, tag, outcome).await
        }
        AuthStep::LoginUsername => {
            let username = decode_base64_lossy(line);
            framer.write_all(&Response::Continuation(BASE64.encode("Password:")).render()).await?;
            Ok(Session::Authenticating { tag, step: AuthStep::LoginPassword, pending_username: Some(username) })
        }
        AuthStep::LoginPassword => {
            let password = decode_base64_lossy(line);
            let username = pending_username.unwrap_or_default();
            let outcome = verify_credentials(server, &username, &password).await?;
            finish_auth(framer, server, peer, tag, outcome).await
        }
    }
}

/// Outcome of verifying one set of credentials, independent of which
/// mechanism produced them.
enum AuthOutcome {
    Success(String),
    Failure,
}

async fn verify_auth_plain(server: &ImapServer, encoded: &str) -> Result<AuthOutcome> {
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

async fn verify_credentials(server: &ImapServer, username: &str, password: &str) -> Result<AuthOutcome> {
    if server.repository.verify_password(username, password).await? {
        Ok(AuthOutcome::Success(username.to_string()))
    } else {
        Ok(AuthOutcome::Failure)
    }
}

fn decode_base64_lossy(line: &str) -> String {
    BASE64.decode(line).map(|bytes| String::from_utf8_lossy(&bytes).into_owned()).unwrap_or_default()
}

/// No tarpit/failure-ceiling here, unlike SMTP's `AUTH` (spec.md §4.4 is
/// scoped to SMTP); a failed IMAP login just reports `NO` and stays in
/// `NOT_AUTHENTICATED` for the client to retry.
async fn finish_auth(framer: &mut Framer<CoreStream>, server: &ImapServer, peer: SocketAddr, tag: Tag, outcome: AuthOutcome) -> Result<Session> {
    match outcome {
        AuthOutcome::Success(email) => {
            server.events.record(Event::AuthSucceeded { email: email.clone(), peer: peer.ip() });
            framer.write_all(&Response::ok(tag, "AUTHENTICATE completed").render()).await?;
            Ok(Session::Authenticated { user: email })
        }
        AuthOutcome::Failure => {
            server.events.record(Event::AuthFailed { email: String::new(), peer: peer.ip() });
            framer.write_all(&Response::no(tag, "authentication failed").render()).await?;
            Ok(Session::NotAuthenticated)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_append_literal(
    framer: &mut Framer<CoreStream>,
    server: &ImapServer,
    session: Session,
    tag: Tag,
    mailbox_name: String,
    flags: Vec<Flag>,
    date: Option<String>,
    size: usize,
    non_sync: bool,
) -> Result<Session> {
    let Some(user) = session.user().map(str::to_string) else {
        framer.write_all(&Response::no(tag, "APPEND requires authentication").render()).await?;
        return Ok(session);
    };
    if !non_sync {
        framer.write_all(&Response::Continuation("Ready for literal data".to_string()).render()).await?;
    }
    let raw = framer.read_literal(size).await?;

    let path = CoreMailbox::canonicalize_path(&mailbox_name);
    let Some(mailbox) = server.repository.find_mailbox(&user, &path).await? else {
        framer.write_all(&Response::no_with_code(tag, ResponseCode::TryCreate, "mailbox doesn't exist").render()).await?;
        return Ok(session);
    };
    let received = date.as_deref().and_then(parse_imap_datetime).unwrap_or_else(Utc::now);
    let outcome = append::append(server.repository.as_ref(), &server.config.hostname, &mailbox, raw, &flags, received).await?;
    let code = append::append_uid_code(outcome);
    framer.write_all(&Response::ok_with_code(tag, code, "APPEND completed").render()).await?;
    Ok(session)
}

async fn handle_authenticated(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, user: String, command: Command) -> Result<Session> {
    match command {
        Command::Select(name) => select_mailbox(framer, server, tag, user, name, false).await,
        Command::Examine(name) => select_mailbox(framer, server, tag, user, name, true).await,
        Command::Create(name) => {
            server.repository.create_mailbox(&user, &CoreMailbox::canonicalize_path(&name)).await?;
            framer.write_all(&Response::ok(tag, "CREATE completed").render()).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Delete(name) => {
            server.repository.delete_mailbox(&user, &CoreMailbox::canonicalize_path(&name)).await?;
            framer.write_all(&Response::ok(tag, "DELETE completed").render()).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Rename { from, to } => {
            server.repository.rename_mailbox(&user, &CoreMailbox::canonicalize_path(&from), &CoreMailbox::canonicalize_path(&to)).await?;
            framer.write_all(&Response::ok(tag, "RENAME completed").render()).await?;
            Ok(Session::Authenticated { user })
        }
        // No distinct subscription store: every mailbox that exists is
        // implicitly subscribed, so SUBSCRIBE/UNSUBSCRIBE just acknowledge.
        Command::Subscribe(_) => {
            framer.write_all(&Response::ok(tag, "SUBSCRIBE completed").render()).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Unsubscribe(_) => {
            framer.write_all(&Response::ok(tag, "UNSUBSCRIBE completed").render()).await?;
            Ok(Session::Authenticated { user })
        }
        Command::List { reference, pattern, return_special_use } => {
            handle_list(framer, server, tag, &user, &reference, &pattern, return_special_use).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Lsub { reference, pattern } => {
            handle_lsub(framer, server, tag, &user, &reference, &pattern).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Status { mailbox, items } => {
            handle_status(framer, server, tag, &user, &mailbox, &items).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Idle => {
            handle_idle(framer, &server.config, tag).await?;
            Ok(Session::Authenticated { user })
        }
        _ => {
            framer.write_all(&Response::no(tag, "No mailbox selected").render()).await?;
            Ok(Session::Authenticated { user })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_selected(
    framer: &mut Framer<CoreStream>,
    server: &ImapServer,
    tag: Tag,
    uid: bool,
    user: String,
    mailbox: CoreMailbox,
    read_only: bool,
    cache: SessionCache,
    command: Command,
) -> Result<Session> {
    match command {
        Command::Fetch { set, items_raw } => {
            handle_fetch(framer, server, tag, uid, read_only, &cache, &set, &items_raw).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Store { set, raw } => {
            handle_store(framer, server, tag, uid, read_only, &cache, &set, &raw).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Search { raw } => {
            handle_search(framer, server, tag, uid, &cache, &raw).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Copy { set, mailbox: dest } => {
            handle_copy(framer, server, tag, uid, &mailbox, &cache, &set, dest).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Move { set, mailbox: dest } => {
            if read_only {
                framer.write_all(&Response::no(tag, "mailbox is read-only").render()).await?;
                return Ok(Session::Selected { user, mailbox, read_only, cache });
            }
            handle_move(framer, server, tag, uid, &mailbox, &cache, &set, dest).await?;
            let entries = server.repository.list_entries(mailbox.mailbox_id).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache: SessionCache::new(entries) })
        }
        Command::Expunge { set } => {
            if read_only {
                framer.write_all(&Response::no(tag, "mailbox is read-only").render()).await?;
                return Ok(Session::Selected { user, mailbox, read_only, cache });
            }
            let uids = match &set {
                Some(raw) => match UidSet::parse(raw) {
                    Some(uid_set) => {
                        let uids: Vec<u32> = cache.resolve_uid_set(&uid_set).into_iter().map(|(_, entry)| entry.uid).collect();
                        Some(uids)
                    }
                    None => {
                        framer.write_all(&Response::bad(tag, "invalid UID set").render()).await?;
                        return Ok(Session::Selected { user, mailbox, read_only, cache });
                    }
                },
                None => None,
            };
            handle_expunge(framer, server, tag, &mailbox, &cache, uids.as_deref()).await?;
            let entries = server.repository.list_entries(mailbox.mailbox_id).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache: SessionCache::new(entries) })
        }
        Command::Close => {
            handle_close(framer, server, tag, &mailbox, read_only).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Unselect => {
            framer.write_all(&Response::ok(tag, "UNSELECT completed").render()).await?;
            Ok(Session::Authenticated { user })
        }
        Command::Idle => {
            handle_idle(framer, &server.config, tag).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Select(name) => select_mailbox(framer, server, tag, user, name, false).await,
        Command::Examine(name) => select_mailbox(framer, server, tag, user, name, true).await,
        Command::Create(name) => {
            server.repository.create_mailbox(&user, &CoreMailbox::canonicalize_path(&name)).await?;
            framer.write_all(&Response::ok(tag, "CREATE completed").render()).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Delete(name) => {
            server.repository.delete_mailbox(&user, &CoreMailbox::canonicalize_path(&name)).await?;
            framer.write_all(&Response::ok(tag, "DELETE completed").render()).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Rename { from, to } => {
            server.repository.rename_mailbox(&user, &CoreMailbox::canonicalize_path(&from), &CoreMailbox::canonicalize_path(&to)).await?;
            framer.write_all(&Response::ok(tag, "RENAME completed").render()).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Subscribe(_) => {
            framer.write_all(&Response::ok(tag, "SUBSCRIBE completed").render()).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Unsubscribe(_) => {
            framer.write_all(&Response::ok(tag, "UNSUBSCRIBE completed").render()).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::List { reference, pattern, return_special_use } => {
            handle_list(framer, server, tag, &user, &reference, &pattern, return_special_use).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Lsub { reference, pattern } => {
            handle_lsub(framer, server, tag, &user, &reference, &pattern).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        Command::Status { mailbox: name, items } => {
            handle_status(framer, server, tag, &user, &name, &items).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
        _ => {
            framer.write_all(&Response::bad(tag, "not supported in this state").render()).await?;
            Ok(Session::Selected { user, mailbox, read_only, cache })
        }
    }
}

/// `SELECT`/`EXAMINE`: on success, replaces the current selection (if
/// any). A missing mailbox reports plain `NO` — `[TRYCREATE]` is reserved
/// for `APPEND`/`COPY`/`MOVE` targeting a missing destination, not for
/// opening one directly.
async fn select_mailbox(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, user: String, name: String, read_only: bool) -> Result<Session> {
    let path = CoreMailbox::canonicalize_path(&name);
    let Some(mailbox) = server.repository.find_mailbox(&user, &path).await? else {
        framer.write_all(&Response::no(tag, "mailbox doesn't exist").render()).await?;
        return Ok(Session::Authenticated { user });
    };

    let entries = server.repository.list_entries(mailbox.mailbox_id).await?;
    let cache = SessionCache::new(entries);

    let permanent = vec![Flag::Answered, Flag::Flagged, Flag::Deleted, Flag::Seen, Flag::Draft];
    let flag_list = permanent.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
    framer.write_all(&Response::Data(format!("FLAGS ({flag_list})")).render()).await?;
    framer
        .write_all(&Response::Untagged { status: Status::Ok, code: Some(ResponseCode::PermanentFlags(permanent.clone())), text: "Limited".to_string() }.render())
        .await?;

    framer.write_all(&Response::Data(format!("{} EXISTS", cache.len())).render()).await?;
    framer.write_all(&Response::Data("0 RECENT".to_string()).render()).await?;

    if let Some(first_unseen) = cache.entries().iter().position(|e| !e.flags.seen).and_then(|idx| SeqNum::new(idx as u32 + 1)) {
        framer
            .write_all(&Response::Untagged { status: Status::Ok, code: Some(ResponseCode::Unseen(first_unseen)), text: "first unseen".to_string() }.render())
            .await?;
    }

    let uid_validity = UidValidity::new(mailbox.uid_validity).expect("uid_validity is non-zero by construction");
    framer
        .write_all(&Response::Untagged { status: Status::Ok, code: Some(ResponseCode::UidValidity(uid_validity)), text: "UIDs valid".to_string() }.render())
        .await?;
    let uid_next = Uid::new(mailbox.next_uid).expect("next_uid is non-zero by construction");
    framer.write_all(&Response::Untagged { status: Status::Ok, code: Some(ResponseCode::UidNext(uid_next)), text: "Predicted next UID".to_string() }.render()).await?;

    let (code, verb) = if read_only { (ResponseCode::ReadOnly, "EXAMINE") } else { (ResponseCode::ReadWrite, "SELECT") };
    framer.write_all(&Response::ok_with_code(tag, code, format!("{verb} completed")).render()).await?;
    Ok(Session::Selected { user, mailbox, read_only, cache })
}

/// Resolves a `FETCH`/`STORE`/`COPY`/`MOVE` set argument against the
/// session cache, in UID or sequence-number mode depending on whether the
/// command was `UID`-prefixed. `None` means the set failed to parse.
fn resolve_set(cache: &SessionCache, uid_mode: bool, set: &str) -> Option<Vec<(SeqNum, mailserver_core::model::MailEntry)>> {
    if uid_mode {
        let uid_set = UidSet::parse(set)?;
        Some(cache.resolve_uid_set(&uid_set).into_iter().map(|(seq, entry)| (seq, entry.clone())).collect())
    } else {
        let seq_set = SequenceSet::parse(set)?;
        Some(cache.resolve_sequence_set(&seq_set).into_iter().map(|(seq, entry)| (seq, entry.clone())).collect())
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_fetch(
    framer: &mut Framer<CoreStream>,
    server: &ImapServer,
    tag: Tag,
    uid: bool,
    read_only: bool,
    cache: &SessionCache,
    set: &str,
    items_raw: &str,
) -> Result<()> {
    let attrs = match fetch::parse_items(items_raw) {
        Ok(attrs) => attrs,
        Err(e) => {
            framer.write_all(&Response::bad(tag, e.0).render()).await?;
            return Ok(());
        }
    };
    let Some(resolved) = resolve_set(cache, uid, set) else {
        framer.write_all(&Response::bad(tag, "invalid sequence set").render()).await?;
        return Ok(());
    };

    for (seq, entry) in &resolved {
        let message = if fetch::needs_message(&attrs) { load_message(server, &entry.message_id).await? } else { None };

        let mut effective = entry.clone();
        if fetch::sets_seen(&attrs) && !read_only && !effective.flags.seen {
            effective.flags.seen = true;
            server.repository.set_flags(effective.id, effective.flags).await?;
        }

        let line = fetch::render(*seq, &effective, &attrs, message.as_ref()).map_err(|e| Error::Parse { position: 0, message: e.0 })?;
        framer.write_all(&Response::RawData(line).render()).await?;
    }
    framer.write_all(&Response::ok(tag, "FETCH completed").render()).await?;
    Ok(())
}

async fn load_message(server: &ImapServer, message_id: &str) -> Result<Option<mailserver_mime::Message>> {
    let Some(message) = server.repository.find_message(message_id).await? else {
        return Ok(None);
    };
    let raw = server.repository.get(&message.blob_path).await?;
    Ok(mailserver_mime::Message::parse(&raw).ok())
}

#[allow(clippy::too_many_arguments)]
async fn handle_store(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, uid: bool, read_only: bool, cache: &SessionCache, set: &str, raw: &str) -> Result<()> {
    if read_only {
        framer.write_all(&Response::no(tag, "mailbox is read-only").render()).await?;
        return Ok(());
    }
    let cmd = match store::parse(raw) {
        Ok(cmd) => cmd,
        Err(e) => {
            framer.write_all(&Response::bad(tag, e.0).render()).await?;
            return Ok(());
        }
    };
    let Some(resolved) = resolve_set(cache, uid, set) else {
        framer.write_all(&Response::bad(tag, "invalid sequence set").render()).await?;
        return Ok(());
    };

    for (seq, entry) in &resolved {
        let updated_flags = store::apply(cmd.action, &cmd.flags, entry.flags);
        server.repository.set_flags(entry.id, updated_flags).await?;
        if !cmd.silent {
            let mut updated = entry.clone();
            updated.flags = updated_flags;
            let line = fetch::render(*seq, &updated, &[fetch::FetchAttribute::Flags], None).map_err(|e| Error::Parse { position: 0, message: e.0 })?;
            framer.write_all(&Response::RawData(line).render()).await?;
        }
    }
    framer.write_all(&Response::ok(tag, "STORE completed").render()).await?;
    Ok(())
}

async fn handle_search(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, uid: bool, cache: &SessionCache, raw: &str) -> Result<()> {
    let query = match search::parse(raw) {
        Ok(query) => query,
        Err(e) => {
            framer.write_all(&Response::bad(tag, e.0).render()).await?;
            return Ok(());
        }
    };

    let candidates: Vec<(SeqNum, &mailserver_core::model::MailEntry)> = match &query.scope {
        Some(scope) => cache.resolve_sequence_set(scope),
        None => cache.entries().iter().enumerate().filter_map(|(i, entry)| SeqNum::new(i as u32 + 1).map(|seq| (seq, entry))).collect(),
    };

    let mut matched = Vec::new();
    for (seq, entry) in candidates {
        let (subject, from) = if search::needs_message(&query) {
            match server.repository.find_message(&entry.message_id).await? {
                Some(message) => (message.subject, message.sender),
                None => (None, String::new()),
            }
        } else {
            (None, String::new())
        };
        if search::matches(entry, &query, subject.as_deref(), &from) {
            matched.push(if uid { entry.uid } else { seq.get() });
        }
    }

    let body = matched.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
    let text = if body.is_empty() { "SEARCH".to_string() } else { format!("SEARCH {body}") };
    framer.write_all(&Response::Data(text).render()).await?;
    framer.write_all(&Response::ok(tag, "SEARCH completed").render()).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_copy(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, uid: bool, mailbox: &CoreMailbox, cache: &SessionCache, set: &str, dest_name: String) -> Result<()> {
    let Some(resolved) = resolve_set(cache, uid, set) else {
        framer.write_all(&Response::bad(tag, "invalid sequence set").render()).await?;
        return Ok(());
    };
    let dest_path = CoreMailbox::canonicalize_path(&dest_name);
    let Some(dest) = server.repository.find_mailbox(&mailbox.owner_email, &dest_path).await? else {
        framer.write_all(&Response::no_with_code(tag, ResponseCode::TryCreate, "destination mailbox doesn't exist").render()).await?;
        return Ok(());
    };

    let mut source_uids = Vec::new();
    let mut dest_uids = Vec::new();
    for (_, entry) in &resolved {
        let new_uid = server.repository.next_uid(dest.mailbox_id).await?;
        server.repository.append_entry(dest.mailbox_id, &entry.message_id, new_uid, entry.flags, entry.receive_date, entry.size).await?;
        source_uids.push(Uid::new(entry.uid).expect("uid is non-zero by construction"));
        dest_uids.push(Uid::new(new_uid).expect("uid is non-zero by construction"));
    }
    let uidvalidity = UidValidity::new(dest.uid_validity).expect("uid_validity is non-zero by construction");
    let code = copy_move::copy_uid_code(uidvalidity, source_uids, dest_uids);
    framer.write_all(&Response::ok_with_code(tag, code, "COPY completed").render()).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_move(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, uid: bool, mailbox: &CoreMailbox, cache: &SessionCache, set: &str, dest_name: String) -> Result<()> {
    let Some(resolved) = resolve_set(cache, uid, set) else {
        framer.write_all(&Response::bad(tag, "invalid sequence set").render()).await?;
        return Ok(());
    };
    let dest_path = CoreMailbox::canonicalize_path(&dest_name);
    let Some(dest) = server.repository.find_mailbox(&mailbox.owner_email, &dest_path).await? else {
        framer.write_all(&Response::no_with_code(tag, ResponseCode::TryCreate, "destination mailbox doesn't exist").render()).await?;
        return Ok(());
    };

    let mut source_uids = Vec::new();
    let mut dest_uids = Vec::new();
    let mut removed_seqs = Vec::new();
    for (seq, entry) in &resolved {
        let new_uid = server.repository.next_uid(dest.mailbox_id).await?;
        server.repository.append_entry(dest.mailbox_id, &entry.message_id, new_uid, entry.flags, entry.receive_date, entry.size).await?;
        server.repository.remove_entry(entry.id).await?;
        source_uids.push(Uid::new(entry.uid).expect("uid is non-zero by construction"));
        dest_uids.push(Uid::new(new_uid).expect("uid is non-zero by construction"));
        removed_seqs.push(*seq);
    }
    for line in expunge::render(&expunge::compute_expunge_sequence(&removed_seqs)) {
        framer.write_all(&Response::Data(line).render()).await?;
    }
    let uidvalidity = UidValidity::new(dest.uid_validity).expect("uid_validity is non-zero by construction");
    let code = copy_move::copy_uid_code(uidvalidity, source_uids, dest_uids);
    framer.write_all(&Response::ok_with_code(tag, code, "MOVE completed").render()).await?;
    Ok(())
}

/// Plain `EXPUNGE`. `uids`, when given, restricts removal to that UID set
/// (`UID EXPUNGE <set>`, RFC 4315) — entries marked `\Deleted` outside the
/// set are left in place.
async fn handle_expunge(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, mailbox: &CoreMailbox, cache: &SessionCache, uids: Option<&[u32]>) -> Result<()> {
    let pre_seqs: Vec<SeqNum> = cache
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.flags.deleted && uids.is_none_or(|u| u.contains(&e.uid)))
        .filter_map(|(i, _)| SeqNum::new(i as u32 + 1))
        .collect();
    match uids {
        Some(uids) => {
            server.repository.expunge_uids(mailbox.mailbox_id, uids).await?;
        }
        None => {
            server.repository.expunge(mailbox.mailbox_id).await?;
        }
    }
    for line in expunge::render(&expunge::compute_expunge_sequence(&pre_seqs)) {
        framer.write_all(&Response::Data(line).render()).await?;
    }
    framer.write_all(&Response::ok(tag, "EXPUNGE completed").render()).await?;
    Ok(())
}

/// `CLOSE` silently expunges (no untagged `* n EXPUNGE` lines), unlike
/// `EXPUNGE`/`MOVE` — RFC 3501 §6.4.2.
async fn handle_close(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, mailbox: &CoreMailbox, read_only: bool) -> Result<()> {
    if !read_only {
        server.repository.expunge(mailbox.mailbox_id).await?;
    }
    framer.write_all(&Response::ok(tag, "CLOSE completed").render()).await?;
    Ok(())
}

async fn handle_idle(framer: &mut Framer<CoreStream>, config: &ServerConfig, tag: Tag) -> Result<()> {
    framer.write_all(&idle::continuation().render()).await?;
    loop {
        let line = match timeout(config.imap_io_timeout, framer.read_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => return Err(Error::Closed),
        };
        if idle::is_done(&line) {
            break;
        }
    }
    framer.write_all(&idle::terminated(tag).render()).await?;
    Ok(())
}

async fn handle_list(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, user: &str, reference: &str, pattern: &str, return_special_use: bool) -> Result<()> {
    if pattern.is_empty() {
        framer.write_all(&Response::Data("LIST (\\Noselect) \".\" \"\"".to_string()).render()).await?;
        framer.write_all(&Response::ok(tag, "LIST completed").render()).await?;
        return Ok(());
    }
    let combined = format!("{reference}{pattern}");
    let mailboxes = server.repository.list_mailboxes(user).await?;
    for mailbox in mailboxes {
        if !glob_match(&combined, &mailbox.path) {
            continue;
        }
        let mut attrs = vec!["\\HasNoChildren".to_string()];
        if return_special_use {
            if let Some(special) = special_use_attr(&mailbox.path) {
                attrs.push(special.to_string());
            }
        }
        framer.write_all(&Response::Data(format!("LIST ({}) \".\" {}", attrs.join(" "), quote_mailbox(&mailbox.path))).render()).await?;
    }
    framer.write_all(&Response::ok(tag, "LIST completed").render()).await?;
    Ok(())
}

/// Mirrors [`handle_list`] without `RETURN (SPECIAL-USE)` handling; there's
/// no separate subscription store, so `LSUB` just re-lists what exists.
async fn handle_lsub(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, user: &str, reference: &str, pattern: &str) -> Result<()> {
    let combined = format!("{reference}{pattern}");
    let mailboxes = server.repository.list_mailboxes(user).await?;
    for mailbox in mailboxes {
        if glob_match(&combined, &mailbox.path) {
            framer.write_all(&Response::Data(format!("LSUB (\\HasNoChildren) \".\" {}", quote_mailbox(&mailbox.path))).render()).await?;
        }
    }
    framer.write_all(&Response::ok(tag, "LSUB completed").render()).await?;
    Ok(())
}

async fn handle_status(framer: &mut Framer<CoreStream>, server: &ImapServer, tag: Tag, user: &str, mailbox_name: &str, items: &[String]) -> Result<()> {
    let path = CoreMailbox::canonicalize_path(mailbox_name);
    let Some(mailbox) = server.repository.find_mailbox(user, &path).await? else {
        framer.write_all(&Response::no(tag, "mailbox doesn't exist").render()).await?;
        return Ok(());
    };
    let entries = server.repository.list_entries(mailbox.mailbox_id).await?;
    let unseen = entries.iter().filter(|e| !e.flags.seen).count();

    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let value = match item.as_str() {
            "MESSAGES" => entries.len().to_string(),
            "RECENT" => "0".to_string(),
            "UIDNEXT" => mailbox.next_uid.to_string(),
            "UIDVALIDITY" => mailbox.uid_validity.to_string(),
            "UNSEEN" => unseen.to_string(),
            other => {
                framer.write_all(&Response::bad(tag, format!("unsupported STATUS item: {other}")).render()).await?;
                return Ok(());
            }
        };
        parts.push(format!("{item} {value}"));
    }
    framer.write_all(&Response::Data(format!("STATUS {} ({})", quote_mailbox(&mailbox.path), parts.join(" "))).render()).await?;
    framer.write_all(&Response::ok(tag, "STATUS completed").render()).await?;
    Ok(())
}

/// `LIST`/`LSUB` pattern matching (RFC 3501 §6.3.8): `*` matches any run
/// of characters including the hierarchy delimiter, `%` matches any run
/// excluding it. Case-insensitive, like the rest of this system's mailbox
/// naming.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match p.first() {
            None => n.is_empty(),
            Some(b'*') => (0..=n.len()).any(|i| inner(&p[1..], &n[i..])),
            Some(b'%') => {
                for i in 0..=n.len() {
                    if n[..i].contains(&b'.') {
                        break;
                    }
                    if inner(&p[1..], &n[i..]) {
                        return true;
                    }
                }
                false
            }
            Some(pc) => match n.first() {
                Some(nc) if pc.eq_ignore_ascii_case(nc) => inner(&p[1..], &n[1..]),
                _ => false,
            },
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

fn special_use_attr(path: &str) -> Option<&'static str> {
    match path.to_uppercase().as_str() {
        "SENT" => Some("\\Sent"),
        "DRAFTS" => Some("\\Drafts"),
        "TRASH" => Some("\\Trash"),
        "JUNK" => Some("\\Junk"),
        _ => None,
    }
}

fn quote_mailbox(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parses an `APPEND` date-time argument, e.g. `"05-Mar-2024 10:00:00
/// +0000"` (the same format [`fetch::render`] produces for `INTERNALDATE`).
fn parse_imap_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%d-%b-%Y %H:%M:%S %z").ok().map(|dt| dt.with_timezone(&Utc))
}

fn reply_for_parse_error(err: &ParseError) -> String {
    match err {
        ParseError::UnknownCommand(cmd) => format!("unrecognized command: {cmd}"),
        ParseError::Syntax(msg) => msg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_across_delimiters() {
        assert!(glob_match("INBOX.*", "INBOX.Archive.2024"));
        assert!(glob_match("*", "INBOX"));
    }

    #[test]
    fn glob_percent_stops_at_delimiter() {
        assert!(glob_match("INBOX.%", "INBOX.Archive"));
        assert!(!glob_match("INBOX.%", "INBOX.Archive.2024"));
    }

    #[test]
    fn glob_is_case_insensitive() {
        assert!(glob_match("inbox", "INBOX"));
    }

    #[test]
    fn special_use_maps_known_names() {
        assert_eq!(special_use_attr("Sent"), Some("\\Sent"));
        assert_eq!(special_use_attr("Archive"), None);
    }

    #[test]
    fn parses_internaldate_format() {
        let dt = parse_imap_datetime("05-Mar-2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-03-05");
    }

    #[test]
    fn reply_for_unknown_command() {
        let err = ParseError::UnknownCommand("BOGUS".to_string());
        assert_eq!(reply_for_parse_error(&err), "unrecognized command: BOGUS");
    }
}

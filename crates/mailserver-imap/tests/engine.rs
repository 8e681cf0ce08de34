//! Engine-level integration tests: drive [`mailserver_imap::run`] over a
//! real loopback TCP connection against `mailserver_core::fake::FakeRepository`,
//! covering the session/FETCH/APPEND/MOVE/STARTTLS scenarios from spec.md's
//! testable-properties list (S3-S6).

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use mailserver_core::fake::{FakeRepository, RecordingEventSink};
use mailserver_core::model::{EntryFlags, Message};
use mailserver_core::{EventSink, ListenerConfig, Repository, Security, ServerConfig};
use mailserver_imap::ImapServer;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read line");
    line.trim_end_matches(['\r', '\n']).to_string()
}

fn test_config() -> Arc<ServerConfig> {
    Arc::new(ServerConfig::builder("mail.example.com").local_domains(vec!["example.com".to_string()]).build())
}

/// Binds a loopback listener and spawns one `mailserver_imap::run` connection
/// against it, returning the address to connect to.
async fn bind_server(repository: Arc<dyn Repository>, tls_acceptor: Option<TlsAcceptor>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = ImapServer { config: test_config(), repository, events: Arc::new(RecordingEventSink::new()) };
    let listener_config = ListenerConfig { bind_address: "127.0.0.1".to_string(), port: 143, security: Security::Plain };

    tokio::spawn(async move {
        let (tcp, peer) = listener.accept().await.expect("accept");
        let _ = mailserver_imap::run(tcp, peer, &listener_config, tls_acceptor.as_ref(), &server).await;
    });

    addr
}

/// Seeds `count` entries into `owner`'s INBOX with ascending UIDs, returning
/// the mailbox row.
async fn seed_inbox_entries(repo: &FakeRepository, owner: &str, count: u32) -> mailserver_core::model::Mailbox {
    let mailbox = repo.find_mailbox(owner, "INBOX").await.unwrap().expect("inbox exists");
    for i in 0..count {
        let message_id = format!("seed-{i}@example.com");
        repo.insert_message(Message {
            message_id: message_id.clone(),
            subject: Some(format!("seed {i}")),
            sender: "alice@example.com".to_string(),
            send_date: Utc::now(),
            primary_recipient: None,
            blob_path: repo.put(b"Subject: seed\r\n\r\nbody\r\n".to_vec()).await.unwrap(),
        })
        .await
        .unwrap();
        let uid = repo.next_uid(mailbox.mailbox_id).await.unwrap();
        repo.append_entry(mailbox.mailbox_id, &message_id, uid, EntryFlags::default(), Utc::now(), 24).await.unwrap();
    }
    repo.find_mailbox(owner, "INBOX").await.unwrap().expect("inbox exists")
}

/// S3 — IMAP SELECT / FETCH FLAGS: after LOGIN, SELECT INBOX reports
/// EXISTS/UIDVALIDITY/UIDNEXT and a tagged `OK [READ-WRITE]`; FETCH of an
/// existing message's FLAGS and UID returns both attributes.
#[tokio::test]
async fn s3_select_and_fetch_flags() {
    let repo = Arc::new(FakeRepository::new(vec!["example.com".to_string()]));
    repo.add_user("bob@example.com", "pw");
    seed_inbox_entries(&repo, "bob@example.com", 1).await;

    let addr = bind_server(repo as Arc<dyn Repository>, None).await;
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut writer) = tcp.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_line(&mut reader).await.starts_with("* OK"));

    writer.write_all(b"a1 LOGIN bob@example.com pw\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("a1 OK"));

    writer.write_all(b"a2 SELECT INBOX\r\n").await.unwrap();
    let flags_line = read_line(&mut reader).await;
    assert!(flags_line.starts_with("* FLAGS ("), "unexpected line: {flags_line}");
    assert!(read_line(&mut reader).await.contains("PERMANENTFLAGS"));
    assert_eq!(read_line(&mut reader).await, "* 1 EXISTS");
    assert_eq!(read_line(&mut reader).await, "* 0 RECENT");
    let next = read_line(&mut reader).await;
    assert!(next.contains("UIDVALIDITY") || next.contains("UNSEEN"), "unexpected line: {next}");
    let tagged = loop {
        let line = read_line(&mut reader).await;
        if line.starts_with("a2 ") {
            break line;
        }
    };
    assert!(tagged.starts_with("a2 OK [READ-WRITE]"), "unexpected SELECT completion: {tagged}");

    writer.write_all(b"a3 FETCH 1 (FLAGS UID)\r\n").await.unwrap();
    let fetch_line = read_line(&mut reader).await;
    assert!(fetch_line.starts_with("* 1 FETCH ("), "unexpected FETCH line: {fetch_line}");
    assert!(fetch_line.contains("FLAGS ()"), "expected empty flag list, got: {fetch_line}");
    assert!(fetch_line.contains("UID 1"), "expected UID 1, got: {fetch_line}");
    assert!(read_line(&mut reader).await.starts_with("a3 OK"));
}

/// S4 — APPEND with LITERAL+: a non-synchronizing literal is accepted
/// without a continuation prompt, assigns a fresh UID, and STATUS reports
/// the new message count.
#[tokio::test]
async fn s4_append_with_literal_plus() {
    let repo = Arc::new(FakeRepository::new(vec!["example.com".to_string()]));
    repo.add_user("bob@example.com", "pw");

    let addr = bind_server(repo.clone() as Arc<dyn Repository>, None).await;
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut writer) = tcp.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_line(&mut reader).await.starts_with("* OK"));
    writer.write_all(b"a1 LOGIN bob@example.com pw\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("a1 OK"));

    let body = b"Subject: x\r\n\r\n";
    let command = format!("a2 APPEND Drafts (\\Seen) {{{}+}}\r\n", body.len());
    writer.write_all(command.as_bytes()).await.unwrap();
    writer.write_all(body).await.unwrap();
    let completion = read_line(&mut reader).await;
    assert!(completion.starts_with("a2 OK"), "unexpected APPEND reply: {completion}");
    assert!(completion.contains("APPENDUID"), "expected APPENDUID code, got: {completion}");

    writer.write_all(b"a3 STATUS Drafts (MESSAGES)\r\n").await.unwrap();
    let status_line = read_line(&mut reader).await;
    assert!(status_line.starts_with("* STATUS"), "unexpected STATUS line: {status_line}");
    assert!(status_line.contains("MESSAGES 1"), "expected one message, got: {status_line}");
    assert!(read_line(&mut reader).await.starts_with("a3 OK"));

    let drafts = repo.find_mailbox("bob@example.com", "Drafts").await.unwrap().expect("drafts exists");
    let entries = repo.list_entries(drafts.mailbox_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].flags.seen, "APPEND must set \\Seen unconditionally");
}

/// S5 — UID MOVE: moving one of three entries out of a mailbox reports the
/// expunged sequence number and leaves the other two behind.
#[tokio::test]
async fn s5_uid_move() {
    let repo = Arc::new(FakeRepository::new(vec!["example.com".to_string()]));
    repo.add_user("bob@example.com", "pw");
    let inbox = seed_inbox_entries(&repo, "bob@example.com", 3).await;

    let addr = bind_server(repo.clone() as Arc<dyn Repository>, None).await;
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut writer) = tcp.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_line(&mut reader).await.starts_with("* OK"));
    writer.write_all(b"a1 LOGIN bob@example.com pw\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("a1 OK"));

    writer.write_all(b"a2 SELECT INBOX\r\n").await.unwrap();
    loop {
        if read_line(&mut reader).await.starts_with("a2 ") {
            break;
        }
    }

    writer.write_all(b"a3 UID MOVE 2 Trash\r\n").await.unwrap();
    let expunge_line = read_line(&mut reader).await;
    assert_eq!(expunge_line, "* 2 EXPUNGE");
    let completion = read_line(&mut reader).await;
    assert!(completion.starts_with("a3 OK"), "unexpected MOVE reply: {completion}");
    assert!(completion.contains("COPYUID"), "expected COPYUID code, got: {completion}");

    let remaining = repo.list_entries(inbox.mailbox_id).await.unwrap();
    let remaining_uids: Vec<u32> = remaining.iter().map(|e| e.uid).collect();
    assert_eq!(remaining_uids, vec![1, 3]);

    let trash = repo.find_mailbox("bob@example.com", "Trash").await.unwrap().expect("trash exists");
    let trash_entries = repo.list_entries(trash.mailbox_id).await.unwrap();
    assert_eq!(trash_entries.len(), 1);
}

/// S6 — STARTTLS reset: after negotiating TLS, the session's prior
/// `SELECT` no longer applies — a command that requires a selected mailbox
/// is rejected until the client re-`SELECT`s over the encrypted channel.
#[tokio::test]
async fn s6_starttls_requires_reselect() {
    // Harmless if another test in this binary already installed one.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let repo = Arc::new(FakeRepository::new(vec!["example.com".to_string()]));
    repo.add_user("bob@example.com", "pw");
    seed_inbox_entries(&repo, "bob@example.com", 1).await;

    let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()]).expect("generate self-signed cert");
    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let server_tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der.into())
        .expect("build server TLS config");
    let acceptor = TlsAcceptor::from(Arc::new(server_tls_config));

    let addr = bind_server(repo as Arc<dyn Repository>, Some(acceptor)).await;
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut writer) = tcp.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_line(&mut reader).await.starts_with("* OK"));
    writer.write_all(b"a1 LOGIN bob@example.com pw\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("a1 OK"));

    writer.write_all(b"a2 SELECT INBOX\r\n").await.unwrap();
    loop {
        if read_line(&mut reader).await.starts_with("a2 ") {
            break;
        }
    }

    writer.write_all(b"a3 STARTTLS\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("a3 OK"));

    let mut roots = rustls::RootCertStore::empty();
    roots.add(CertificateDer::from(cert_der.to_vec())).expect("trust self-signed cert");
    let client_config = rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
    let server_name = ServerName::try_from("127.0.0.1").expect("server name").to_owned();

    let tcp = writer.reunite(reader.into_inner()).expect("reunite stream");
    let tls = connector.connect(server_name, tcp).await.expect("TLS handshake");
    let (tls_read, mut tls_write) = tokio::io::split(tls);
    let mut tls_reader = BufReader::new(tls_read);

    tls_write.write_all(b"a4 FETCH 1 (FLAGS)\r\n").await.unwrap();
    let line = read_line(&mut tls_reader).await;
    assert!(line.starts_with("a4 NO"), "expected NO without a re-SELECT, got: {line}");
}

//! Engine-level integration tests: drive [`mailserver_smtp::run`] over a
//! real loopback TCP connection against `mailserver_core::fake::FakeRepository`,
//! covering the delivery/relay scenarios from spec.md's testable-properties
//! list (S1, S2).

use std::sync::Arc;

use mailserver_core::fake::{FakeRepository, RecordingEventSink};
use mailserver_core::{EventSink, ListenerConfig, Repository, Security, ServerConfig};
use mailserver_smtp::SmtpServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read line");
    line.trim_end_matches(['\r', '\n']).to_string()
}

/// Binds a loopback listener, spawns one `mailserver_smtp::run` connection
/// against it, and returns a connected client split into a line reader and
/// a writer.
async fn connect(repository: Arc<dyn Repository>) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = SmtpServer {
        config: Arc::new(ServerConfig::builder("mail.example.com").local_domains(vec!["example.com".to_string()]).build()),
        repository,
        events: Arc::new(RecordingEventSink::new()),
    };
    let listener_config = ListenerConfig { bind_address: "127.0.0.1".to_string(), port: 25, security: Security::Plain };

    tokio::spawn(async move {
        let (tcp, peer) = listener.accept().await.expect("accept");
        let _ = mailserver_smtp::run(tcp, peer, &listener_config, None, &server).await;
    });

    let tcp = TcpStream::connect(addr).await.expect("connect");
    let (read_half, write_half) = tcp.into_split();
    (BufReader::new(read_half), write_half)
}

/// S1 — intra-domain unauthenticated delivery: an unauthenticated client
/// can relay between two mailboxes on the same local domain, and the
/// recipient's INBOX gains one entry with `\Seen` unset.
#[tokio::test]
async fn s1_intra_domain_unauthenticated_delivery() {
    let repo = Arc::new(FakeRepository::new(vec!["example.com".to_string()]));
    repo.add_user("bob@example.com", "pw");
    let (mut reader, mut writer) = connect(repo.clone() as Arc<dyn Repository>).await;

    assert!(read_line(&mut reader).await.starts_with("220 "));

    writer.write_all(b"EHLO client.example.com\r\n").await.unwrap();
    while read_line(&mut reader).await.starts_with("250-") {}

    writer.write_all(b"MAIL FROM:<alice@example.com>\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("250"));

    writer.write_all(b"RCPT TO:<bob@example.com>\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("250"));

    writer.write_all(b"DATA\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("354"));

    writer.write_all(b"Subject: t\r\n\r\nhi\r\n.\r\n").await.unwrap();
    let line = read_line(&mut reader).await;
    assert!(line.starts_with("250"), "unexpected DATA reply: {line}");
    assert!(line.contains("queued as"), "reply should echo a message id: {line}");

    let inbox = repo.find_mailbox("bob@example.com", "INBOX").await.unwrap().expect("inbox exists");
    let entries = repo.list_entries(inbox.mailbox_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].flags.seen, "newly delivered mail should be unseen");

    writer.write_all(b"QUIT\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("221"));
}

/// S2 — external relay denied: an unauthenticated client from an
/// untrusted IP may not relay mail between two non-local domains.
#[tokio::test]
async fn s2_external_relay_denied() {
    let repo = Arc::new(FakeRepository::new(vec!["example.com".to_string()]));
    let (mut reader, mut writer) = connect(repo as Arc<dyn Repository>).await;

    assert!(read_line(&mut reader).await.starts_with("220 "));
    writer.write_all(b"EHLO client.example.com\r\n").await.unwrap();
    while read_line(&mut reader).await.starts_with("250-") {}

    writer.write_all(b"MAIL FROM:<x@other.org>\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("250"));

    writer.write_all(b"RCPT TO:<y@third.org>\r\n").await.unwrap();
    let line = read_line(&mut reader).await;
    assert!(line.starts_with("550"), "expected relay denial, got: {line}");
    assert!(line.contains("5.7.1"), "expected enhanced status code 5.7.1, got: {line}");
}

//! Relay policy, applied on each `RCPT TO` (spec.md §4.4).
//!
//! Grounded on `mailserver_core::repository::RelayPolicy`/`RelayDecision`,
//! which model a narrower per-recipient local/relay-allowed/relay-denied
//! verdict; this module implements the full decision tree spec.md §4.4
//! specifies (intra-domain bypass, trusted-IP relay, local-mailbox
//! existence, recipient-count cap), calling out to the repository only for
//! the existence check `RelayDecision` alone can't express.

use std::net::IpAddr;
use std::sync::Arc;

use mailserver_core::{Repository, ServerConfig};

use crate::types::{Address, Reply, ReplyCode};

/// Outcome of the relay-policy decision tree for one `RCPT TO` recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Recipient accepted.
    Accept,
    /// Recipient rejected; `reply` already carries the appropriate code and
    /// enhanced status code text.
    Reject(Reply),
}

/// Decides whether `recipient` may be accepted for the transaction started
/// by `sender`, per spec.md §4.4:
///
/// 1. If the sender and recipient share a local domain, permit
///    unconditionally (intra-domain local mail).
/// 2. Otherwise the session must be authenticated or connecting from a
///    trusted relay IP, or the recipient is rejected `550 5.7.1`.
/// 3. If the recipient's domain is local, the mailbox must exist, or the
///    recipient is rejected `550 5.1.1`.
/// 4. `recipients_so_far` beyond [`ServerConfig::max_recipients`] is
///    rejected `452 4.5.3` ahead of the other checks.
pub async fn decide(
    config: &ServerConfig,
    repository: &Arc<dyn Repository>,
    sender: &Address,
    recipient: &Address,
    authenticated: bool,
    peer: IpAddr,
    recipients_so_far: usize,
) -> mailserver_core::Result<RelayOutcome> {
    if recipients_so_far >= config.max_recipients {
        return Ok(RelayOutcome::Reject(Reply::single(
            ReplyCode::INSUFFICIENT_STORAGE,
            "4.5.3 too many recipients",
        )));
    }

    let rcpt_domain = recipient.domain();
    let rcpt_is_local = is_local_domain(config, rcpt_domain);
    let intra_domain = rcpt_is_local && sender.domain().eq_ignore_ascii_case(rcpt_domain);

    if intra_domain {
        return Ok(RelayOutcome::Accept);
    }

    let trusted = config.trusted_relay_ips.contains(&peer);
    if !authenticated && !trusted {
        return Ok(RelayOutcome::Reject(Reply::single(ReplyCode::MAILBOX_UNAVAILABLE, "5.7.1 relaying denied")));
    }

    if rcpt_is_local {
        let exists = repository.find_user(recipient.as_str()).await?.is_some();
        if !exists {
            return Ok(RelayOutcome::Reject(Reply::single(ReplyCode::MAILBOX_UNAVAILABLE, "5.1.1 mailbox unavailable")));
        }
    }

    Ok(RelayOutcome::Accept)
}

fn is_local_domain(config: &ServerConfig, domain: &str) -> bool {
    config.local_domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailserver_core::fake::FakeRepository;

    fn config() -> ServerConfig {
        ServerConfig::builder("mail.example.com").local_domains(vec!["example.com".to_string()]).build()
    }

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn repo_with_local_domain() -> Arc<dyn Repository> {
        Arc::new(FakeRepository::new(vec!["example.com".to_string()]))
    }

    #[tokio::test]
    async fn intra_domain_permitted_unauthenticated() {
        let repo = repo_with_local_domain();
        let outcome = decide(
            &config(),
            &repo,
            &addr("alice@example.com"),
            &addr("bob@example.com"),
            false,
            "203.0.113.1".parse().unwrap(),
            0,
        )
        .await
        .unwrap();
        assert_eq!(outcome, RelayOutcome::Accept);
    }

    #[tokio::test]
    async fn external_relay_denied_when_unauthenticated_and_untrusted() {
        let repo = repo_with_local_domain();
        let outcome = decide(
            &config(),
            &repo,
            &addr("alice@other.org"),
            &addr("bob@third.org"),
            false,
            "203.0.113.1".parse().unwrap(),
            0,
        )
        .await
        .unwrap();
        match outcome {
            RelayOutcome::Reject(reply) => assert_eq!(reply.code, ReplyCode::MAILBOX_UNAVAILABLE),
            RelayOutcome::Accept => panic!("expected reject"),
        }
    }

    #[tokio::test]
    async fn external_relay_allowed_when_authenticated() {
        let repo = repo_with_local_domain();
        let outcome = decide(
            &config(),
            &repo,
            &addr("alice@other.org"),
            &addr("bob@third.org"),
            true,
            "203.0.113.1".parse().unwrap(),
            0,
        )
        .await
        .unwrap();
        assert_eq!(outcome, RelayOutcome::Accept);
    }

    #[tokio::test]
    async fn external_relay_allowed_from_trusted_ip() {
        let config = ServerConfig::builder("mail.example.com")
            .local_domains(vec!["example.com".to_string()])
            .trusted_relay_ips(vec!["198.51.100.7".parse().unwrap()])
            .build();
        let repo = repo_with_local_domain();
        let outcome = decide(
            &config,
            &repo,
            &addr("alice@other.org"),
            &addr("bob@third.org"),
            false,
            "198.51.100.7".parse().unwrap(),
            0,
        )
        .await
        .unwrap();
        assert_eq!(outcome, RelayOutcome::Accept);
    }

    #[tokio::test]
    async fn local_recipient_must_exist_once_relay_is_authorized() {
        let repo = repo_with_local_domain();
        let outcome = decide(
            &config(),
            &repo,
            &addr("alice@other.org"),
            &addr("nobody@example.com"),
            true,
            "203.0.113.1".parse().unwrap(),
            0,
        )
        .await
        .unwrap();
        match outcome {
            RelayOutcome::Reject(reply) => assert_eq!(reply.code, ReplyCode::MAILBOX_UNAVAILABLE),
            RelayOutcome::Accept => panic!("expected reject"),
        }
    }

    #[tokio::test]
    async fn recipient_limit_rejects_before_other_checks() {
        let repo = repo_with_local_domain();
        let config = ServerConfig::builder("mail.example.com").local_domains(vec!["example.com".to_string()]).max_recipients(1).build();
        let outcome = decide(
            &config,
            &repo,
            &addr("alice@example.com"),
            &addr("bob@example.com"),
            false,
            "203.0.113.1".parse().unwrap(),
            1,
        )
        .await
        .unwrap();
        match outcome {
            RelayOutcome::Reject(reply) => assert_eq!(reply.code, ReplyCode::INSUFFICIENT_STORAGE),
            RelayOutcome::Accept => panic!("expected reject"),
        }
    }
}

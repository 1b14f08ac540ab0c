//! Tests for ordered channel failover.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use mailcast::transport::console::ConsoleTransport;
use mailcast::transport::failover::MAX_ATTEMPTS;
use mailcast::transport::{
    FailoverTransport, MailTransport, OutboundEmail, SendReceipt, TransportError,
};

#[derive(Clone, Copy)]
enum Behaviour {
    Accept,
    Unreachable,
    Reject,
}

struct FakeChannel {
    name: &'static str,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeChannel {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for FakeChannel {
    fn channel(&self) -> &str {
        self.name
    }

    async fn send(&self, _email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Accept => Ok(SendReceipt {
                channel: self.name.to_owned(),
                message_id: Some(format!("{}-1", self.name)),
                mock: false,
            }),
            Behaviour::Unreachable => Err(TransportError::Connection("timed out".to_owned())),
            Behaviour::Reject => Err(TransportError::Rejected {
                status: 400,
                body: "invalid sender".to_owned(),
            }),
        }
    }
}

fn email() -> OutboundEmail {
    OutboundEmail {
        to: "alice@example.com".to_owned(),
        subject: "Hi".to_owned(),
        html: "<p>Hi</p>".to_owned(),
        sender_name: None,
        reply_to: None,
    }
}

fn failover(channels: &[&Arc<FakeChannel>]) -> FailoverTransport {
    let channels: Vec<Arc<dyn MailTransport>> = channels
        .iter()
        .map(|c| Arc::clone(*c) as Arc<dyn MailTransport>)
        .collect();
    FailoverTransport::new(channels).expect("transport")
}

#[tokio::test]
async fn primary_success_never_touches_secondary() {
    let primary = FakeChannel::new("primary", Behaviour::Accept);
    let secondary = FakeChannel::new("secondary", Behaviour::Accept);

    let delivery = failover(&[&primary, &secondary])
        .deliver(&email())
        .await
        .expect("delivered");

    assert_eq!(delivery.receipt.channel, "primary");
    assert_eq!(delivery.attempts, 1);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn connection_failure_moves_to_next_channel() {
    let primary = FakeChannel::new("primary", Behaviour::Unreachable);
    let secondary = FakeChannel::new("secondary", Behaviour::Accept);

    let delivery = failover(&[&primary, &secondary])
        .deliver(&email())
        .await
        .expect("delivered");

    assert_eq!(delivery.receipt.channel, "secondary");
    assert_eq!(delivery.attempts, 2);
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn rejection_is_final() {
    let primary = FakeChannel::new("primary", Behaviour::Reject);
    let secondary = FakeChannel::new("secondary", Behaviour::Accept);

    let failure = failover(&[&primary, &secondary])
        .deliver(&email())
        .await
        .expect_err("rejected");

    assert_eq!(failure.channel, "primary");
    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.error, TransportError::Rejected { status: 400, .. }));
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn all_unreachable_reports_last_channel() {
    let primary = FakeChannel::new("primary", Behaviour::Unreachable);
    let secondary = FakeChannel::new("secondary", Behaviour::Unreachable);

    let failure = failover(&[&primary, &secondary])
        .deliver(&email())
        .await
        .expect_err("all down");

    assert_eq!(failure.channel, "secondary");
    assert_eq!(failure.attempts, 2);
    assert!(failure.error.is_recoverable());
}

#[tokio::test]
async fn channels_beyond_retry_budget_are_dropped() {
    let a = FakeChannel::new("a", Behaviour::Unreachable);
    let b = FakeChannel::new("b", Behaviour::Unreachable);
    let c = FakeChannel::new("c", Behaviour::Accept);

    let transport = failover(&[&a, &b, &c]);
    assert_eq!(transport.channel_names().len(), MAX_ATTEMPTS);

    let failure = transport.deliver(&email()).await.expect_err("budget exhausted");
    assert_eq!(failure.attempts, MAX_ATTEMPTS);
    assert_eq!(c.calls(), 0);
}

#[test]
fn empty_channel_list_is_misconfigured() {
    assert!(matches!(
        FailoverTransport::new(Vec::new()),
        Err(TransportError::Misconfigured(_))
    ));
}

#[tokio::test]
async fn console_channel_reports_mock_delivery() {
    let transport = FailoverTransport::single(Arc::new(ConsoleTransport));
    let delivery = transport.deliver(&email()).await.expect("logged");
    assert!(delivery.receipt.mock);
    assert_eq!(delivery.receipt.channel, ConsoleTransport::CHANNEL);
    assert!(delivery.receipt.message_id.is_none());
}

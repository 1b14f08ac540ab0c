//! Mail transport abstraction.
//!
//! Defines the [`MailTransport`] trait and the message/receipt types shared
//! by all channels.
//!
//! Three pieces build on it:
//! - [`relay::HttpRelayTransport`]: JSON mail relay over HTTPS
//! - [`console::ConsoleTransport`]: logs instead of sending (unconfigured mode)
//! - [`failover::FailoverTransport`]: ordered channels with a single retry

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

pub mod console;
pub mod failover;
pub mod relay;

pub use failover::{Delivery, DeliveryFailure, FailoverTransport};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// A fully personalized message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Display name for the `From` header.
    pub sender_name: Option<String>,
    /// Optional `Reply-To` address.
    pub reply_to: Option<String>,
}

/// Acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Channel that accepted the message.
    pub channel: String,
    /// Upstream message identifier, when the channel reports one.
    pub message_id: Option<String>,
    /// True when the message was only logged, not delivered.
    pub mock: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by mail transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel could not be reached (connect failure, timeout, reset).
    #[error("connection failed: {0}")]
    Connection(String),
    /// The channel answered and refused the message.
    #[error("relay returned non-success status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// The channel answered with something that could not be understood.
    #[error("invalid relay response: {0}")]
    InvalidResponse(String),
    /// The channel is not usable with its current configuration.
    #[error("transport misconfigured: {0}")]
    Misconfigured(String),
}

impl TransportError {
    /// Connection-level failures are worth one attempt on another channel.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Errors raised before a response status arrives.
///
/// A timeout is ambiguous: the relay may have queued the message without
/// answering in time. Treating it as recoverable makes failover
/// at-least-once, so a recipient can receive a second copy from the next
/// channel. Once a status line has been read, failures never map here; see
/// [`check_http_response`].
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            Self::Connection(e.to_string())
        } else if e.is_builder() {
            Self::Misconfigured(e.to_string())
        } else {
            Self::InvalidResponse(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// The status decides the outcome. A body that cannot be read is logged and
/// treated as empty, so a 2xx whose body times out still counts as accepted
/// and never triggers failover.
///
/// # Errors
///
/// Returns `TransportError::Rejected` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(status = status.as_u16(), error = %e, "failed to read relay response body");
            String::new()
        }
    };
    if !status.is_success() {
        return Err(TransportError::Rejected {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"SG\.[A-Za-z0-9_\-]{16,}\.[A-Za-z0-9_\-]{16,}",
        r"key-[A-Za-z0-9]{24,}",
        r"Bearer\s+[A-Za-z0-9._\-]{16,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One delivery channel.
///
/// Implementations must be `Send + Sync` so a single instance can serve
/// every dispatch worker.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Channel name used in logs and event metadata.
    fn channel(&self) -> &str;

    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network, relay, or configuration failure.
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError>;
}

//! Ordered channel failover with a single retry budget.

use std::sync::Arc;

use tracing::warn;

use super::{MailTransport, OutboundEmail, SendReceipt, TransportError};

/// Maximum delivery attempts per message: the primary plus one failover.
pub const MAX_ATTEMPTS: usize = 2;

/// A message accepted by one of the channels.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Receipt from the accepting channel.
    pub receipt: SendReceipt,
    /// Number of channels tried, including the accepting one.
    pub attempts: usize,
}

/// A message no channel accepted.
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Error from the last channel tried.
    pub error: TransportError,
    /// Name of the last channel tried.
    pub channel: String,
    /// Number of channels tried.
    pub attempts: usize,
}

/// Tries channels in order, moving on only after a connection-level failure.
///
/// At most [`MAX_ATTEMPTS`] channels are tried per message. Rejections and
/// other non-recoverable errors end the attempt immediately.
#[derive(Clone)]
pub struct FailoverTransport {
    channels: Vec<Arc<dyn MailTransport>>,
}

impl std::fmt::Debug for FailoverTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverTransport")
            .field("channels", &self.channel_names())
            .finish()
    }
}

impl FailoverTransport {
    /// Build from an ordered channel list (primary first).
    ///
    /// Channels beyond the retry budget are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Misconfigured`] if `channels` is empty.
    pub fn new(mut channels: Vec<Arc<dyn MailTransport>>) -> Result<Self, TransportError> {
        if channels.is_empty() {
            return Err(TransportError::Misconfigured(
                "at least one mail channel is required".to_owned(),
            ));
        }
        if channels.len() > MAX_ATTEMPTS {
            let ignored: Vec<String> = channels
                .iter()
                .skip(MAX_ATTEMPTS)
                .map(|c| c.channel().to_owned())
                .collect();
            warn!(?ignored, "channels beyond the retry budget are ignored");
            channels.truncate(MAX_ATTEMPTS);
        }
        Ok(Self { channels })
    }

    /// A transport with a single channel and no failover.
    pub fn single(channel: Arc<dyn MailTransport>) -> Self {
        Self {
            channels: vec![channel],
        }
    }

    /// Names of the configured channels, in attempt order.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .iter()
            .map(|c| c.channel().to_owned())
            .collect()
    }

    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryFailure`] describing the last error when no channel
    /// accepted the message.
    pub async fn deliver(&self, email: &OutboundEmail) -> Result<Delivery, DeliveryFailure> {
        let mut attempts: usize = 0;
        let mut last: Option<DeliveryFailure> = None;

        for (position, channel) in self.channels.iter().enumerate() {
            attempts = attempts.saturating_add(1);
            match channel.send(email).await {
                Ok(receipt) => return Ok(Delivery { receipt, attempts }),
                Err(error) => {
                    let has_next = position.saturating_add(1) < self.channels.len();
                    let recoverable = error.is_recoverable();
                    if recoverable && has_next {
                        warn!(
                            channel = channel.channel(),
                            error = %error,
                            "channel unreachable, trying failover"
                        );
                    }
                    last = Some(DeliveryFailure {
                        error,
                        channel: channel.channel().to_owned(),
                        attempts,
                    });
                    if !recoverable {
                        break;
                    }
                }
            }
        }

        Err(last.unwrap_or_else(|| DeliveryFailure {
            error: TransportError::Misconfigured("no mail channel configured".to_owned()),
            channel: String::new(),
            attempts,
        }))
    }
}

//! Log-only channel used when no relay is configured.

use async_trait::async_trait;
use tracing::info;

use super::{MailTransport, OutboundEmail, SendReceipt, TransportError};

/// Writes each message to the log and reports it as accepted.
#[derive(Debug, Clone, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    /// Channel name reported in receipts.
    pub const CHANNEL: &'static str = "console";
}

#[async_trait]
impl MailTransport for ConsoleTransport {
    fn channel(&self) -> &str {
        Self::CHANNEL
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            sender = ?email.sender_name,
            "mock email (no relay configured)"
        );
        Ok(SendReceipt {
            channel: Self::CHANNEL.to_owned(),
            message_id: None,
            mock: true,
        })
    }
}

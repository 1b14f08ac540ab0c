//! HTTP mail relay channel.
//!
//! Posts one JSON document per message to a relay endpoint
//! (`{"from", "to", "reply_to", "subject", "html"}`) with an optional bearer
//! key. A 2xx answer means the relay accepted the message whatever its body
//! says; the message id is read from `message_id`, `messageId` or `id` when
//! the body is JSON that has one.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{check_http_response, MailTransport, OutboundEmail, SendReceipt, TransportError};

/// Settings for one relay channel.
#[derive(Clone)]
pub struct RelaySettings {
    /// Channel name for logs and events.
    pub name: String,
    /// Relay endpoint receiving the JSON document.
    pub endpoint: Url,
    /// Bearer key, if the relay requires one.
    pub api_key: Option<String>,
    /// Address placed in the `From` header.
    pub sender_address: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for RelaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySettings")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("sender_address", &self.sender_address)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    from: String,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    html: &'a str,
}

/// Mail channel backed by an HTTP relay.
#[derive(Debug, Clone)]
pub struct HttpRelayTransport {
    settings: RelaySettings,
    http: reqwest::Client,
}

impl HttpRelayTransport {
    /// Build a relay channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Misconfigured`] if the HTTP client cannot be
    /// built or the endpoint is not http(s).
    pub fn new(settings: RelaySettings) -> Result<Self, TransportError> {
        if !matches!(settings.endpoint.scheme(), "http" | "https") {
            return Err(TransportError::Misconfigured(format!(
                "channel '{}': endpoint must be http or https",
                settings.name
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TransportError::Misconfigured(e.to_string()))?;
        Ok(Self { settings, http })
    }
}

/// Format a `From` header value, stripping characters that would break it.
pub fn format_from(sender_name: Option<&str>, address: &str) -> String {
    let name = sender_name
        .map(|n| {
            n.chars()
                .filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n'))
                .collect::<String>()
        })
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty());
    match name {
        Some(name) => format!("\"{name}\" <{address}>"),
        None => address.to_owned(),
    }
}

fn extract_message_id(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let parsed: serde_json::Value = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "relay accepted message with a non-JSON body, no message id");
            return None;
        }
    };
    ["message_id", "messageId", "id"]
        .iter()
        .find_map(|key| parsed.get(key).and_then(|v| v.as_str()))
        .map(str::to_owned)
}

#[async_trait]
impl MailTransport for HttpRelayTransport {
    fn channel(&self) -> &str {
        &self.settings.name
    }

    #[instrument(skip(self, email), fields(channel = %self.settings.name))]
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        let payload = RelayRequest {
            from: format_from(email.sender_name.as_deref(), &self.settings.sender_address),
            to: &email.to,
            reply_to: email.reply_to.as_deref(),
            subject: &email.subject,
            html: &email.html,
        };

        let mut request = self.http.post(self.settings.endpoint.clone()).json(&payload);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let body = check_http_response(response).await?;
        let message_id = extract_message_id(&body);
        debug!(message_id = ?message_id, "relay accepted message");

        Ok(SendReceipt {
            channel: self.settings.name.clone(),
            message_id,
            mock: false,
        })
    }
}

//! Delivery audit log.
//!
//! One [`SendEvent`] is appended per delivery attempt. The table is
//! append-only: the schema rejects updates and deletes with triggers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::trace;

use super::CampaignError;

/// Row type returned by SQLite queries for send events.
type EventRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
);

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendEventType {
    /// A channel accepted the message.
    Sent,
    /// No channel accepted the message.
    Failed,
}

impl SendEventType {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse a string into an event type.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::InvalidRow`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, CampaignError> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(CampaignError::InvalidRow(format!("event type {other:?}"))),
        }
    }
}

/// Immutable record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEvent {
    /// Campaign being dispatched.
    pub campaign_id: String,
    /// Tenant owning the campaign.
    pub tenant_id: String,
    /// Recipient contact.
    pub contact_id: String,
    /// Outcome.
    pub event_type: SendEventType,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Upstream message id, for accepted messages.
    pub message_id: Option<String>,
    /// Diagnostics: channel, attempts, and the error text on failure.
    pub metadata: Option<serde_json::Value>,
}

/// Sent/failed totals for a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Messages accepted by a channel.
    pub sent: u64,
    /// Messages no channel accepted.
    pub failed: u64,
}

/// Destination for send events.
///
/// Callers treat failures as non-fatal: a recording error is logged and the
/// dispatch continues.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Append one event.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on storage failure.
    async fn append(&self, event: &SendEvent) -> Result<(), CampaignError>;
}

/// SQLite-backed event log.
#[derive(Debug, Clone)]
pub struct SqliteEventLog {
    db: SqlitePool,
}

impl SqliteEventLog {
    /// Wrap a connection pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// All events of a campaign, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError`] on storage failure or a corrupt row.
    pub async fn events_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<SendEvent>, CampaignError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT campaign_id, tenant_id, contact_id, type, message_id, metadata, created_at \
             FROM send_events WHERE campaign_id = ?1 ORDER BY id",
        )
        .bind(campaign_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Sent and failed totals across all campaigns of a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on storage failure.
    pub async fn tenant_stats(&self, tenant_id: &str) -> Result<DeliveryStats, CampaignError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT type, count(*) FROM send_events WHERE tenant_id = ?1 GROUP BY type",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        let mut stats = DeliveryStats::default();
        for (kind, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match SendEventType::parse(&kind) {
                Ok(SendEventType::Sent) => stats.sent = count,
                Ok(SendEventType::Failed) => stats.failed = count,
                Err(_) => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl EventSink for SqliteEventLog {
    async fn append(&self, event: &SendEvent) -> Result<(), CampaignError> {
        let metadata = event.metadata.as_ref().map(serde_json::Value::to_string);
        sqlx::query(
            "INSERT INTO send_events (tenant_id, campaign_id, contact_id, type, message_id, \
             metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&event.tenant_id)
        .bind(&event.campaign_id)
        .bind(&event.contact_id)
        .bind(event.event_type.as_str())
        .bind(&event.message_id)
        .bind(&metadata)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.db)
        .await?;

        trace!(
            campaign_id = %event.campaign_id,
            contact_id = %event.contact_id,
            kind = event.event_type.as_str(),
            "send event recorded"
        );
        Ok(())
    }
}

fn event_from_row(row: EventRow) -> Result<SendEvent, CampaignError> {
    let (campaign_id, tenant_id, contact_id, kind, message_id, metadata, created_at) = row;
    let timestamp = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CampaignError::InvalidRow(format!("created_at {created_at:?}: {e}")))?;
    Ok(SendEvent {
        campaign_id,
        tenant_id,
        contact_id,
        event_type: SendEventType::parse(&kind)?,
        timestamp,
        message_id,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

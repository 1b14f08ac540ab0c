//! Campaign dispatch engine.
//!
//! Resolves the audience, claims the campaign with the `sending` guard, then
//! fans recipients out to a bounded worker pool. Every attempted recipient
//! yields exactly one [`SendEvent`]; a single failed recipient never aborts
//! the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::events::{EventSink, SendEvent, SendEventType};
use super::personalize::personalize;
use super::{Campaign, CampaignError, CampaignRepository, CampaignStatus, Tenant};
use crate::audience::{Audience, AudienceError, AudienceResolver, Contact};
use crate::transport::{FailoverTransport, OutboundEmail};

/// Errors that stop a dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Campaign or tenant state could not be read or written.
    #[error(transparent)]
    Campaign(#[from] CampaignError),

    /// The audience could not be resolved. The campaign status is unchanged.
    #[error("audience resolution failed: {0}")]
    Resolution(#[from] AudienceError),

    /// Another dispatch claimed the campaign first.
    #[error("campaign {0} is already being dispatched")]
    AlreadyInProgress(String),

    /// Messages went out but the campaign could not be marked completed.
    #[error("campaign {} dispatched but not finalized: {source}", .report.campaign_id)]
    Finalize {
        /// What was sent before finalization failed.
        report: Box<DispatchReport>,
        /// The storage error.
        #[source]
        source: CampaignError,
    },
}

/// How a dispatch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Every recipient was attempted.
    Completed,
    /// Cancellation was requested; remaining recipients were not started.
    Cancelled,
    /// Nothing was sent because the campaign was already in this status.
    Skipped(CampaignStatus),
}

/// Summary of one dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Campaign dispatched.
    pub campaign_id: String,
    /// How the run ended.
    pub outcome: DispatchOutcome,
    /// Distinct contacts in the resolved audience.
    pub audience_size: usize,
    /// Messages accepted by a channel.
    pub sent: u64,
    /// Messages no channel accepted.
    pub failed: u64,
    /// Contacts without an email address.
    pub skipped: u64,
}

impl DispatchReport {
    fn skipped(campaign_id: &str, status: CampaignStatus) -> Self {
        Self {
            campaign_id: campaign_id.to_owned(),
            outcome: DispatchOutcome::Skipped(status),
            audience_size: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
        }
    }

    /// True when the run stopped early on a cancellation request.
    pub fn cancelled(&self) -> bool {
        self.outcome == DispatchOutcome::Cancelled
    }
}

#[derive(Debug, Default)]
struct Tally {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Tally {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a worker needs to deliver one recipient.
struct SendContext {
    campaign: Campaign,
    tenant: Tenant,
    sender_name: Option<String>,
    transport: Arc<FailoverTransport>,
    events: Arc<dyn EventSink>,
    tally: Tally,
}

impl SendContext {
    async fn deliver(&self, contact: Contact, to: String) {
        let email = OutboundEmail {
            to,
            subject: personalize(&self.campaign.subject, &contact, &self.tenant),
            html: personalize(&self.campaign.body, &contact, &self.tenant),
            sender_name: self.sender_name.clone(),
            reply_to: self.campaign.reply_to.clone(),
        };

        let (event_type, message_id, metadata) = match self.transport.deliver(&email).await {
            Ok(delivery) => {
                Tally::bump(&self.tally.sent);
                debug!(
                    campaign_id = %self.campaign.id,
                    to = %email.to,
                    channel = %delivery.receipt.channel,
                    "message accepted"
                );
                (
                    SendEventType::Sent,
                    delivery.receipt.message_id,
                    json!({
                        "channel": delivery.receipt.channel,
                        "attempts": delivery.attempts,
                        "mock": delivery.receipt.mock,
                    }),
                )
            }
            Err(failure) => {
                Tally::bump(&self.tally.failed);
                warn!(
                    campaign_id = %self.campaign.id,
                    contact_id = %contact.id,
                    channel = %failure.channel,
                    error = %failure.error,
                    "delivery failed"
                );
                (
                    SendEventType::Failed,
                    None,
                    json!({
                        "error": failure.error.to_string(),
                        "channel": failure.channel,
                        "attempts": failure.attempts,
                    }),
                )
            }
        };

        let event = SendEvent {
            campaign_id: self.campaign.id.clone(),
            tenant_id: self.tenant.id.clone(),
            contact_id: contact.id,
            event_type,
            timestamp: Utc::now(),
            message_id,
            metadata: Some(metadata),
        };
        if let Err(e) = self.events.append(&event).await {
            warn!(
                campaign_id = %event.campaign_id,
                contact_id = %event.contact_id,
                error = %e,
                "failed to record send event"
            );
        }
    }
}

/// Runs campaign dispatches against injected collaborators.
#[derive(Clone)]
pub struct DispatchEngine {
    campaigns: Arc<dyn CampaignRepository>,
    resolver: AudienceResolver,
    transport: Arc<FailoverTransport>,
    events: Arc<dyn EventSink>,
    concurrency: usize,
    default_sender_name: Option<String>,
}

impl DispatchEngine {
    /// Create an engine. A `concurrency` of zero is treated as one.
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        resolver: AudienceResolver,
        transport: Arc<FailoverTransport>,
        events: Arc<dyn EventSink>,
        concurrency: usize,
    ) -> Self {
        Self {
            campaigns,
            resolver,
            transport,
            events,
            concurrency: concurrency.max(1),
            default_sender_name: None,
        }
    }

    /// Display name used when neither the campaign nor its tenant has one.
    pub fn with_default_sender_name(mut self, name: impl Into<String>) -> Self {
        self.default_sender_name = Some(name.into()).filter(|n| !n.trim().is_empty());
        self
    }

    /// Dispatch a campaign to the union of its linked segments.
    ///
    /// A campaign already `sending` or `completed` is skipped and reported
    /// with [`DispatchOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Resolution`] if the audience cannot be resolved;
    ///   the campaign keeps its status.
    /// - [`DispatchError::AlreadyInProgress`] if a concurrent caller won the
    ///   `sending` guard.
    /// - [`DispatchError::Finalize`] if completion could not be recorded.
    pub async fn execute(&self, campaign_id: &str) -> Result<DispatchReport, DispatchError> {
        let campaign = self.campaigns.load(campaign_id).await?;
        if !campaign.status.is_sendable() {
            info!(campaign_id, status = campaign.status.as_str(), "campaign not sendable, skipped");
            return Ok(DispatchReport::skipped(campaign_id, campaign.status));
        }

        let groups = self.campaigns.linked_rule_groups(campaign_id).await?;
        let audience = self.resolver.resolve(&groups, &campaign.tenant_id).await?;
        self.run(campaign, audience).await
    }

    /// Dispatch a campaign to an explicit recipient list instead of its
    /// segments. Repeated ids and contacts of other tenants are dropped.
    ///
    /// # Errors
    ///
    /// Same as [`DispatchEngine::execute`], minus resolution failures.
    pub async fn execute_for_recipients(
        &self,
        campaign_id: &str,
        recipients: Vec<Contact>,
    ) -> Result<DispatchReport, DispatchError> {
        let campaign = self.campaigns.load(campaign_id).await?;
        if !campaign.status.is_sendable() {
            info!(campaign_id, status = campaign.status.as_str(), "campaign not sendable, skipped");
            return Ok(DispatchReport::skipped(campaign_id, campaign.status));
        }

        let tenant_id = campaign.tenant_id.clone();
        let audience = Audience::from_recipients(recipients.into_iter().filter(|c| {
            let same = c.tenant_id == tenant_id;
            if !same {
                warn!(campaign_id, contact_id = %c.id, "dropping recipient from another tenant");
            }
            same
        }));
        self.run(campaign, audience).await
    }

    async fn run(
        &self,
        campaign: Campaign,
        audience: Audience,
    ) -> Result<DispatchReport, DispatchError> {
        let campaign_id = campaign.id.clone();
        let tenant = self.campaigns.tenant(&campaign.tenant_id).await?;

        if !self.campaigns.try_set_sending(&campaign_id).await? {
            return Err(DispatchError::AlreadyInProgress(campaign_id));
        }

        let audience_size = audience.len();
        info!(
            campaign_id = %campaign_id,
            tenant_id = %tenant.id,
            audience_size,
            channels = ?self.transport.channel_names(),
            concurrency = self.concurrency,
            "dispatch started"
        );

        let sender_name = [campaign.from_name.as_deref(), Some(tenant.name.as_str())]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
            .map(str::to_owned)
            .or_else(|| self.default_sender_name.clone());
        let ctx = Arc::new(SendContext {
            campaign,
            tenant,
            sender_name,
            transport: Arc::clone(&self.transport),
            events: Arc::clone(&self.events),
            tally: Tally::default(),
        });

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut skipped: u64 = 0;
        let mut cancelled = false;
        let mut join_failures: u64 = 0;

        for contact in audience.into_contacts() {
            let Some(to) = contact
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_owned)
            else {
                debug!(campaign_id = %campaign_id, contact_id = %contact.id, "no email address, skipped");
                skipped = skipped.saturating_add(1);
                continue;
            };

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if self.cancel_requested(&campaign_id).await {
                info!(campaign_id = %campaign_id, "cancellation requested, stopping dispatch");
                cancelled = true;
                break;
            }

            let ctx = Arc::clone(&ctx);
            workers.spawn(async move {
                let _permit = permit;
                ctx.deliver(contact, to).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(campaign_id = %campaign_id, error = %e, "send worker aborted");
                join_failures = join_failures.saturating_add(1);
            }
        }

        let report = DispatchReport {
            campaign_id: campaign_id.clone(),
            outcome: if cancelled {
                DispatchOutcome::Cancelled
            } else {
                DispatchOutcome::Completed
            },
            audience_size,
            sent: ctx.tally.sent.load(Ordering::Relaxed),
            failed: ctx
                .tally
                .failed
                .load(Ordering::Relaxed)
                .saturating_add(join_failures),
            skipped,
        };

        if let Err(source) = self.campaigns.set_completed(&campaign_id).await {
            return Err(DispatchError::Finalize {
                report: Box::new(report),
                source,
            });
        }

        info!(
            campaign_id = %campaign_id,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled(),
            "dispatch finished"
        );
        Ok(report)
    }

    /// A storage error while polling the flag is logged and ignored.
    async fn cancel_requested(&self, campaign_id: &str) -> bool {
        match self.campaigns.cancel_requested(campaign_id).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(campaign_id, error = %e, "could not read cancellation flag");
                false
            }
        }
    }
}

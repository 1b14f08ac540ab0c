//! Campaigns: lifecycle state machine, persistence, personalization,
//! delivery audit log and the dispatch engine.
//!
//! # Lifecycle
//!
//! `draft`/`scheduled` → `sending` → `completed`. Entering `sending` is a
//! single atomic check-and-set in the store, so two concurrent triggers for
//! the same campaign cannot both dispatch. A campaign that entered `sending`
//! always reaches `completed`, however many recipients failed.

pub mod dispatch;
pub mod events;
pub mod personalize;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audience::RuleGroup;

pub use dispatch::{DispatchEngine, DispatchError, DispatchOutcome, DispatchReport};
pub use events::{EventSink, SendEvent, SendEventType};
pub use personalize::personalize;

/// Errors from the campaign subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested campaign was not found.
    #[error("campaign not found: {0}")]
    NotFound(String),

    /// The campaign's tenant was not found.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// A stored status string is not recognised.
    #[error("invalid campaign status: {0:?}")]
    InvalidStatus(String),

    /// A stored row could not be decoded.
    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    /// Cancellation was requested for a campaign that is not sending.
    #[error("campaign {id} is {status}, only a sending campaign can be cancelled")]
    NotCancellable {
        /// The campaign.
        id: String,
        /// Its current status.
        status: String,
    },

    /// State transition is not allowed.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// The source state.
        from: String,
        /// The target state.
        to: String,
    },
}

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Being edited, never sent.
    Draft,
    /// Waiting for an external scheduler to trigger dispatch.
    Scheduled,
    /// Dispatch in progress.
    Sending,
    /// Dispatch finished.
    Completed,
}

impl CampaignStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
        }
    }

    /// Parse a string into a campaign status.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::InvalidStatus`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, CampaignError> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "sending" => Ok(Self::Sending),
            "completed" => Ok(Self::Completed),
            other => Err(CampaignError::InvalidStatus(other.to_owned())),
        }
    }

    /// Check if transitioning to `target` is valid.
    pub fn can_transition_to(&self, target: CampaignStatus) -> bool {
        matches!(
            (self, target),
            (Self::Draft, CampaignStatus::Scheduled)
                | (Self::Draft, CampaignStatus::Sending)
                | (Self::Scheduled, CampaignStatus::Sending)
                | (Self::Sending, CampaignStatus::Completed)
        )
    }

    /// Whether a dispatch may start from this status.
    pub fn is_sendable(&self) -> bool {
        self.can_transition_to(CampaignStatus::Sending)
    }
}

/// The organization that owns contacts and campaigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: String,
    /// Display name, used as the default sender name and merge token value.
    pub name: String,
}

/// A bulk email campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Internal name.
    pub name: String,
    /// Current lifecycle status.
    pub status: CampaignStatus,
    /// Subject template.
    pub subject: String,
    /// HTML body template.
    pub body: String,
    /// Sender display name; the tenant name is used when absent.
    pub from_name: Option<String>,
    /// Reply-To address.
    pub reply_to: Option<String>,
    /// When an external scheduler should trigger dispatch.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Set when someone asked for an in-progress dispatch to stop.
    pub cancel_requested: bool,
}

/// Persistent campaign state used by the dispatch engine.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Load a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::NotFound`] if no campaign matches.
    async fn load(&self, campaign_id: &str) -> Result<Campaign, CampaignError>;

    /// Load a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::TenantNotFound`] if no tenant matches.
    async fn tenant(&self, tenant_id: &str) -> Result<Tenant, CampaignError>;

    /// Rule groups of every segment linked to the campaign.
    ///
    /// Malformed stored rules come back as [`RuleGroup::empty`].
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on storage failure.
    async fn linked_rule_groups(&self, campaign_id: &str) -> Result<Vec<RuleGroup>, CampaignError>;

    /// Atomically move the campaign into `sending` if it is `draft` or
    /// `scheduled`. Returns `false` when another caller got there first or
    /// the campaign is not sendable.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on storage failure.
    async fn try_set_sending(&self, campaign_id: &str) -> Result<bool, CampaignError>;

    /// Move the campaign from `sending` to `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::InvalidTransition`] if the campaign is not
    /// `sending`.
    async fn set_completed(&self, campaign_id: &str) -> Result<(), CampaignError>;

    /// Whether cancellation of an in-progress dispatch was requested.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on storage failure.
    async fn cancel_requested(&self, campaign_id: &str) -> Result<bool, CampaignError>;
}

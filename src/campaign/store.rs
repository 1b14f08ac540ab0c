//! SQLite persistence for tenants, segments and campaigns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, trace, warn};

use super::{Campaign, CampaignError, CampaignRepository, CampaignStatus, Tenant};
use crate::audience::RuleGroup;

/// Row type returned by SQLite queries for campaigns.
type CampaignRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
);

const CAMPAIGN_COLUMNS: &str = "id, tenant_id, name, status, subject, body, from_name, \
                                reply_to, scheduled_at, cancel_requested";

/// Fields supplied when creating a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCampaign {
    /// Owning tenant.
    pub tenant_id: String,
    /// Internal name.
    pub name: String,
    /// Subject template.
    pub subject: String,
    /// HTML body template.
    pub body: String,
    /// Sender display name.
    pub from_name: Option<String>,
    /// Reply-To address.
    pub reply_to: Option<String>,
}

/// SQLite-backed campaign store.
#[derive(Debug, Clone)]
pub struct SqliteCampaignStore {
    db: SqlitePool,
}

impl SqliteCampaignStore {
    /// Wrap a connection pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a tenant, or rename it if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on SQLite failure.
    pub async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), CampaignError> {
        sqlx::query(
            "INSERT INTO tenants (id, name) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET name = ?2",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Create a draft campaign and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on SQLite failure.
    pub async fn create_campaign(&self, new: &NewCampaign) -> Result<String, CampaignError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO campaigns (id, tenant_id, name, subject, body, from_name, reply_to, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft')",
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.name)
        .bind(&new.subject)
        .bind(&new.body)
        .bind(&new.from_name)
        .bind(&new.reply_to)
        .execute(&self.db)
        .await?;

        trace!(campaign_id = %id, tenant_id = %new.tenant_id, "campaign created");
        Ok(id)
    }

    /// Store a rule group as a named segment and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on SQLite failure.
    pub async fn create_segment(
        &self,
        tenant_id: &str,
        name: &str,
        rules: &RuleGroup,
    ) -> Result<String, CampaignError> {
        let id = uuid::Uuid::new_v4().to_string();
        let rules_json = serde_json::to_string(rules)
            .map_err(|e| CampaignError::InvalidRow(format!("segment rules: {e}")))?;
        sqlx::query("INSERT INTO segments (id, tenant_id, name, rules) VALUES (?1, ?2, ?3, ?4)")
            .bind(&id)
            .bind(tenant_id)
            .bind(name)
            .bind(&rules_json)
            .execute(&self.db)
            .await?;
        Ok(id)
    }

    /// Link a segment to a campaign. Linking twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Database`] on SQLite failure.
    pub async fn link_segment(
        &self,
        campaign_id: &str,
        segment_id: &str,
    ) -> Result<(), CampaignError> {
        sqlx::query(
            "INSERT OR IGNORE INTO campaign_segments (campaign_id, segment_id) VALUES (?1, ?2)",
        )
        .bind(campaign_id)
        .bind(segment_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Move a draft campaign to `scheduled` for an external scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::InvalidTransition`] if the campaign is not a
    /// draft, or [`CampaignError::NotFound`].
    pub async fn schedule_campaign(
        &self,
        campaign_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CampaignError> {
        let campaign = self.load(campaign_id).await?;
        if !campaign.status.can_transition_to(CampaignStatus::Scheduled) {
            return Err(CampaignError::InvalidTransition {
                from: campaign.status.as_str().to_owned(),
                to: CampaignStatus::Scheduled.as_str().to_owned(),
            });
        }
        sqlx::query(
            "UPDATE campaigns SET status = 'scheduled', scheduled_at = ?1, \
             updated_at = datetime('now') WHERE id = ?2 AND status = 'draft'",
        )
        .bind(at.to_rfc3339())
        .bind(campaign_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Ask an in-progress dispatch to stop starting new recipients.
    ///
    /// Only a `sending` campaign can be cancelled; the flag is never set on a
    /// campaign that has not started.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::NotFound`] if the campaign does not exist and
    /// [`CampaignError::NotCancellable`] if it is not `sending`.
    pub async fn request_cancel(&self, campaign_id: &str) -> Result<(), CampaignError> {
        let result = sqlx::query(
            "UPDATE campaigns SET cancel_requested = 1, updated_at = datetime('now') \
             WHERE id = ?1 AND status = 'sending'",
        )
        .bind(campaign_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            let current = self.load(campaign_id).await?;
            return Err(CampaignError::NotCancellable {
                id: campaign_id.to_owned(),
                status: current.status.as_str().to_owned(),
            });
        }
        info!(campaign_id, "cancellation requested");
        Ok(())
    }

    /// All campaigns of a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError`] on SQLite failure or a corrupt row.
    pub async fn list_campaigns(&self, tenant_id: &str) -> Result<Vec<Campaign>, CampaignError> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE tenant_id = ?1 \
             ORDER BY created_at DESC, id"
        );
        let rows: Vec<CampaignRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .fetch_all(&self.db)
            .await?;
        rows.into_iter().map(campaign_from_row).collect()
    }
}

/// Convert a `CampaignRow` tuple into a [`Campaign`], propagating parse errors.
fn campaign_from_row(row: CampaignRow) -> Result<Campaign, CampaignError> {
    let scheduled_at = row.8.as_deref().and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| warn!(campaign_id = %row.0, error = %e, "ignoring bad scheduled_at"))
            .ok()
    });
    Ok(Campaign {
        status: CampaignStatus::parse(&row.3)?,
        id: row.0,
        tenant_id: row.1,
        name: row.2,
        subject: row.4,
        body: row.5,
        from_name: row.6,
        reply_to: row.7,
        scheduled_at,
        cancel_requested: row.9,
    })
}

#[async_trait]
impl CampaignRepository for SqliteCampaignStore {
    async fn load(&self, campaign_id: &str) -> Result<Campaign, CampaignError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
        let row: CampaignRow = sqlx::query_as(&sql)
            .bind(campaign_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CampaignError::NotFound(campaign_id.to_owned()))?;
        campaign_from_row(row)
    }

    async fn tenant(&self, tenant_id: &str) -> Result<Tenant, CampaignError> {
        let row: (String, String) = sqlx::query_as("SELECT id, name FROM tenants WHERE id = ?1")
            .bind(tenant_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CampaignError::TenantNotFound(tenant_id.to_owned()))?;
        Ok(Tenant {
            id: row.0,
            name: row.1,
        })
    }

    async fn linked_rule_groups(&self, campaign_id: &str) -> Result<Vec<RuleGroup>, CampaignError> {
        // Segments owned by another tenant are never applied.
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT s.id, s.rules FROM campaign_segments cs \
             JOIN segments s ON s.id = cs.segment_id \
             JOIN campaigns c ON c.id = cs.campaign_id AND c.tenant_id = s.tenant_id \
             WHERE cs.campaign_id = ?1 ORDER BY s.created_at, s.id",
        )
        .bind(campaign_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(segment_id, rules)| {
                trace!(campaign_id, segment_id = %segment_id, "segment rules loaded");
                RuleGroup::from_json_lenient(&rules)
            })
            .collect())
    }

    async fn try_set_sending(&self, campaign_id: &str) -> Result<bool, CampaignError> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'sending', updated_at = datetime('now') \
             WHERE id = ?1 AND status IN ('draft', 'scheduled')",
        )
        .bind(campaign_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_completed(&self, campaign_id: &str) -> Result<(), CampaignError> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'completed', updated_at = datetime('now') \
             WHERE id = ?1 AND status = 'sending'",
        )
        .bind(campaign_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        let current = self.load(campaign_id).await?;
        Err(CampaignError::InvalidTransition {
            from: current.status.as_str().to_owned(),
            to: CampaignStatus::Completed.as_str().to_owned(),
        })
    }

    async fn cancel_requested(&self, campaign_id: &str) -> Result<bool, CampaignError> {
        let row: (bool,) = sqlx::query_as("SELECT cancel_requested FROM campaigns WHERE id = ?1")
            .bind(campaign_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CampaignError::NotFound(campaign_id.to_owned()))?;
        Ok(row.0)
    }
}

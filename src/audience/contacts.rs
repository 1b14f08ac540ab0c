//! Contact repository: tenant-scoped reads of the contact pool.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio_stream::StreamExt;
use tracing::{trace, warn};

use super::{AudienceError, Contact, Predicate};

/// Row type returned by SQLite queries for contacts.
type ContactRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
);

const CONTACT_COLUMNS: &str = "id, tenant_id, first_name, last_name, email, phone, company, \
                               attributes, metrics, tags";

/// Read access to the contact pool.
///
/// Both operations are scoped to one tenant: a contact owned by another
/// tenant must never be returned or counted.
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Return every contact of `tenant_id` that satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`AudienceError`] when the pool cannot be read.
    async fn find_matching(
        &self,
        predicate: &Predicate,
        tenant_id: &str,
    ) -> Result<Vec<Contact>, AudienceError>;

    /// Count the contacts of `tenant_id` that satisfy `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`AudienceError`] when the pool cannot be read.
    async fn count(&self, predicate: &Predicate, tenant_id: &str) -> Result<u64, AudienceError>;
}

/// SQLite-backed contact repository.
///
/// Rules are evaluated in process: the tenant's contacts are streamed and
/// tested one at a time, so only matches are held in memory.
#[derive(Debug, Clone)]
pub struct SqliteContactRepository {
    db: SqlitePool,
}

impl SqliteContactRepository {
    /// Wrap a connection pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContactRepository for SqliteContactRepository {
    async fn find_matching(
        &self,
        predicate: &Predicate,
        tenant_id: &str,
    ) -> Result<Vec<Contact>, AudienceError> {
        if predicate.is_never() {
            return Ok(Vec::new());
        }
        let sql =
            format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 ORDER BY id");
        let mut rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(tenant_id)
            .fetch(&self.db);

        let mut matched = Vec::new();
        while let Some(row) = rows.next().await {
            let Some(contact) = decode_or_skip(row?) else {
                continue;
            };
            if predicate.matches(&contact) {
                matched.push(contact);
            }
        }
        trace!(tenant_id, matched = matched.len(), "contact scan finished");
        Ok(matched)
    }

    async fn count(&self, predicate: &Predicate, tenant_id: &str) -> Result<u64, AudienceError> {
        if predicate.is_never() {
            return Ok(0);
        }
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1");
        let mut rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(tenant_id)
            .fetch(&self.db);

        let mut count: u64 = 0;
        while let Some(row) = rows.next().await {
            if decode_or_skip(row?).is_some_and(|c| predicate.matches(&c)) {
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }
}

/// Insert a contact (or replace one with the same id).
///
/// # Errors
///
/// Returns [`AudienceError::Database`] on SQLite failure.
pub async fn upsert_contact(db: &SqlitePool, contact: &Contact) -> Result<(), AudienceError> {
    let attributes = encode(&contact.id, &contact.attributes)?;
    let metrics = encode(&contact.id, &contact.metrics)?;
    let tags = encode(&contact.id, &contact.tags)?;

    sqlx::query(
        "INSERT INTO contacts (id, tenant_id, first_name, last_name, email, phone, company, \
         attributes, metrics, tags) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(id) DO UPDATE SET tenant_id = ?2, first_name = ?3, last_name = ?4, \
         email = ?5, phone = ?6, company = ?7, attributes = ?8, metrics = ?9, tags = ?10",
    )
    .bind(&contact.id)
    .bind(&contact.tenant_id)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(&contact.email)
    .bind(&contact.phone)
    .bind(&contact.company)
    .bind(&attributes)
    .bind(&metrics)
    .bind(&tags)
    .execute(db)
    .await?;

    trace!(contact_id = %contact.id, "contact stored");
    Ok(())
}

fn encode<T: serde::Serialize>(id: &str, value: &T) -> Result<String, AudienceError> {
    serde_json::to_string(value).map_err(|e| AudienceError::InvalidRow {
        id: id.to_owned(),
        reason: e.to_string(),
    })
}

/// Decode a row, logging and skipping it when its JSON columns are corrupt.
fn decode_or_skip(row: ContactRow) -> Option<Contact> {
    match contact_from_row(row) {
        Ok(contact) => Some(contact),
        Err(e) => {
            warn!(error = %e, "skipping undecodable contact row");
            None
        }
    }
}

/// Convert a `ContactRow` tuple into a [`Contact`].
fn contact_from_row(row: ContactRow) -> Result<Contact, AudienceError> {
    let (id, tenant_id, first_name, last_name, email, phone, company, attrs, metrics, tags) = row;
    let invalid = |column: &str, e: serde_json::Error| AudienceError::InvalidRow {
        id: id.clone(),
        reason: format!("{column}: {e}"),
    };
    let attributes = serde_json::from_str(&attrs).map_err(|e| invalid("attributes", e))?;
    let metrics = serde_json::from_str(&metrics).map_err(|e| invalid("metrics", e))?;
    let tags = serde_json::from_str(&tags).map_err(|e| invalid("tags", e))?;
    Ok(Contact {
        id,
        tenant_id,
        first_name,
        last_name,
        email,
        phone,
        company,
        attributes,
        metrics,
        tags,
    })
}

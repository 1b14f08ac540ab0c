//! Audience resolution: union and deduplication of rule group matches within
//! a tenant boundary.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::contacts::ContactRepository;
use super::{compile, AudienceError, Contact, RuleGroup};

/// A deduplicated set of contacts, keyed by contact id.
///
/// Iteration follows insertion order. When the same id is inserted twice the
/// first record is kept.
#[derive(Debug, Clone, Default)]
pub struct Audience {
    contacts: Vec<Contact>,
    index: HashMap<String, usize>,
}

impl Audience {
    /// Create an empty audience.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an audience from an explicit recipient list, dropping repeats.
    pub fn from_recipients(recipients: impl IntoIterator<Item = Contact>) -> Self {
        let mut audience = Self::new();
        for contact in recipients {
            audience.insert(contact);
        }
        audience
    }

    /// Add a contact. Returns `false` if its id was already present.
    pub fn insert(&mut self, contact: Contact) -> bool {
        if self.index.contains_key(&contact.id) {
            return false;
        }
        self.index.insert(contact.id.clone(), self.contacts.len());
        self.contacts.push(contact);
        true
    }

    /// Number of distinct contacts.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Returns true if the audience has no contacts.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Look up a contact by id.
    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.index.get(id).and_then(|&i| self.contacts.get(i))
    }

    /// Iterate over contacts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    /// Consume the audience, yielding its contacts in insertion order.
    pub fn into_contacts(self) -> Vec<Contact> {
        self.contacts
    }
}

/// Resolves rule groups to audiences using an injected contact repository.
#[derive(Clone)]
pub struct AudienceResolver {
    contacts: Arc<dyn ContactRepository>,
}

impl AudienceResolver {
    /// Create a resolver over the given repository.
    pub fn new(contacts: Arc<dyn ContactRepository>) -> Self {
        Self { contacts }
    }

    /// Evaluate every group against the tenant's contacts and union the matches.
    ///
    /// Groups that compile to a never-matching predicate contribute nothing.
    /// Contacts reported by the repository for another tenant are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AudienceError`] if the contact pool cannot be read. No partial
    /// audience is returned in that case.
    pub async fn resolve(
        &self,
        groups: &[RuleGroup],
        tenant_id: &str,
    ) -> Result<Audience, AudienceError> {
        let mut audience = Audience::new();
        for (position, group) in groups.iter().enumerate() {
            let predicate = compile(group);
            if predicate.is_never() {
                debug!(tenant_id, group = position, "rule group matches nobody, skipped");
                continue;
            }
            let matches = self.contacts.find_matching(&predicate, tenant_id).await?;
            let found = matches.len();
            let mut added: usize = 0;
            for contact in matches {
                if contact.tenant_id != tenant_id {
                    warn!(
                        tenant_id,
                        contact_id = %contact.id,
                        "dropping contact from another tenant"
                    );
                    continue;
                }
                if audience.insert(contact) {
                    added = added.saturating_add(1);
                }
            }
            debug!(tenant_id, group = position, found, added, "rule group resolved");
        }
        info!(tenant_id, groups = groups.len(), size = audience.len(), "audience resolved");
        Ok(audience)
    }

    /// Count the tenant's contacts matching one group without loading them.
    ///
    /// Read-only and infallible: a repository failure is logged and reported
    /// as zero.
    pub async fn preview_count(&self, group: &RuleGroup, tenant_id: &str) -> u64 {
        let predicate = compile(group);
        match self.contacts.count(&predicate, tenant_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(tenant_id, error = %e, "audience preview failed");
                0
            }
        }
    }
}

//! Audience targeting: contact records, declarative rule groups, the
//! rule-to-predicate compiler, and tenant-scoped resolution.
//!
//! Rule groups arrive as JSON authored by people, so nothing here trusts
//! their shape. Malformed conditions compile to predicates that never match
//! and an empty group matches nobody.

pub mod contacts;
pub mod predicate;
pub mod resolver;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

pub use predicate::{compile, diagnose, Predicate, RuleError};
pub use resolver::{Audience, AudienceResolver};

/// A targetable person record owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Unique contact identifier.
    pub id: String,
    /// Tenant that owns this contact.
    pub tenant_id: String,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Email address. Contacts without one cannot receive campaigns.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Company the contact works for.
    pub company: Option<String>,
    /// Free-text fields such as `status`, `state` or `source`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Numeric fields such as `loanAmount` or `score`.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Labels attached to the contact.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// A borrowed view of one contact field, as seen by rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    /// Scalar text field.
    Text(&'a str),
    /// Numeric field.
    Number(f64),
    /// Multi-valued tag set.
    Tags(&'a BTreeSet<String>),
    /// The contact has no value for this field.
    Missing,
}

impl Contact {
    /// Create a contact with only identity fields set.
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            first_name: None,
            last_name: None,
            email: None,
            phone: None,
            company: None,
            attributes: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Look up a field by its rule name.
    ///
    /// Built-in fields accept both camelCase and snake_case names. Any other
    /// name is looked up in `metrics` first, then `attributes`.
    pub fn field(&self, name: &str) -> FieldValue<'_> {
        match name {
            "firstName" | "first_name" => optional_text(self.first_name.as_deref()),
            "lastName" | "last_name" => optional_text(self.last_name.as_deref()),
            "email" => optional_text(self.email.as_deref()),
            "phone" => optional_text(self.phone.as_deref()),
            "company" => optional_text(self.company.as_deref()),
            "tags" => FieldValue::Tags(&self.tags),
            other => {
                if let Some(n) = self.metrics.get(other) {
                    FieldValue::Number(*n)
                } else if let Some(s) = self.attributes.get(other) {
                    FieldValue::Text(s)
                } else {
                    FieldValue::Missing
                }
            }
        }
    }
}

fn optional_text(value: Option<&str>) -> FieldValue<'_> {
    value.map_or(FieldValue::Missing, FieldValue::Text)
}

/// How the conditions of a [`RuleGroup`] are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    /// Every condition must hold.
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    /// At least one condition must hold.
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// Comparison operator of a [`RuleCondition`].
///
/// Operator strings that are not recognised deserialize to
/// [`Operator::Unknown`], which never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Exact match after trimming.
    Equals,
    /// Tag membership, or case-insensitive substring on text.
    Contains,
    /// Numeric `>`.
    #[serde(rename = "gt", alias = "greater_than")]
    GreaterThan,
    /// Numeric `<`.
    #[serde(rename = "lt", alias = "less_than")]
    LessThan,
    /// Numeric `>=`.
    #[serde(rename = "gte", alias = "greater_or_equal")]
    GreaterOrEqual,
    /// Numeric `<=`.
    #[serde(rename = "lte", alias = "less_or_equal")]
    LessOrEqual,
    /// Membership of the field value in the rule's value list.
    #[serde(rename = "in", alias = "in_set")]
    InSet,
    /// Tag membership.
    ArrayContains,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

impl Operator {
    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::GreaterThan => "gt",
            Self::LessThan => "lt",
            Self::GreaterOrEqual => "gte",
            Self::LessOrEqual => "lte",
            Self::InSet => "in",
            Self::ArrayContains => "array_contains",
            Self::Unknown => "unknown",
        }
    }
}

/// One `field operator value` test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Contact field name, see [`Contact::field`]. Anything but a string
    /// reads as blank.
    #[serde(default, deserialize_with = "lenient_field")]
    pub field: String,
    /// Comparison operator. Missing or non-string reads as
    /// [`Operator::Unknown`].
    #[serde(default = "unknown_operator", deserialize_with = "lenient_operator")]
    pub operator: Operator,
    /// Scalar or list value supplied by the rule author.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A declarative audience definition.
///
/// A group with no conditions matches nobody.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    /// Combination logic.
    #[serde(default)]
    pub logic: Logic,
    /// Ordered conditions. An entry that is not a condition object keeps
    /// its position as a condition that never matches.
    #[serde(default, deserialize_with = "lenient_conditions")]
    pub conditions: Vec<RuleCondition>,
}

fn unknown_operator() -> Operator {
    Operator::Unknown
}

fn lenient_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(field) => field,
        _ => String::new(),
    })
}

fn lenient_operator<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Operator, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).unwrap_or(Operator::Unknown))
}

fn lenient_conditions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<RuleCondition>, D::Error> {
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|entry| {
            serde_json::from_value(entry).unwrap_or_else(|_| RuleCondition {
                field: String::new(),
                operator: Operator::Unknown,
                value: serde_json::Value::Null,
            })
        })
        .collect())
}

impl RuleGroup {
    /// The explicit "match nothing" group.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a group from stored JSON, falling back to [`RuleGroup::empty`]
    /// when the document is malformed.
    pub fn from_json_lenient(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(group) => group,
            Err(e) => {
                tracing::warn!(error = %e, "malformed rule group, treating as empty");
                Self::empty()
            }
        }
    }
}

/// Errors from audience resolution.
#[derive(Debug, thiserror::Error)]
pub enum AudienceError {
    /// Reading the contact pool failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored contact row could not be decoded.
    #[error("invalid contact row {id}: {reason}")]
    InvalidRow {
        /// Contact id of the bad row.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The contact repository is unavailable.
    #[error("contact repository unavailable: {0}")]
    Unavailable(String),
}

/// Fatal failure to read the contact pool.
pub type ResolutionError = AudienceError;

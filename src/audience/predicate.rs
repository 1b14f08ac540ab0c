//! Rule-to-predicate compiler.
//!
//! [`compile`] turns a [`RuleGroup`] into a [`Predicate`] that can be
//! evaluated against any [`Contact`]. Compilation never fails: every problem
//! with a condition (blank field, unknown operator, unusable value) turns that
//! condition into one that never matches. [`diagnose`] reports the same
//! problems for display.

use super::{Contact, FieldValue, Logic, Operator, RuleCondition, RuleGroup};

/// Problems found in a rule group. Diagnostic only; never raised by [`compile`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// The group has no conditions and will match nobody.
    #[error("rule group has no conditions and matches nobody")]
    EmptyGroup,

    /// A condition has no field name.
    #[error("condition {index}: field name is blank")]
    BlankField {
        /// Position of the condition in the group.
        index: usize,
    },

    /// A condition uses an operator that is not supported.
    #[error("condition {index}: unsupported operator")]
    UnknownOperator {
        /// Position of the condition in the group.
        index: usize,
    },

    /// A condition's value cannot be used with its operator.
    #[error("condition {index}: value unusable with '{operator}': {reason}")]
    UnusableValue {
        /// Position of the condition in the group.
        index: usize,
        /// Wire name of the operator.
        operator: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// A compiled boolean test over a contact.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    inner: Compiled,
}

#[derive(Debug, Clone, PartialEq)]
enum Compiled {
    Never,
    All(Vec<Check>),
    Any(Vec<Check>),
}

#[derive(Debug, Clone, PartialEq)]
struct Check {
    field: String,
    test: Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
enum Test {
    Never,
    Equals(Scalar),
    Contains(String),
    HasTag(String),
    Compare(Comparison, f64),
    InSet(Vec<Scalar>),
}

/// A rule value reduced to its text form and, when it has one, its number.
#[derive(Debug, Clone, PartialEq)]
struct Scalar {
    text: String,
    number: Option<f64>,
}

impl Predicate {
    /// A predicate that matches no contact.
    pub fn never() -> Self {
        Self {
            inner: Compiled::Never,
        }
    }

    /// Returns true if this predicate can never match anything.
    ///
    /// Repositories use this to skip the contact scan entirely.
    pub fn is_never(&self) -> bool {
        match &self.inner {
            Compiled::Never => true,
            Compiled::All(checks) => checks.iter().any(|c| c.test == Test::Never),
            Compiled::Any(checks) => checks.iter().all(|c| c.test == Test::Never),
        }
    }

    /// Evaluate the predicate against a contact.
    pub fn matches(&self, contact: &Contact) -> bool {
        match &self.inner {
            Compiled::Never => false,
            Compiled::All(checks) => checks.iter().all(|c| c.eval(contact)),
            Compiled::Any(checks) => checks.iter().any(|c| c.eval(contact)),
        }
    }
}

/// Compile a rule group into a predicate.
///
/// An empty group compiles to [`Predicate::never`].
pub fn compile(group: &RuleGroup) -> Predicate {
    if group.conditions.is_empty() {
        return Predicate::never();
    }
    let checks: Vec<Check> = group
        .conditions
        .iter()
        .enumerate()
        .map(|(index, condition)| Check {
            field: condition.field.trim().to_owned(),
            test: compile_condition(index, condition).unwrap_or(Test::Never),
        })
        .collect();

    let inner = match group.logic {
        Logic::And => Compiled::All(checks),
        Logic::Or => Compiled::Any(checks),
    };
    Predicate { inner }
}

/// List every problem in a rule group, in condition order.
pub fn diagnose(group: &RuleGroup) -> Vec<RuleError> {
    if group.conditions.is_empty() {
        return vec![RuleError::EmptyGroup];
    }
    group
        .conditions
        .iter()
        .enumerate()
        .filter_map(|(index, condition)| compile_condition(index, condition).err())
        .collect()
}

fn compile_condition(index: usize, condition: &RuleCondition) -> Result<Test, RuleError> {
    if condition.field.trim().is_empty() {
        return Err(RuleError::BlankField { index });
    }
    let operator = condition.operator;
    let unusable = |reason| RuleError::UnusableValue {
        index,
        operator: operator.as_str(),
        reason,
    };
    let value = &condition.value;

    match operator {
        Operator::Equals => scalar(value)
            .map(Test::Equals)
            .ok_or_else(|| unusable("expected a single text or number")),
        Operator::Contains | Operator::ArrayContains => {
            let needle = scalar(value)
                .map(|s| s.text)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| unusable("expected non-empty text"))?;
            if operator == Operator::ArrayContains {
                Ok(Test::HasTag(needle))
            } else {
                Ok(Test::Contains(needle))
            }
        }
        Operator::GreaterThan
        | Operator::LessThan
        | Operator::GreaterOrEqual
        | Operator::LessOrEqual => {
            let n = scalar(value)
                .and_then(|s| s.number)
                .ok_or_else(|| unusable("expected a number"))?;
            let cmp = match operator {
                Operator::GreaterThan => Comparison::Gt,
                Operator::LessThan => Comparison::Lt,
                Operator::GreaterOrEqual => Comparison::Gte,
                _ => Comparison::Lte,
            };
            Ok(Test::Compare(cmp, n))
        }
        Operator::InSet => {
            let members: Vec<Scalar> = match value {
                serde_json::Value::Array(items) => items.iter().filter_map(scalar).collect(),
                other => scalar(other).into_iter().collect(),
            };
            if members.is_empty() {
                Err(unusable("expected at least one value"))
            } else {
                Ok(Test::InSet(members))
            }
        }
        Operator::Unknown => Err(RuleError::UnknownOperator { index }),
    }
}

fn scalar(value: &serde_json::Value) -> Option<Scalar> {
    match value {
        serde_json::Value::String(s) => {
            let text = s.trim().to_owned();
            let number = parse_number(&text);
            Some(Scalar { text, number })
        }
        serde_json::Value::Number(n) => Some(Scalar {
            text: n.to_string(),
            number: n.as_f64().filter(|f| f.is_finite()),
        }),
        serde_json::Value::Bool(b) => Some(Scalar {
            text: b.to_string(),
            number: None,
        }),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

impl Check {
    fn eval(&self, contact: &Contact) -> bool {
        let field = contact.field(&self.field);
        match &self.test {
            Test::Never => false,
            Test::Equals(expected) => match field {
                FieldValue::Text(t) => t.trim() == expected.text,
                FieldValue::Number(n) => expected.number == Some(n),
                FieldValue::Tags(tags) => tags.iter().any(|t| t.trim() == expected.text),
                FieldValue::Missing => false,
            },
            Test::Contains(needle) => match field {
                FieldValue::Text(t) => t.to_lowercase().contains(&needle.to_lowercase()),
                FieldValue::Tags(tags) => tags.iter().any(|t| t.trim() == needle),
                FieldValue::Number(_) | FieldValue::Missing => false,
            },
            Test::HasTag(tag) => match field {
                FieldValue::Tags(tags) => tags.iter().any(|t| t.trim() == tag),
                _ => false,
            },
            Test::Compare(cmp, rhs) => {
                let lhs = match field {
                    FieldValue::Number(n) => Some(n),
                    FieldValue::Text(t) => parse_number(t),
                    FieldValue::Tags(_) | FieldValue::Missing => None,
                };
                lhs.is_some_and(|lhs| match cmp {
                    Comparison::Gt => lhs > *rhs,
                    Comparison::Lt => lhs < *rhs,
                    Comparison::Gte => lhs >= *rhs,
                    Comparison::Lte => lhs <= *rhs,
                })
            }
            Test::InSet(members) => match field {
                FieldValue::Text(t) => members.iter().any(|m| m.text == t.trim()),
                FieldValue::Number(n) => members.iter().any(|m| m.number == Some(n)),
                FieldValue::Tags(tags) => tags
                    .iter()
                    .any(|t| members.iter().any(|m| m.text == t.trim())),
                FieldValue::Missing => false,
            },
        }
    }
}

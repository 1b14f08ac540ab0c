//! Tests for rule compilation and evaluation in `audience::predicate`.

use serde_json::json;

use mailcast::audience::{compile, diagnose, Contact, RuleError, RuleGroup};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn group(value: serde_json::Value) -> RuleGroup {
    match serde_json::from_value(value) {
        Ok(group) => group,
        Err(err) => panic!("rule group should parse: {err}"),
    }
}

fn lead(id: &str, status: &str, state: &str) -> Contact {
    let mut c = Contact::new(id, "t1");
    c.first_name = Some("Dana".to_owned());
    c.email = Some(format!("{id}@example.com"));
    c.attributes.insert("status".to_owned(), status.to_owned());
    c.attributes.insert("state".to_owned(), state.to_owned());
    c
}

// ---------------------------------------------------------------------------
// Logic
// ---------------------------------------------------------------------------

#[test]
fn and_requires_every_condition() {
    let rules = group(json!({
        "logic": "AND",
        "conditions": [
            {"field": "status", "operator": "equals", "value": "NEW"},
            {"field": "state", "operator": "equals", "value": "CA"}
        ]
    }));
    let predicate = compile(&rules);

    assert!(predicate.matches(&lead("a", "NEW", "CA")));
    assert!(!predicate.matches(&lead("b", "NEW", "TX")));
    assert!(!predicate.matches(&lead("c", "OLD", "CA")));
}

#[test]
fn or_requires_any_condition() {
    let rules = group(json!({
        "logic": "OR",
        "conditions": [
            {"field": "status", "operator": "equals", "value": "NEW"},
            {"field": "state", "operator": "equals", "value": "CA"}
        ]
    }));
    let predicate = compile(&rules);

    assert!(predicate.matches(&lead("a", "NEW", "TX")));
    assert!(predicate.matches(&lead("b", "OLD", "CA")));
    assert!(!predicate.matches(&lead("c", "OLD", "TX")));
}

#[test]
fn missing_logic_defaults_to_and() {
    let rules = group(json!({
        "conditions": [
            {"field": "status", "operator": "equals", "value": "NEW"},
            {"field": "state", "operator": "equals", "value": "CA"}
        ]
    }));
    assert!(!compile(&rules).matches(&lead("a", "NEW", "TX")));
}

#[test]
fn empty_group_matches_nobody() {
    let rules = group(json!({"logic": "OR", "conditions": []}));
    let predicate = compile(&rules);
    assert!(predicate.is_never());
    assert!(!predicate.matches(&lead("a", "NEW", "CA")));
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[test]
fn contains_on_text_is_case_insensitive() {
    let mut c = lead("a", "NEW", "CA");
    c.company = Some("Golden Gate Lending".to_owned());
    let rules = group(json!({
        "conditions": [{"field": "company", "operator": "contains", "value": "gate"}]
    }));
    assert!(compile(&rules).matches(&c));
}

#[test]
fn contains_on_tags_is_exact_membership() {
    let mut c = lead("a", "NEW", "CA");
    c.tags.insert("vip".to_owned());
    c.tags.insert("refinance".to_owned());

    let hit = group(json!({
        "conditions": [{"field": "tags", "operator": "contains", "value": "vip"}]
    }));
    let miss = group(json!({
        "conditions": [{"field": "tags", "operator": "contains", "value": "VIP"}]
    }));
    let partial = group(json!({
        "conditions": [{"field": "tags", "operator": "contains", "value": "refi"}]
    }));

    assert!(compile(&hit).matches(&c));
    assert!(!compile(&miss).matches(&c));
    assert!(!compile(&partial).matches(&c));
}

#[test]
fn array_contains_only_looks_at_tags() {
    let mut c = lead("a", "NEW", "CA");
    c.tags.insert("NEW".to_owned());
    let on_tags = group(json!({
        "conditions": [{"field": "tags", "operator": "array_contains", "value": "NEW"}]
    }));
    let on_text = group(json!({
        "conditions": [{"field": "status", "operator": "array_contains", "value": "NEW"}]
    }));
    assert!(compile(&on_tags).matches(&c));
    assert!(!compile(&on_text).matches(&c));
}

#[test]
fn numeric_comparisons_coerce_strings() {
    let mut c = lead("a", "NEW", "CA");
    c.metrics.insert("loanAmount".to_owned(), 350_000.0);
    c.attributes.insert("creditScore".to_owned(), " 712 ".to_owned());

    let cases = [
        (json!({"field": "loanAmount", "operator": "gt", "value": 300000}), true),
        (json!({"field": "loanAmount", "operator": "gt", "value": "350000"}), false),
        (json!({"field": "loanAmount", "operator": "gte", "value": "350000"}), true),
        (json!({"field": "loanAmount", "operator": "lt", "value": 400000.5}), true),
        (json!({"field": "loanAmount", "operator": "lte", "value": 349999}), false),
        (json!({"field": "creditScore", "operator": "gte", "value": 700}), true),
        (json!({"field": "creditScore", "operator": "lt", "value": "700"}), false),
    ];
    for (condition, expected) in cases {
        let rules = group(json!({"conditions": [condition.clone()]}));
        assert_eq!(
            compile(&rules).matches(&c),
            expected,
            "condition {condition} should evaluate to {expected}"
        );
    }
}

#[test]
fn numeric_comparison_against_text_field_is_non_match() {
    let rules = group(json!({
        "conditions": [{"field": "state", "operator": "gt", "value": 10}]
    }));
    assert!(!compile(&rules).matches(&lead("a", "NEW", "CA")));
}

#[test]
fn equals_on_numeric_field_compares_numbers() {
    let mut c = lead("a", "NEW", "CA");
    c.metrics.insert("score".to_owned(), 80.0);
    let rules = group(json!({
        "conditions": [{"field": "score", "operator": "equals", "value": "80.0"}]
    }));
    assert!(compile(&rules).matches(&c));
}

#[test]
fn in_matches_any_listed_value() {
    let rules = group(json!({
        "conditions": [{"field": "state", "operator": "in", "value": ["CA", "NV", " OR "]}]
    }));
    let predicate = compile(&rules);
    assert!(predicate.matches(&lead("a", "NEW", "NV")));
    assert!(predicate.matches(&lead("b", "NEW", "OR")));
    assert!(!predicate.matches(&lead("c", "NEW", "TX")));
}

#[test]
fn in_with_scalar_value_acts_like_single_member_list() {
    let rules = group(json!({
        "conditions": [{"field": "state", "operator": "in", "value": "CA"}]
    }));
    assert!(compile(&rules).matches(&lead("a", "NEW", "CA")));
}

#[test]
fn missing_field_never_matches() {
    let rules = group(json!({
        "conditions": [{"field": "phone", "operator": "equals", "value": ""}]
    }));
    assert!(!compile(&rules).matches(&lead("a", "NEW", "CA")));
}

#[test]
fn built_in_fields_accept_both_spellings() {
    let camel = group(json!({
        "conditions": [{"field": "firstName", "operator": "equals", "value": "Dana"}]
    }));
    let snake = group(json!({
        "conditions": [{"field": "first_name", "operator": "equals", "value": "Dana"}]
    }));
    let c = lead("a", "NEW", "CA");
    assert!(compile(&camel).matches(&c));
    assert!(compile(&snake).matches(&c));
}

// ---------------------------------------------------------------------------
// Malformed rules
// ---------------------------------------------------------------------------

#[test]
fn unknown_operator_only_disables_its_condition_under_or() {
    let rules = group(json!({
        "logic": "OR",
        "conditions": [
            {"field": "status", "operator": "matches_regex", "value": "N.*"},
            {"field": "state", "operator": "equals", "value": "CA"}
        ]
    }));
    let predicate = compile(&rules);
    assert!(!predicate.is_never());
    assert!(predicate.matches(&lead("a", "OLD", "CA")));
    assert!(!predicate.matches(&lead("b", "NEW", "TX")));
}

#[test]
fn malformed_condition_shapes_only_disable_themselves() {
    let raw = json!({
        "logic": "OR",
        "conditions": [
            {"field": "status", "operator": "equals", "value": "NEW"},
            {"field": "state", "value": "CA"},
            {"field": 42, "operator": "equals", "value": "x"},
            {"field": "state", "operator": 7, "value": "TX"},
            "not a condition"
        ]
    })
    .to_string();
    let rules = RuleGroup::from_json_lenient(&raw);
    assert_eq!(rules.conditions.len(), 5);

    let predicate = compile(&rules);
    assert!(predicate.matches(&lead("a", "NEW", "NV")));
    assert!(!predicate.matches(&lead("b", "OLD", "CA")));
    assert!(!predicate.matches(&lead("c", "OLD", "TX")));

    assert_eq!(
        diagnose(&rules),
        vec![
            RuleError::UnknownOperator { index: 1 },
            RuleError::BlankField { index: 2 },
            RuleError::UnknownOperator { index: 3 },
            RuleError::BlankField { index: 4 },
        ]
    );
}

#[test]
fn diagnose_reports_each_problem_in_order() {
    let rules = group(json!({
        "logic": "OR",
        "conditions": [
            {"field": "  ", "operator": "equals", "value": "x"},
            {"field": "status", "operator": "equals", "value": "NEW"},
            {"field": "score", "operator": "gt", "value": "high"},
            {"field": "status", "operator": "startswith", "value": "N"},
            {"field": "state", "operator": "in", "value": []}
        ]
    }));
    let problems = diagnose(&rules);
    assert_eq!(problems.len(), 4);
    assert_eq!(problems[0], RuleError::BlankField { index: 0 });
    assert!(matches!(problems[1], RuleError::UnusableValue { index: 2, operator: "gt", .. }));
    assert_eq!(problems[2], RuleError::UnknownOperator { index: 3 });
    assert!(matches!(problems[3], RuleError::UnusableValue { index: 4, operator: "in", .. }));
}

#[test]
fn well_formed_group_has_no_diagnostics() {
    let rules = group(json!({
        "conditions": [{"field": "status", "operator": "equals", "value": "NEW"}]
    }));
    assert!(diagnose(&rules).is_empty());
}

#[test]
fn object_value_is_unusable() {
    let rules = group(json!({
        "conditions": [{"field": "status", "operator": "equals", "value": {"eq": "NEW"}}]
    }));
    assert!(compile(&rules).is_never());
    assert_eq!(diagnose(&rules).len(), 1);
}

//! Merge token substitution.
//!
//! Supported tokens: `{{firstName}}`, `{{lastName}}`, `{{email}}`,
//! `{{phone}}`, and `{{brokerName}}` / `{{companyName}}` / `{{tenantName}}`
//! for the tenant's name. Unknown tokens are copied through unchanged.

use crate::audience::Contact;

use super::Tenant;

/// Render `template` for one recipient. Missing values become empty strings.
pub fn personalize(template: &str, contact: &Contact, tenant: &Tenant) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let (before, from_open) = rest.split_at(start);
        out.push_str(before);
        let inner = &from_open[2..];
        let Some(end) = inner.find("}}") else {
            out.push_str(from_open);
            return out;
        };
        let token = &inner[..end];
        match token_value(token, contact, tenant) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(token);
                out.push_str("}}");
            }
        }
        rest = &inner[end.saturating_add(2)..];
    }
    out.push_str(rest);
    out
}

fn token_value<'a>(token: &str, contact: &'a Contact, tenant: &'a Tenant) -> Option<&'a str> {
    let value = match token {
        "firstName" => contact.first_name.as_deref(),
        "lastName" => contact.last_name.as_deref(),
        "email" => contact.email.as_deref(),
        "phone" => contact.phone.as_deref(),
        "brokerName" | "companyName" | "tenantName" => Some(tenant.name.as_str()),
        _ => return None,
    };
    Some(value.unwrap_or(""))
}

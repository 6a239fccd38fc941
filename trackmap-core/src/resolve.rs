//! Hierarchical lookups against the reference tables.
//!
//! Entity and category lookups try the full domain first and then strip the
//! leftmost label until a match is found or the name runs out, so
//! `sub.evil.example.com` resolves through `evil.example.com` before
//! `example.com`. All functions are pure reads of the reference maps.

use crate::reference::{Entity, PolicyEntry, ReferenceData};
use std::collections::{BTreeMap, HashMap};

/// Walk `domain` and its ancestors, returning the first hit.
fn walk_up<T>(domain: &str, lookup: impl Fn(&str) -> Option<T>) -> Option<T> {
    let mut current = domain;
    while !current.is_empty() {
        if let Some(found) = lookup(current) {
            return Some(found);
        }
        current = match current.split_once('.') {
            Some((_, parent)) => parent,
            None => "",
        };
    }
    None
}

pub fn resolve_entity<'a>(entities: &'a HashMap<String, Entity>, domain: &str) -> Option<&'a Entity> {
    walk_up(domain, |d| entities.get(d))
}

/// Category tags set on the closest enclosing domain. Tags whose flag is
/// falsy are dropped.
pub fn resolve_categories(
    categories: &HashMap<String, BTreeMap<String, serde_json::Value>>,
    domain: &str,
) -> Vec<String> {
    walk_up(domain, |d| categories.get(d))
        .map(|tags| {
            tags.iter()
                .filter(|(_, flag)| is_truthy(flag))
                .map(|(tag, _)| tag.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Policy URL keyed by the exact domain, falling back to the owner's name.
/// No walk up the domain chain.
pub fn resolve_policy<'a>(
    policies: &'a HashMap<String, PolicyEntry>,
    domain: &str,
    owner_name: Option<&str>,
) -> Option<&'a str> {
    policies
        .get(domain)
        .or_else(|| owner_name.and_then(|name| policies.get(name)))
        .map(|p| p.privacy_policy.as_str())
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

impl ReferenceData {
    pub fn entity_for(&self, domain: &str) -> Option<&Entity> {
        resolve_entity(&self.entity_map, domain)
    }

    pub fn categories_for(&self, domain: &str) -> Vec<String> {
        resolve_categories(&self.categories, domain)
    }

    pub fn policy_for(&self, domain: &str, owner_name: Option<&str>) -> Option<&str> {
        resolve_policy(&self.policies, domain, owner_name)
    }
}

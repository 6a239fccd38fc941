//! CNAME cloaking detection and the resource rules trackers accumulate.
//!
//! A first-party looking host (`metrics.shop.example`) that DNS-resolves to a
//! tracker's infrastructure is attributed to the tracker's domain. The chain
//! origin is kept as a cname entry on the tracker record.

use crate::domain::{DomainInfo, DomainParser, ParsedUrl};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Sample sites kept per resource rule.
pub const MAX_EXAMPLE_SITES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnameEntry {
    /// Host the page actually requested.
    pub original: String,
    /// Final target of the CNAME chain.
    pub resolved: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
}

/// Where a cloaked request really goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloakedTarget {
    pub target: DomainInfo,
    pub entry: CnameEntry,
}

/// Resolve a request's CNAME chain. Returns `None` unless the final target
/// sits on a different registrable domain than the requested host.
pub fn canonicalize(
    parser: &DomainParser,
    requested: &ParsedUrl,
    chain: &[String],
    nameservers: &[String],
) -> Option<CloakedTarget> {
    let resolved = chain.last()?.trim_end_matches('.');
    let target = parser.parse_host(resolved);

    if target.domain == requested.domain() {
        return None;
    }

    let mut nameservers: Vec<String> = nameservers.to_vec();
    nameservers.sort();
    nameservers.dedup();

    Some(CloakedTarget {
        entry: CnameEntry {
            original: requested.hostname().to_string(),
            resolved: target.hostname.clone(),
            nameservers,
        },
        target,
    })
}

/// Ordering for cname lists: case-folded first, then byte order so equal
/// folds still sort deterministically.
pub fn cname_order(a: &CnameEntry, b: &CnameEntry) -> Ordering {
    a.original
        .to_lowercase()
        .cmp(&b.original.to_lowercase())
        .then_with(|| a.original.cmp(&b.original))
}

pub fn contains_cname(cnames: &[CnameEntry], entry: &CnameEntry) -> bool {
    cnames.iter().any(|c| c.original == entry.original)
}

/// Append entries whose origin is not yet present, then re-sort. Duplicates
/// are skipped, never overwritten.
pub fn merge_cnames(cnames: &mut Vec<CnameEntry>, incoming: &[CnameEntry]) {
    for entry in incoming {
        if !contains_cname(cnames, entry) {
            cnames.push(entry.clone());
        }
    }
    cnames.sort_by(cname_order);
}

/// Escape a `domain + path` pair into the rule pattern format
/// (`tracker\.com\/px\.gif`).
pub fn rule_pattern(domain: &str, path: &str) -> String {
    let raw = format!("{}{}", domain, path);
    let mut escaped = String::with_capacity(raw.len() * 2);
    for c in raw.chars() {
        if matches!(
            c,
            '.' | '/' | '\\' | '+' | '*' | '?' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One blocking-rule resource of a tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    pub rule: String,
    pub subdomains: BTreeSet<String>,
    pub cnames: Vec<CnameEntry>,
    /// Hoisted to the tracker record by `add_rule`.
    #[serde(skip)]
    pub nameservers: BTreeSet<String>,
    pub types: BTreeSet<String>,
    pub sites: usize,
    pub fingerprinting: f64,
    pub cookies: bool,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub first_party_cookies: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub first_party_cookies_sent: BTreeSet<String>,
    pub example_sites: BTreeSet<String>,
}

impl ResourceRule {
    pub fn new(rule: String) -> Self {
        Self {
            rule,
            subdomains: BTreeSet::new(),
            cnames: Vec::new(),
            nameservers: BTreeSet::new(),
            types: BTreeSet::new(),
            sites: 0,
            fingerprinting: 0.0,
            cookies: false,
            first_party_cookies: BTreeSet::new(),
            first_party_cookies_sent: BTreeSet::new(),
            example_sites: BTreeSet::new(),
        }
    }

    pub fn add_example_site(&mut self, site: &str) {
        self.example_sites.insert(site.to_string());
        while self.example_sites.len() > MAX_EXAMPLE_SITES {
            self.example_sites.pop_last();
        }
    }

    /// Fold another contribution for the same pattern into this one.
    pub fn merge(&mut self, other: ResourceRule) {
        self.subdomains.extend(other.subdomains);
        merge_cnames(&mut self.cnames, &other.cnames);
        self.nameservers.extend(other.nameservers);
        self.types.extend(other.types);
        self.sites += other.sites;
        self.fingerprinting = self.fingerprinting.max(other.fingerprinting);
        self.cookies |= other.cookies;
        self.first_party_cookies.extend(other.first_party_cookies);
        self.first_party_cookies_sent.extend(other.first_party_cookies_sent);
        for site in other.example_sites {
            self.add_example_site(&site);
        }
    }
}

//! Per-tracker profile records.
//!
//! A record is created the first time a domain is seen as a third party,
//! grows with every site that loads it, and receives its crawl-wide
//! statistics once in [`TrackerRecord::finalize`].

use crate::cname::{CnameEntry, ResourceRule, merge_cnames};
use crate::domain::DomainParser;
use crate::reference::ReferenceData;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_SOURCE_TAG: &str = "DuckDuckGo";
pub const MAX_TOP_INITIATORS: usize = 10;

/// Options that shape every record of a crawl.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub source_tag: String,
    pub add_surrogates: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            add_surrogates: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurrogateRule {
    pub rule: String,
    pub replace_with: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatorShare {
    pub domain: String,
    pub prevalence: f64,
}

/// Crawl-wide observations of one tracker domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainStats {
    pub sites: usize,
    pub cookie_sites: usize,
    /// Highest fingerprint score seen on each site.
    pub fingerprint_scores: Vec<f64>,
    /// initiator domain -> number of sites
    pub initiators: BTreeMap<String, usize>,
}

impl DomainStats {
    /// Mean of the per-site maxima, summed in sorted order so the result
    /// does not depend on the order sites arrived in.
    pub fn fingerprint_score(&self) -> f64 {
        if self.fingerprint_scores.is_empty() {
            return 0.0;
        }
        let mut scores = self.fingerprint_scores.clone();
        scores.sort_by(f64::total_cmp);
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerRecord {
    pub domain: String,
    pub owner: Owner,
    pub source: Vec<String>,
    pub prevalence: f64,
    pub sites: usize,
    pub subdomains: BTreeSet<String>,
    pub cnames: Vec<CnameEntry>,
    pub fingerprinting: u8,
    #[serde(serialize_with = "serialize_resources")]
    pub resources: BTreeMap<String, ResourceRule>,
    pub categories: Vec<String>,
    pub performance: serde_json::Value,
    pub cookies: f64,
    pub top_initiators: Vec<InitiatorShare>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaking: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surrogates: Option<Vec<SurrogateRule>>,
    pub types: BTreeMap<String, u64>,
    pub nameservers: BTreeSet<String>,
    /// Tag before any region suffix.
    #[serde(skip)]
    source_tag: String,
}

fn serialize_resources<S: Serializer>(
    resources: &BTreeMap<String, ResourceRule>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(resources.values())
}

impl TrackerRecord {
    /// Resolve everything the reference tables know about `domain`.
    pub fn new(
        domain: &str,
        reference: &ReferenceData,
        parser: &DomainParser,
        options: &TrackerOptions,
    ) -> Self {
        let mut owner = reference
            .entity_for(domain)
            .map(|entity| Owner {
                name: Some(entity.name.clone()),
                display_name: Some(entity.display_name().to_string()),
                ..Owner::default()
            })
            .unwrap_or_default();

        if let Some(policy) = reference.policy_for(domain, owner.name.as_deref()) {
            owner.url = parser
                .parse(policy)
                .ok()
                .map(|parsed| format!("http://{}", parsed.domain()));
            owner.privacy_policy = Some(policy.to_string());
        }

        let surrogates = if options.add_surrogates {
            surrogates_for(reference, domain)
        } else {
            None
        };

        Self {
            domain: domain.to_string(),
            owner,
            source: vec![options.source_tag.clone()],
            prevalence: 0.0,
            sites: 0,
            subdomains: BTreeSet::new(),
            cnames: Vec::new(),
            fingerprinting: 0,
            resources: BTreeMap::new(),
            categories: reference.categories_for(domain),
            performance: reference
                .performance
                .get(domain)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            cookies: 0.0,
            top_initiators: Vec::new(),
            breaking: breaking_for(reference, domain),
            surrogates,
            types: BTreeMap::new(),
            nameservers: BTreeSet::new(),
            source_tag: options.source_tag.clone(),
        }
    }

    pub fn add_types(&mut self, request_type: &str, count: u64) {
        *self.types.entry(request_type.to_string()).or_insert(0) += count;
    }

    /// Merge a resource rule: subdomains and nameservers union into the
    /// record, cnames are deduplicated by origin and kept sorted, and the
    /// rule itself joins the resource list without its nameservers.
    pub fn add_rule(&mut self, mut rule: ResourceRule) {
        self.subdomains.extend(rule.subdomains.iter().cloned());
        merge_cnames(&mut self.cnames, &rule.cnames);
        self.nameservers.extend(std::mem::take(&mut rule.nameservers));

        match self.resources.get_mut(&rule.rule) {
            Some(existing) => existing.merge(rule),
            None => {
                self.resources.insert(rule.rule.clone(), rule);
            }
        }
    }

    pub fn add_region(&mut self, region_code: &str) {
        self.source = vec![format!("{}-{}", self.source_tag, region_code)];
    }

    /// Apply crawl-wide statistics. `total_sites` is the number of sites
    /// that were processed.
    pub fn finalize(&mut self, stats: &DomainStats, total_sites: usize) {
        let prevalence = ratio(stats.sites, total_sites);
        self.prevalence = to_precision(prevalence, 3);
        self.sites = (self.prevalence * total_sites as f64).round() as usize;
        self.cookies = to_precision(ratio(stats.cookie_sites, total_sites), 3);
        self.fingerprinting = fingerprint_rank(stats.fingerprint_score());

        let mut initiators: Vec<(&String, &usize)> = stats.initiators.iter().collect();
        initiators.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        self.top_initiators = initiators
            .into_iter()
            .take(MAX_TOP_INITIATORS)
            .map(|(domain, count)| InitiatorShare {
                domain: domain.clone(),
                prevalence: to_precision(ratio(*count, total_sites), 3),
            })
            .collect();
    }
}

/// Rank table for raw fingerprint scores.
pub fn fingerprint_rank(score: f64) -> u8 {
    if score <= 0.0 {
        0
    } else if score <= 100.0 {
        1
    } else if score <= 150.0 {
        2
    } else {
        3
    }
}

/// Round to `digits` significant digits.
pub fn to_precision(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(digits - 1 - magnitude);
    (value * factor).round() / factor
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn surrogates_for(reference: &ReferenceData, domain: &str) -> Option<Vec<SurrogateRule>> {
    let rules: Vec<SurrogateRule> = reference
        .surrogates
        .get(domain)?
        .iter()
        .map(|s| SurrogateRule {
            rule: s.regex_rule.clone(),
            replace_with: s.surrogate.clone(),
        })
        .collect();
    (!rules.is_empty()).then_some(rules)
}

fn breaking_for(reference: &ReferenceData, domain: &str) -> Option<Vec<serde_json::Value>> {
    let entries: Vec<serde_json::Value> = reference
        .breaking
        .iter()
        .filter(|(list_type, _)| list_type.contains("breaking-request"))
        .filter_map(|(_, domains)| domains.get(domain))
        .flatten()
        .cloned()
        .collect();
    (!entries.is_empty()).then_some(entries)
}

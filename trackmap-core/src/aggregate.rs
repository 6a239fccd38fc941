// Crawl-wide aggregation of site contributions into tracker records

use crate::domain::DomainParser;
use crate::reference::ReferenceData;
use crate::site::SiteContribution;
use crate::tracker::{DomainStats, TrackerOptions, TrackerRecord, to_precision};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Counters bumped by every in-flight site.
#[derive(Debug, Default)]
pub struct CrawlStats {
    sites: AtomicUsize,
    sites_skipped: AtomicUsize,
    sites_failed: AtomicUsize,
    requests: AtomicUsize,
    requests_skipped: AtomicUsize,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn site_processed(&self, requests: usize, requests_skipped: usize) {
        self.sites.fetch_add(1, Ordering::SeqCst);
        self.requests.fetch_add(requests, Ordering::SeqCst);
        self.requests_skipped
            .fetch_add(requests_skipped, Ordering::SeqCst);
    }

    pub fn site_skipped(&self) {
        self.sites_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn site_failed(&self) {
        self.sites_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self, total_sites: usize) -> StatsSnapshot {
        StatsSnapshot {
            total_sites,
            sites: self.sites.load(Ordering::SeqCst),
            sites_skipped: self.sites_skipped.load(Ordering::SeqCst),
            sites_failed: self.sites_failed.load(Ordering::SeqCst),
            requests: self.requests.load(Ordering::SeqCst),
            requests_skipped: self.requests_skipped.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Records the source announced.
    pub total_sites: usize,
    /// Sites folded into the aggregate.
    pub sites: usize,
    pub sites_skipped: usize,
    pub sites_failed: usize,
    pub requests: usize,
    /// Requests whose URL had no network host.
    pub requests_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub name: String,
    pub display_name: String,
    pub properties: Vec<String>,
    pub prevalence: f64,
}

/// Fully folded result of a crawl.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSnapshot {
    /// Ordered by domain.
    pub trackers: Vec<TrackerRecord>,
    /// Ordered by entity name.
    pub entities: Vec<EntityRecord>,
    pub stats: StatsSnapshot,
}

impl CrawlSnapshot {
    pub fn tracker(&self, domain: &str) -> Option<&TrackerRecord> {
        self.trackers.iter().find(|t| t.domain == domain)
    }
}

/// Keyed store of tracker records. Mutated only through [`Aggregator::fold`],
/// one site at a time.
#[derive(Debug, Clone)]
pub struct Aggregator {
    reference: Arc<ReferenceData>,
    parser: Arc<DomainParser>,
    options: TrackerOptions,
    trackers: BTreeMap<String, TrackerRecord>,
    domain_stats: BTreeMap<String, DomainStats>,
    entity_sites: BTreeMap<String, usize>,
}

impl Aggregator {
    pub fn new(
        reference: Arc<ReferenceData>,
        parser: Arc<DomainParser>,
        options: TrackerOptions,
    ) -> Self {
        Self {
            reference,
            parser,
            options,
            trackers: BTreeMap::new(),
            domain_stats: BTreeMap::new(),
            entity_sites: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn get(&self, domain: &str) -> Option<&TrackerRecord> {
        self.trackers.get(domain)
    }

    /// Fold one site's contribution.
    pub fn fold(&mut self, contribution: SiteContribution) {
        let mut entities: BTreeSet<String> = BTreeSet::new();

        for (domain, hit) in contribution.trackers {
            let record = self.trackers.entry(domain.clone()).or_insert_with(|| {
                debug!("New tracker domain {}", domain);
                TrackerRecord::new(&domain, &self.reference, &self.parser, &self.options)
            });

            for rule in hit.rules.into_values() {
                record.add_rule(rule);
            }
            for (request_type, count) in &hit.types {
                record.add_types(request_type, *count);
            }

            let stats = self.domain_stats.entry(domain).or_default();
            stats.sites += 1;
            if hit.sets_cookies {
                stats.cookie_sites += 1;
            }
            stats.fingerprint_scores.push(hit.max_fingerprint);
            for initiator in hit.initiators {
                *stats.initiators.entry(initiator).or_insert(0) += 1;
            }

            if let Some(entity) = hit.entity {
                entities.insert(entity);
            }
        }

        for entity in entities {
            *self.entity_sites.entry(entity).or_insert(0) += 1;
        }
    }

    /// Produce the finished snapshot. Prevalence is relative to the number of
    /// sites actually folded.
    pub fn finalize(&self, stats: StatsSnapshot, region_code: Option<&str>) -> CrawlSnapshot {
        let processed = stats.sites;

        let trackers: Vec<TrackerRecord> = self
            .trackers
            .iter()
            .map(|(domain, record)| {
                let mut record = record.clone();
                if let Some(domain_stats) = self.domain_stats.get(domain) {
                    record.finalize(domain_stats, processed);
                }
                if let Some(code) = region_code {
                    record.add_region(code);
                }
                record
            })
            .collect();

        let entities = self
            .entity_sites
            .iter()
            .map(|(name, count)| self.entity_record(name, *count, processed))
            .collect();

        CrawlSnapshot {
            trackers,
            entities,
            stats,
        }
    }

    fn entity_record(&self, name: &str, count: usize, processed: usize) -> EntityRecord {
        let mut properties: Vec<String> = self
            .reference
            .entity_map
            .iter()
            .filter(|(_, entity)| entity.name == name)
            .map(|(domain, _)| domain.clone())
            .collect();
        properties.sort();

        let display_name = self
            .reference
            .entity_map
            .get(properties.first().map(String::as_str).unwrap_or_default())
            .map(|entity| entity.display_name().to_string())
            .unwrap_or_else(|| name.to_string());

        let prevalence = if processed == 0 {
            0.0
        } else {
            to_precision(count as f64 / processed as f64, 3)
        };

        EntityRecord {
            name: name.to_string(),
            display_name,
            properties,
            prevalence,
        }
    }
}

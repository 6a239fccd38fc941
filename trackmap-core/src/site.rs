// One crawled site: classification of its requests and its contribution to the aggregate

use crate::classify::{ClassifiedRequest, Initiator, classify_request};
use crate::cname::{ResourceRule, merge_cnames, rule_pattern};
use crate::cookies::{JsCookie, parse_cookie_string};
use crate::domain::{DomainParser, ParsedUrl};
use crate::error::DomainError;
use crate::reference::ReferenceData;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use trackmap_source::{RawRequest, RawSite};

const COOKIE_SETTER_CALL: &str = "Document.cookie setter";

#[derive(Debug, Clone)]
pub struct Site {
    pub initial_url: String,
    pub url: ParsedUrl,
    /// Registrable domain, or the full host for IP sites.
    pub domain: String,
    /// First-party cookies written by third-party scripts.
    pub third_party_js_cookies: Vec<JsCookie>,
}

impl Site {
    /// Build the site context from a record that has an initial URL.
    pub fn new(raw: &RawSite, parser: &DomainParser) -> Result<Self, DomainError> {
        let initial_url = raw.initial_url.clone().unwrap_or_default();
        let url = parser.parse(&initial_url)?;
        let domain = url.domain().to_string();

        let third_party_js_cookies = raw
            .apis()
            .map(|apis| {
                apis.saved_calls
                    .iter()
                    .filter(|call| call.description == COOKIE_SETTER_CALL)
                    .filter(|call| {
                        parser
                            .parse(&call.source)
                            .is_ok_and(|source| source.domain() != domain)
                    })
                    .filter_map(|call| {
                        let cookie = call.arguments.first()?.as_str()?;
                        parse_cookie_string(cookie, url.hostname(), &call.source)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            initial_url,
            url,
            domain,
            third_party_js_cookies,
        })
    }

    /// Classify every request in capture order.
    pub fn classify(
        &self,
        raw: &RawSite,
        requests: &[RawRequest],
        parser: &DomainParser,
        reference: &ReferenceData,
    ) -> Result<Vec<ClassifiedRequest>, DomainError> {
        requests
            .iter()
            .map(|request| classify_request(request, self, raw.apis(), parser, reference))
            .collect()
    }

    /// Reduce classified requests to what this site adds to each third-party
    /// tracker domain.
    pub fn contribution(&self, requests: &[ClassifiedRequest]) -> SiteContribution {
        let mut trackers: BTreeMap<String, TrackerHit> = BTreeMap::new();

        for request in requests {
            let Some(tracker_domain) = request.tracker_domain() else {
                continue;
            };
            if tracker_domain == self.domain {
                continue;
            }

            let hit = trackers
                .entry(tracker_domain.to_string())
                .or_insert_with(|| TrackerHit {
                    entity: request.owner.as_ref().map(|o| o.name.clone()),
                    ..TrackerHit::default()
                });

            hit.sets_cookies |= request.sets_cookies;
            hit.max_fingerprint = hit.max_fingerprint.max(request.fingerprint_score);
            if let Initiator::Domain(initiator) = &request.initiator {
                hit.initiators.insert(initiator.clone());
            }
            *hit.types.entry(request.request_type.clone()).or_insert(0) += 1;

            let pattern = rule_pattern(tracker_domain, request.path().unwrap_or_default());
            let rule = hit.rules.entry(pattern.clone()).or_insert_with(|| {
                let mut rule = ResourceRule::new(pattern);
                rule.sites = 1;
                rule.add_example_site(&self.domain);
                rule
            });

            if let Some(subdomain) = request.tracker_subdomain()
                && !subdomain.is_empty()
            {
                rule.subdomains.insert(subdomain.to_string());
            }
            if let Some(cname) = &request.cname {
                merge_cnames(&mut rule.cnames, std::slice::from_ref(cname));
                rule.nameservers.extend(cname.nameservers.iter().cloned());
            }
            rule.types.insert(request.request_type.clone());
            rule.fingerprinting = rule.fingerprinting.max(request.fingerprint_score);
            rule.cookies |= request.sets_cookies;
            rule.first_party_cookies
                .extend(request.first_party_cookies.iter().map(|c| c.name.clone()));
            rule.first_party_cookies_sent
                .extend(request.first_party_cookies_sent.iter().map(|c| c.name.clone()));
        }

        debug!(
            "Site {} contributes to {} tracker domains",
            self.domain,
            trackers.len()
        );

        SiteContribution {
            site_domain: self.domain.clone(),
            trackers,
        }
    }
}

/// Everything one site adds to the aggregate. Built without touching shared
/// state, folded into the aggregator in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteContribution {
    pub site_domain: String,
    pub trackers: BTreeMap<String, TrackerHit>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerHit {
    pub entity: Option<String>,
    pub sets_cookies: bool,
    pub max_fingerprint: f64,
    pub initiators: BTreeSet<String>,
    pub types: BTreeMap<String, u64>,
    pub rules: BTreeMap<String, ResourceRule>,
}

// Per-request classification: cookies, fingerprinting, initiator

use crate::cname::{self, CnameEntry};
use crate::cookies::{COOKIE_LENGTH_CUTOFF, JsCookie, is_cookie_value_in_url, is_first_party_cookie};
use crate::domain::{DomainParser, ParsedUrl};
use crate::error::DomainError;
use crate::reference::{Entity, ReferenceData};
use crate::site::Site;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::warn;
use trackmap_source::{RawApis, RawRequest};

pub const FIRST_PARTY: &str = "first party";

const COOKIE_SETTER_APIS: [&str; 2] = ["Document.cookie setter", "CookieStore.prototype.set"];

/// Party on whose behalf a request was made.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Initiator {
    FirstParty,
    Domain(String),
}

impl Initiator {
    pub fn as_str(&self) -> &str {
        match self {
            Initiator::FirstParty => FIRST_PARTY,
            Initiator::Domain(domain) => domain,
        }
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRequest {
    pub url: String,
    /// `None` when the URL carried no network host.
    pub parsed: Option<ParsedUrl>,
    pub request_type: String,
    pub response_hash: Option<String>,
    pub apis: BTreeMap<String, u64>,
    pub owner: Option<Entity>,
    pub sets_cookies: bool,
    pub fingerprint_score: f64,
    pub first_party_cookies: Vec<JsCookie>,
    pub first_party_cookies_sent: Vec<JsCookie>,
    pub initiator: Initiator,
    /// Set when the host was CNAME-cloaked.
    pub cname: Option<CnameEntry>,
    tracker_domain: Option<String>,
    tracker_subdomain: Option<String>,
}

impl ClassifiedRequest {
    /// Registrable domain the request is attributed to: the CNAME target's
    /// domain for cloaked hosts, the request host's domain otherwise.
    pub fn tracker_domain(&self) -> Option<&str> {
        self.tracker_domain.as_deref()
    }

    pub fn tracker_subdomain(&self) -> Option<&str> {
        self.tracker_subdomain.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.parsed.as_ref().map(|p| p.domain())
    }

    pub fn path(&self) -> Option<&str> {
        self.parsed.as_ref().map(|p| p.path.as_str())
    }

    pub fn was_cname(&self) -> bool {
        self.cname.is_some()
    }
}

/// Weighted sum over every distinct API the URL invoked. Unlisted APIs
/// weigh 1; no APIs scores 0.
pub fn fingerprint_score<'a>(apis: impl IntoIterator<Item = &'a String>, reference: &ReferenceData) -> f64 {
    apis.into_iter().map(|api| reference.abuse_score(api)).sum()
}

pub fn sets_cookies(apis: &BTreeMap<String, u64>, headers: Option<&HashMap<String, String>>) -> bool {
    let api_write = COOKIE_SETTER_APIS
        .iter()
        .any(|api| apis.get(*api).is_some_and(|count| *count > 0));
    let header_write = headers
        .is_some_and(|h| h.keys().any(|k| k.eq_ignore_ascii_case("set-cookie")));
    api_write || header_write
}

/// Pick the party responsible for a request.
///
/// First-party requests report `FirstParty`. For third-party requests the
/// first initiator that belongs neither to the request's own domain nor to
/// the site wins; without one the site itself is reported. IP hosts carry
/// their full host as domain, so they compare by host.
pub fn resolve_initiator(
    parser: &DomainParser,
    site_domain: &str,
    request_domain: Option<&str>,
    initiators: &[String],
) -> Initiator {
    if request_domain == Some(site_domain) {
        return Initiator::FirstParty;
    }

    initiators
        .iter()
        .filter_map(|init| parser.parse(init).ok())
        .map(|parsed| parsed.info.domain)
        .find(|domain| Some(domain.as_str()) != request_domain && domain != site_domain)
        .map(Initiator::Domain)
        .unwrap_or_else(|| Initiator::Domain(site_domain.to_string()))
}

/// Classify one captured request in the context of its site.
///
/// Requests with non-network schemes are kept with an empty domain and no
/// API activity. A malformed URL is an error for the whole site.
pub fn classify_request(
    raw: &RawRequest,
    site: &Site,
    apis: Option<&RawApis>,
    parser: &DomainParser,
    reference: &ReferenceData,
) -> Result<ClassifiedRequest, DomainError> {
    let parsed = match parser.parse(&raw.url) {
        Ok(parsed) => Some(parsed),
        Err(DomainError::InvalidUrlProtocol(url)) => {
            warn!("Invalid URL protocol encountered: {}. SKIPPING", url);
            None
        }
        Err(e) => return Err(e),
    };

    let api_calls: BTreeMap<String, u64> = match (&parsed, apis) {
        (Some(_), Some(apis)) => apis
            .call_stats
            .get(&raw.url)
            .map(|calls| calls.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default(),
        _ => BTreeMap::new(),
    };

    let cloaked = parsed
        .as_ref()
        .and_then(|p| cname::canonicalize(parser, p, &raw.cname_chain, &raw.nameservers));

    let (tracker_domain, tracker_subdomain) = match (&cloaked, &parsed) {
        (Some(cloaked), _) => (
            Some(cloaked.target.domain.clone()),
            Some(cloaked.target.subdomain.clone()),
        ),
        (None, Some(parsed)) => (
            Some(parsed.domain().to_string()),
            Some(parsed.subdomain().to_string()),
        ),
        (None, None) => (None, None),
    };

    let owner = tracker_domain
        .as_deref()
        .and_then(|d| reference.entity_for(d))
        .cloned();

    let first_party_cookies = site
        .third_party_js_cookies
        .iter()
        .filter(|cookie| {
            cookie.source == raw.url
                && !cookie.value.is_empty()
                && is_first_party_cookie(parser, &cookie.domain, &site.domain)
        })
        .cloned()
        .collect();

    let first_party_cookies_sent = site
        .third_party_js_cookies
        .iter()
        .filter(|cookie| {
            cookie.value.len() > COOKIE_LENGTH_CUTOFF && is_cookie_value_in_url(cookie, &raw.url)
        })
        .cloned()
        .collect();

    let initiator = resolve_initiator(
        parser,
        &site.domain,
        parsed.as_ref().map(|p| p.domain()),
        &raw.initiators,
    );

    Ok(ClassifiedRequest {
        url: raw.url.clone(),
        request_type: raw.request_type.clone(),
        response_hash: raw.response_body_hash.clone(),
        sets_cookies: sets_cookies(&api_calls, raw.response_headers.as_ref()),
        fingerprint_score: fingerprint_score(api_calls.keys(), reference),
        apis: api_calls,
        owner,
        first_party_cookies,
        first_party_cookies_sent,
        initiator,
        cname: cloaked.map(|c| c.entry),
        tracker_domain,
        tracker_subdomain,
        parsed,
    })
}

//! URL and hostname decomposition.
//!
//! Registrable domains come from Mozilla's Public Suffix List via the `psl`
//! crate. A supplementary list of private suffixes can override the list for
//! registries that hand out deep private subdomains, so that tracker
//! attribution is not fragmented across those subdomains.

use crate::error::{DomainError, ReferenceError};
use psl::{List, Psl, Type};
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};
use url::{Host, Url};

const SUPPORTED_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// Suffix classification of a single hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    pub hostname: String,
    /// Registrable domain, or the literal host for IP addresses.
    pub domain: String,
    pub subdomain: String,
    pub public_suffix: String,
    pub is_ip: bool,
    pub is_private: bool,
}

/// A URL decomposed into the parts trackers are keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub url: String,
    pub scheme: String,
    pub info: DomainInfo,
    /// Path with matrix parameters (`;jsessionid=...`) stripped.
    pub path: String,
}

impl ParsedUrl {
    pub fn hostname(&self) -> &str {
        &self.info.hostname
    }

    pub fn domain(&self) -> &str {
        &self.info.domain
    }

    pub fn subdomain(&self) -> &str {
        &self.info.subdomain
    }

    pub fn is_ip(&self) -> bool {
        self.info.is_ip
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PslExtras {
    #[serde(default, rename = "privatePSL")]
    private_psl: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainParser {
    private_suffixes: Vec<String>,
}

impl DomainParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_private_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let private_suffixes = suffixes
            .into_iter()
            .map(|s| s.into().trim_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { private_suffixes }
    }

    /// Load the private suffix override file (`{"privatePSL": [...]}`).
    /// A missing file means no overrides.
    pub fn from_extras_file(path: &Path) -> Result<Self, ReferenceError> {
        if !path.exists() {
            warn!("PSL extras file {} not found, using the public list only", path.display());
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).map_err(|e| ReferenceError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let extras: PslExtras =
            serde_json::from_str(&content).map_err(|e| ReferenceError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!("Loaded {} private suffix overrides", extras.private_psl.len());
        Ok(Self::with_private_suffixes(extras.private_psl))
    }

    pub fn private_suffixes(&self) -> &[String] {
        &self.private_suffixes
    }

    /// Parse a URL. `blob:` URLs are unwrapped first; anything that is not
    /// an http(s)/ws(s) URL fails with `InvalidUrlProtocol`.
    pub fn parse(&self, raw: &str) -> Result<ParsedUrl, DomainError> {
        let unwrapped = raw.strip_prefix("blob:").unwrap_or(raw);

        let url = Url::parse(unwrapped).map_err(|e| DomainError::MalformedUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(DomainError::InvalidUrlProtocol(raw.to_string()));
        }

        let info = match url.host() {
            Some(Host::Domain(host)) => self.classify_host(host),
            Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {
                ip_info(url.host_str().unwrap_or_default())
            }
            None => {
                return Err(DomainError::MalformedUrl {
                    url: raw.to_string(),
                    reason: "missing host".to_string(),
                });
            }
        };

        let path = url.path().split(';').next().unwrap_or_default().to_string();

        Ok(ParsedUrl {
            url: unwrapped.to_string(),
            scheme: url.scheme().to_string(),
            info,
            path,
        })
    }

    /// Classify a bare hostname (cookie domains, CNAME targets).
    pub fn parse_host(&self, host: &str) -> DomainInfo {
        let host = host.trim_start_matches('.').to_lowercase();
        if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return ip_info(&host);
        }
        self.classify_host(&host)
    }

    fn classify_host(&self, host: &str) -> DomainInfo {
        let hostname = host.trim_end_matches('.').to_lowercase();

        let (domain, public_suffix, is_private) = match List.domain(hostname.as_bytes()) {
            Some(domain) => {
                let suffix = domain.suffix();
                (
                    String::from_utf8_lossy(domain.as_bytes()).into_owned(),
                    String::from_utf8_lossy(suffix.as_bytes()).into_owned(),
                    suffix.typ() == Some(Type::Private),
                )
            }
            None => {
                // The host is itself a suffix (or a single unknown label).
                (hostname.clone(), hostname.clone(), false)
            }
        };

        let mut info = DomainInfo {
            subdomain: strip_domain(&hostname, &domain),
            hostname,
            domain,
            public_suffix,
            is_ip: false,
            is_private,
        };

        if !info.is_private {
            self.apply_private_override(&mut info);
        }

        info
    }

    fn apply_private_override(&self, info: &mut DomainInfo) {
        let hostname = info.hostname.as_str();
        let Some(suffix) = self
            .private_suffixes
            .iter()
            .filter(|s| hostname == s.as_str() || hostname.ends_with(&format!(".{}", s)))
            .max_by_key(|s| s.len())
        else {
            return;
        };

        let rest = hostname[..hostname.len() - suffix.len()].trim_end_matches('.');
        let mut labels: Vec<&str> = rest.split('.').filter(|l| !l.is_empty()).collect();
        let label = labels.pop();

        info.domain = match label {
            Some(label) => format!("{}.{}", label, suffix),
            None => suffix.clone(),
        };
        info.subdomain = labels.join(".");
        info.public_suffix = suffix.clone();
        info.is_private = true;
    }
}

fn ip_info(host: &str) -> DomainInfo {
    DomainInfo {
        hostname: host.to_string(),
        domain: host.to_string(),
        subdomain: String::new(),
        public_suffix: String::new(),
        is_ip: true,
        is_private: false,
    }
}

fn strip_domain(hostname: &str, domain: &str) -> String {
    hostname
        .strip_suffix(domain)
        .map(|rest| rest.trim_end_matches('.').to_string())
        .unwrap_or_default()
}

// Cookies observed through `document.cookie` writes

use crate::domain::DomainParser;
use cookie::{Cookie, ParseError};
use serde::Serialize;
use tracing::debug;

/// Minimum value length (exclusive) before a cookie value is searched for in
/// request URLs. Shorter values match too many unrelated tokens.
pub const COOKIE_LENGTH_CUTOFF: usize = 5;

/// Placeholder name used to parse nameless writes such as
/// `document.cookie = "uid"`.
const NAMELESS: &str = "nameless";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    /// Script URL that performed the write.
    pub source: String,
}

/// Parse a `document.cookie` assignment such as
/// `uid=abc123; path=/; domain=.example.com`. The cookie domain falls back to
/// `default_domain` when no `domain` attribute is given. A write without a
/// `name=` pair is kept as a nameless cookie holding the whole first segment.
pub fn parse_cookie_string(cookie: &str, default_domain: &str, source: &str) -> Option<JsCookie> {
    if cookie.trim().is_empty() {
        return None;
    }

    let (parsed, nameless) = match Cookie::parse(cookie) {
        Ok(parsed) => (parsed.into_owned(), false),
        Err(ParseError::MissingPair) => {
            let parsed = Cookie::parse(format!("{}={}", NAMELESS, cookie)).ok()?;
            (parsed.into_owned(), true)
        }
        Err(e) => {
            debug!("Ignoring cookie write {:?} from {}: {}", cookie, source, e);
            return None;
        }
    };

    let domain = parsed
        .domain()
        .map(|d| d.trim_start_matches('.').to_lowercase())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| default_domain.to_string());

    Some(JsCookie {
        name: if nameless {
            String::new()
        } else {
            parsed.name().to_string()
        },
        value: parsed.value().to_string(),
        domain,
        source: source.to_string(),
    })
}

/// A cookie is first party when its domain belongs to the site's
/// registrable domain.
pub fn is_first_party_cookie(parser: &DomainParser, cookie_domain: &str, site_domain: &str) -> bool {
    !cookie_domain.is_empty() && parser.parse_host(cookie_domain).domain == site_domain
}

pub fn is_cookie_value_in_url(cookie: &JsCookie, url: &str) -> bool {
    !cookie.value.is_empty() && url.contains(&cookie.value)
}

// Tests for URL parsing, private suffix overrides and reference lookups

use std::collections::{BTreeMap, HashMap};
use std::fs;
use tempfile::TempDir;
use trackmap_core::error::{DomainError, ReferenceError};
use trackmap_core::reference::{Entity, PolicyEntry, ReferenceData};
use trackmap_core::resolve::{resolve_categories, resolve_entity, resolve_policy};
use trackmap_core::DomainParser;

fn entities(pairs: &[(&str, &str)]) -> HashMap<String, Entity> {
    pairs
        .iter()
        .map(|(domain, name)| (domain.to_string(), Entity::new(name)))
        .collect()
}

// ============================================================================
// Domain Parser Tests
// ============================================================================

#[test]
fn test_parse_basic_url() {
    let parser = DomainParser::new();
    let parsed = parser.parse("https://cdn.static.tracker.com/js/t.js?x=1").unwrap();

    assert_eq!(parsed.hostname(), "cdn.static.tracker.com");
    assert_eq!(parsed.domain(), "tracker.com");
    assert_eq!(parsed.subdomain(), "cdn.static");
    assert_eq!(parsed.path, "/js/t.js");
    assert!(!parsed.is_ip());
}

#[test]
fn test_parse_rejects_non_network_schemes() {
    let parser = DomainParser::new();

    for url in ["javascript:void(0)", "data:text/plain,hi", "about:blank", "chrome-extension://abc/x.js"] {
        match parser.parse(url) {
            Err(DomainError::InvalidUrlProtocol(u)) => assert_eq!(u, url),
            other => panic!("expected InvalidUrlProtocol for {}, got {:?}", url, other),
        }
    }
}

#[test]
fn test_parse_host_trims_leading_dot() {
    let parser = DomainParser::new();
    let info = parser.parse_host(".Ads.Tracker.com");
    assert_eq!(info.hostname, "ads.tracker.com");
    assert_eq!(info.domain, "tracker.com");
}

// ============================================================================
// Private Suffix Override Tests
// ============================================================================

#[test]
fn test_private_suffix_override_changes_registrable_domain() {
    let public = DomainParser::new();
    let overridden = DomainParser::with_private_suffixes(["edge.cdnhost.net"]);
    let url = "https://customer42.edge.cdnhost.net/asset.js";

    assert_eq!(public.parse(url).unwrap().domain(), "cdnhost.net");

    let parsed = overridden.parse(url).unwrap();
    assert_eq!(parsed.domain(), "customer42.edge.cdnhost.net");
    assert_eq!(parsed.info.public_suffix, "edge.cdnhost.net");
    assert_eq!(parsed.subdomain(), "");
    assert!(parsed.info.is_private);
}

#[test]
fn test_extras_file_loading() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("psl_extras.json");
    fs::write(&path, r#"{"privatePSL": ["edge.cdnhost.net"]}"#).unwrap();

    let parser = DomainParser::from_extras_file(&path).unwrap();
    assert_eq!(parser.private_suffixes(), &["edge.cdnhost.net".to_string()]);
}

#[test]
fn test_extras_file_missing_means_no_overrides() {
    let temp_dir = TempDir::new().unwrap();
    let parser = DomainParser::from_extras_file(&temp_dir.path().join("absent.json")).unwrap();
    assert!(parser.private_suffixes().is_empty());
}

#[test]
fn test_extras_file_malformed_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("psl_extras.json");
    fs::write(&path, "{ not json").unwrap();

    let result = DomainParser::from_extras_file(&path);
    assert!(matches!(result, Err(ReferenceError::Parse { .. })));
}

// ============================================================================
// Domain Resolver Tests
// ============================================================================

#[test]
fn test_resolve_entity_exact_match() {
    let map = entities(&[("tracker.com", "Tracker Inc")]);
    assert_eq!(resolve_entity(&map, "tracker.com").unwrap().name, "Tracker Inc");
}

#[test]
fn test_resolve_entity_prefers_closest_ancestor() {
    let map = entities(&[("example.com", "Example Corp"), ("evil.example.com", "Evil Ads")]);

    assert_eq!(
        resolve_entity(&map, "sub.evil.example.com").unwrap().name,
        "Evil Ads"
    );
    assert_eq!(
        resolve_entity(&map, "good.example.com").unwrap().name,
        "Example Corp"
    );
}

#[test]
fn test_resolve_entity_exhausts_labels() {
    let map = entities(&[("tracker.com", "Tracker Inc")]);

    assert!(resolve_entity(&map, "a.b.c.d.unknown.org").is_none());
    assert!(resolve_entity(&map, "").is_none());
    assert!(resolve_entity(&map, "com").is_none());
}

#[test]
fn test_resolve_categories_walks_up_and_drops_falsy() {
    let mut tags = BTreeMap::new();
    tags.insert("Advertising".to_string(), serde_json::json!(1));
    tags.insert("Analytics".to_string(), serde_json::json!(0));
    tags.insert("Ad Motivated Tracking".to_string(), serde_json::json!(true));
    let mut categories = HashMap::new();
    categories.insert("tracker.com".to_string(), tags);

    let resolved = resolve_categories(&categories, "pixel.tracker.com");
    assert_eq!(resolved, vec!["Ad Motivated Tracking", "Advertising"]);
    assert!(resolve_categories(&categories, "other.com").is_empty());
}

#[test]
fn test_resolve_policy_domain_then_owner() {
    let mut policies = HashMap::new();
    policies.insert(
        "tracker.com".to_string(),
        PolicyEntry { privacy_policy: "https://tracker.com/privacy".to_string() },
    );
    policies.insert(
        "Tracker Inc".to_string(),
        PolicyEntry { privacy_policy: "https://www.trackerinc.com/policy".to_string() },
    );

    assert_eq!(
        resolve_policy(&policies, "tracker.com", Some("Tracker Inc")),
        Some("https://tracker.com/privacy")
    );
    assert_eq!(
        resolve_policy(&policies, "tracker-cdn.net", Some("Tracker Inc")),
        Some("https://www.trackerinc.com/policy")
    );
    // no walk up the chain for policies
    assert_eq!(resolve_policy(&policies, "sub.tracker.com", None), None);
}

// ============================================================================
// Reference Loader Tests
// ============================================================================

#[test]
fn test_reference_load_requires_entity_map() {
    let temp_dir = TempDir::new().unwrap();
    let result = ReferenceData::load(temp_dir.path());
    assert!(matches!(result, Err(ReferenceError::Missing(_))));
}

#[test]
fn test_reference_load_optional_tables_default_empty() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("entity_map.json"),
        r#"{"tracker.com": {"name": "Tracker Inc", "displayName": "Tracker"}}"#,
    )
    .unwrap();

    let data = ReferenceData::load(temp_dir.path()).unwrap();
    assert_eq!(data.entity_map.len(), 1);
    assert_eq!(data.entity_for("tracker.com").unwrap().display_name(), "Tracker");
    assert!(data.categories.is_empty());
    assert!(data.surrogates.is_empty());
    assert_eq!(data.abuse_score("Navigator.prototype.userAgent"), 1.0);
}

#[test]
fn test_reference_load_rejects_malformed_table() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("entity_map.json"), "{}").unwrap();
    fs::write(temp_dir.path().join("abuse_scores.json"), "[1, 2").unwrap();

    let result = ReferenceData::load(temp_dir.path());
    assert!(matches!(result, Err(ReferenceError::Parse { .. })));
}

// Tests for the crawl pipeline, configuration and export

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trackmap_core::config::SQLITE_SENTINEL;
use trackmap_core::error::{ConfigError, PipelineError};
use trackmap_core::export::{SUMMARY_FILE, summary_text, write_snapshot};
use trackmap_core::reference::{Entity, ReferenceData};
use trackmap_core::{Config, CrawlPipeline, DataLocation, DomainParser, SiteOutcome};
use trackmap_source::error::Result as SourceResult;
use trackmap_source::source::SiteIter;
use trackmap_source::{JsonFileSource, RawApis, RawRequest, RawSite, RawSiteData, SiteSource, SourceError};

/// In-memory source. Yields an error after `fail_after` records when set.
struct VecSource {
    sites: Vec<RawSite>,
    fail_after: Option<usize>,
    closed: Arc<AtomicBool>,
    pulled: Arc<AtomicUsize>,
}

impl VecSource {
    fn new(sites: Vec<RawSite>) -> Self {
        Self {
            sites,
            fail_after: None,
            closed: Arc::new(AtomicBool::new(false)),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SiteSource for VecSource {
    fn len(&self) -> SourceResult<usize> {
        Ok(self.sites.len())
    }

    fn sites(&mut self) -> SourceResult<SiteIter<'_>> {
        let fail_after = self.fail_after;
        let pulled = self.pulled.clone();
        Ok(Box::new(self.sites.iter().cloned().enumerate().map(
            move |(i, site)| {
                pulled.fetch_add(1, Ordering::SeqCst);
                match fail_after {
                    Some(n) if i >= n => Err(SourceError::NotFound(format!("record {}", i))),
                    _ => Ok(site),
                }
            },
        )))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn reference() -> Arc<ReferenceData> {
    let mut data = ReferenceData::default();
    data.entity_map
        .insert("tracker.com".to_string(), Entity::new("Tracker Inc"));
    data.entity_map
        .insert("adnet.net".to_string(), Entity::new("AdNet LLC"));
    data.abuse_scores
        .insert("HTMLCanvasElement.prototype.toDataURL".to_string(), 90.0);
    Arc::new(data)
}

fn pipeline() -> CrawlPipeline {
    CrawlPipeline::new(Arc::new(DomainParser::new()), reference())
}

fn site(n: usize) -> RawSite {
    let site_url = format!("https://www.site{}.com/", n);
    let script = "https://cdn.tracker.com/t.js".to_string();
    let mut requests = vec![
        RawRequest::new(site_url.clone(), "Document"),
        RawRequest::new(script.clone(), "Script"),
    ];
    if n % 2 == 0 {
        let mut pixel = RawRequest::new(format!("https://px.adnet.net/p.gif?s={}", n), "Image");
        pixel.initiators = vec![script.clone()];
        requests.push(pixel);
    }
    if n % 3 == 0 {
        let mut cloaked = RawRequest::new(format!("https://metrics.site{}.com/c", n), "XHR");
        cloaked.cname_chain = vec![format!("site{}.com.edge.tracker.com", n)];
        requests.push(cloaked);
    }

    let mut apis = RawApis::default();
    if n % 4 == 0 {
        apis.call_stats.insert(
            script,
            [("HTMLCanvasElement.prototype.toDataURL".to_string(), 1)]
                .into_iter()
                .collect(),
        );
    }

    RawSite {
        initial_url: Some(site_url.clone()),
        final_url: Some(site_url),
        data: Some(RawSiteData {
            requests: Some(requests),
            apis,
        }),
    }
}

fn failed_crawl(initial_url: Option<&str>) -> RawSite {
    RawSite {
        initial_url: initial_url.map(str::to_string),
        final_url: None,
        data: None,
    }
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_folds_sites() {
    let sites: Vec<RawSite> = (1..=6).map(site).collect();
    let snapshot = pipeline().run(VecSource::new(sites)).await.unwrap();

    assert_eq!(snapshot.stats.total_sites, 6);
    assert_eq!(snapshot.stats.sites, 6);
    assert_eq!(snapshot.stats.sites_skipped, 0);

    let tracker = snapshot.tracker("tracker.com").unwrap();
    assert_eq!(tracker.prevalence, 1.0);
    assert_eq!(tracker.sites, 6);
    let origins: Vec<&str> = tracker.cnames.iter().map(|c| c.original.as_str()).collect();
    assert_eq!(origins, vec!["metrics.site3.com", "metrics.site6.com"]);

    let adnet = snapshot.tracker("adnet.net").unwrap();
    assert_eq!(adnet.prevalence, 0.5);
    assert_eq!(adnet.top_initiators[0].domain, "tracker.com");

    assert!(snapshot.tracker("site1.com").is_none());
}

#[tokio::test]
async fn test_pipeline_result_independent_of_parallelism() {
    let sites: Vec<RawSite> = (1..=12).map(site).collect();

    let baseline = pipeline()
        .with_parallelism(1)
        .run(VecSource::new(sites.clone()))
        .await
        .unwrap();

    for parallelism in [2, 3, 5, 12] {
        let snapshot = pipeline()
            .with_parallelism(parallelism)
            .run(VecSource::new(sites.clone()))
            .await
            .unwrap();
        assert_eq!(snapshot, baseline, "parallelism {} diverged", parallelism);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_multi_thread_matches_single() {
    let sites: Vec<RawSite> = (1..=20).map(site).collect();

    let sequential = pipeline()
        .with_parallelism(1)
        .run(VecSource::new(sites.clone()))
        .await
        .unwrap();
    let parallel = pipeline()
        .with_parallelism(8)
        .run(VecSource::new(sites))
        .await
        .unwrap();

    assert_eq!(sequential, parallel);
}

/// Every site requests the same cloaked host, but the chain ends on a
/// different edge node each time.
fn load_balanced_site(n: usize) -> RawSite {
    let site_url = format!("https://www.site{}.com/", n);
    let mut cloaked = RawRequest::new("https://metrics.shop.com/c", "XHR");
    cloaked.cname_chain = vec![format!("edge{}.tracker.com", n)];

    RawSite {
        initial_url: Some(site_url.clone()),
        final_url: Some(site_url),
        data: Some(RawSiteData {
            requests: Some(vec![cloaked]),
            ..RawSiteData::default()
        }),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_shared_cname_origin_keeps_first_site_in_stream() {
    let sites: Vec<RawSite> = (1..=16).map(load_balanced_site).collect();

    let sequential = pipeline()
        .with_parallelism(1)
        .run(VecSource::new(sites.clone()))
        .await
        .unwrap();
    let cnames = &sequential.tracker("tracker.com").unwrap().cnames;
    assert_eq!(cnames.len(), 1);
    assert_eq!(cnames[0].original, "metrics.shop.com");
    assert_eq!(cnames[0].resolved, "edge1.tracker.com");

    for parallelism in [4, 16] {
        let snapshot = pipeline()
            .with_parallelism(parallelism)
            .run(VecSource::new(sites.clone()))
            .await
            .unwrap();
        assert_eq!(snapshot, sequential, "parallelism {} diverged", parallelism);
    }
}

#[tokio::test]
async fn test_pipeline_ip_site_folds_third_party_trackers() {
    let site_url = "http://192.168.0.10:8080/".to_string();
    let mut pixel = RawRequest::new("https://px.adnet.net/p.gif", "Image");
    pixel.initiators = vec!["https://cdn.tracker.com/t.js".to_string()];
    let raw = RawSite {
        initial_url: Some(site_url.clone()),
        final_url: Some(site_url.clone()),
        data: Some(RawSiteData {
            requests: Some(vec![
                RawRequest::new(site_url.clone(), "Document"),
                RawRequest::new("http://192.168.0.10:8080/app.js", "Script"),
                RawRequest::new("https://cdn.tracker.com/t.js", "Script"),
                pixel,
            ]),
            ..RawSiteData::default()
        }),
    };

    let snapshot = pipeline().run(VecSource::new(vec![raw])).await.unwrap();

    assert_eq!(snapshot.stats.sites, 1);
    assert_eq!(snapshot.trackers.len(), 2);
    assert!(snapshot.tracker("192.168.0.10").is_none());
    assert_eq!(snapshot.tracker("tracker.com").unwrap().prevalence, 1.0);

    let adnet = snapshot.tracker("adnet.net").unwrap();
    assert_eq!(adnet.top_initiators[0].domain, "tracker.com");
}

#[tokio::test]
async fn test_pipeline_skips_sites_without_data() {
    let sites = vec![
        failed_crawl(None),
        site(1),
        failed_crawl(Some("https://timeout.com/")),
    ];

    let baseline = pipeline().run(VecSource::new(vec![site(1)])).await.unwrap();
    let snapshot = pipeline().run(VecSource::new(sites)).await.unwrap();

    assert_eq!(snapshot.stats.sites_skipped, 2);
    assert_eq!(snapshot.stats.sites, 1);
    assert_eq!(snapshot.stats.requests, baseline.stats.requests);
    assert_eq!(snapshot.trackers, baseline.trackers);
}

#[tokio::test]
async fn test_pipeline_null_initial_url_with_requests_is_skipped() {
    let mut raw = site(2);
    raw.initial_url = None;

    let snapshot = pipeline().run(VecSource::new(vec![raw])).await.unwrap();
    assert_eq!(snapshot.stats.sites_skipped, 1);
    assert_eq!(snapshot.stats.requests, 0);
    assert!(snapshot.trackers.is_empty());
}

#[tokio::test]
async fn test_pipeline_isolates_failing_site() {
    let mut broken = site(5);
    if let Some(data) = broken.data.as_mut() {
        data.requests
            .get_or_insert_with(Vec::new)
            .push(RawRequest::new("https://", "Script"));
    }
    let sites = vec![site(1), broken, site(2)];

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let recorded = outcomes.clone();
    let snapshot = pipeline()
        .with_parallelism(2)
        .with_progress_callback(Arc::new(move |outcome: &SiteOutcome| {
            recorded.lock().unwrap().push(outcome.clone());
        }))
        .run(VecSource::new(sites))
        .await
        .unwrap();

    assert_eq!(snapshot.stats.sites, 2);
    assert_eq!(snapshot.stats.sites_failed, 1);
    assert_eq!(snapshot.tracker("tracker.com").unwrap().prevalence, 1.0);

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, SiteOutcome::Failed(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_pipeline_javascript_request_counted_as_skipped_request() {
    let mut raw = site(1);
    if let Some(data) = raw.data.as_mut() {
        data.requests
            .get_or_insert_with(Vec::new)
            .insert(0, RawRequest::new("javascript:void(0)", "Other"));
    }

    let snapshot = pipeline().run(VecSource::new(vec![raw])).await.unwrap();
    assert_eq!(snapshot.stats.sites, 1);
    assert_eq!(snapshot.stats.requests, 3);
    assert_eq!(snapshot.stats.requests_skipped, 1);
    assert!(snapshot.tracker("tracker.com").is_some());
}

#[tokio::test]
async fn test_pipeline_source_error_aborts_and_closes() {
    let mut source = VecSource::new((1..=10).map(site).collect());
    source.fail_after = Some(4);
    let closed = source.closed.clone();

    let result = pipeline().with_parallelism(2).run(source).await;

    assert!(matches!(result, Err(PipelineError::SourceRead(_))));
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_pipeline_closes_source_on_success() {
    let source = VecSource::new(vec![site(1)]);
    let closed = source.closed.clone();

    pipeline().run(source).await.unwrap();
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_pipeline_empty_source() {
    let snapshot = pipeline().run(VecSource::new(Vec::new())).await.unwrap();
    assert_eq!(snapshot.stats.total_sites, 0);
    assert!(snapshot.trackers.is_empty());
    assert!(snapshot.entities.is_empty());
}

#[tokio::test]
async fn test_pipeline_progress_callback_sees_every_site() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();

    pipeline()
        .with_parallelism(3)
        .with_progress_callback(Arc::new(move |_: &SiteOutcome| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .run(VecSource::new((1..=7).map(site).collect()))
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_reader_waits_while_window_is_full() {
    let source = VecSource::new((1..=30).map(site).collect());
    let pulled = source.pulled.clone();
    let settled = Arc::new(AtomicUsize::new(0));
    let furthest_ahead = Arc::new(AtomicUsize::new(0));

    let (seen, ahead) = (settled.clone(), furthest_ahead.clone());
    let parallelism = 2;
    pipeline()
        .with_parallelism(parallelism)
        .with_progress_callback(Arc::new(move |_: &SiteOutcome| {
            let done = seen.fetch_add(1, Ordering::SeqCst) + 1;
            let read = pulled.load(Ordering::SeqCst);
            ahead.fetch_max(read.saturating_sub(done), Ordering::SeqCst);
        }))
        .run(source)
        .await
        .unwrap();

    assert_eq!(settled.load(Ordering::SeqCst), 30);
    // Bounded by the window and the single channel slot.
    assert!(furthest_ahead.load(Ordering::SeqCst) <= parallelism + 1);
}

#[tokio::test]
async fn test_pipeline_applies_region_code() {
    let snapshot = pipeline()
        .with_region_code(Some("US".to_string()))
        .run(VecSource::new(vec![site(1)]))
        .await
        .unwrap();

    let tracker = snapshot.tracker("tracker.com").unwrap();
    assert_eq!(tracker.source, vec!["DuckDuckGo-US"]);
}

#[tokio::test]
async fn test_pipeline_reads_json_directory() {
    let temp_dir = TempDir::new().unwrap();
    for n in 1..=3 {
        let path = temp_dir.path().join(format!("site{}.json", n));
        fs::write(&path, serde_json::to_string(&site(n)).unwrap()).unwrap();
    }

    let source = JsonFileSource::open(temp_dir.path()).unwrap();
    let snapshot = pipeline().run(source).await.unwrap();
    assert_eq!(snapshot.stats.sites, 3);
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_config_defaults() {
    let config: Config = serde_json::from_str(r#"{"crawlerDataLoc": "/data/crawl"}"#).unwrap();

    assert_eq!(config.parallelism, 10);
    assert_eq!(config.source_tag, "DuckDuckGo");
    assert!(!config.flags.add_surrogates);
    assert_eq!(
        config.data_location().unwrap(),
        DataLocation::Directory("/data/crawl".into())
    );
}

#[test]
fn test_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "crawlerDataLoc": "sqlite",
            "database": "/tmp/crawls.db",
            "crawlId": "2024-05",
            "regionCode": "US",
            "parallelism": 4,
            "referenceDir": "/ref",
            "flags": {"addSurrogates": true}
        }"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert!(config.validate().is_ok());
    assert!(config.tracker_options().add_surrogates);
    assert_eq!(
        config.data_location().unwrap(),
        DataLocation::Sqlite {
            database: "/tmp/crawls.db".into(),
            crawl_id: "2024-05".to_string(),
            region: Some("US".to_string()),
        }
    );
}

#[test]
fn test_config_validation_errors() {
    let valid = Config {
        crawler_data_loc: Some("/data".to_string()),
        reference_dir: Some("/ref".into()),
        ..Config::default()
    };
    assert!(valid.validate().is_ok());

    let zero = Config {
        parallelism: 0,
        ..valid.clone()
    };
    assert!(matches!(
        zero.validate(),
        Err(ConfigError::Invalid { option: "parallelism", .. })
    ));

    let no_location = Config {
        crawler_data_loc: None,
        ..valid.clone()
    };
    assert_eq!(
        no_location.validate(),
        Err(ConfigError::Missing("crawlerDataLoc"))
    );

    let sqlite_without_crawl = Config {
        crawler_data_loc: Some(SQLITE_SENTINEL.to_string()),
        database: Some("/tmp/x.db".into()),
        ..valid.clone()
    };
    assert_eq!(
        sqlite_without_crawl.validate(),
        Err(ConfigError::Missing("crawlId"))
    );

    let no_reference = Config {
        reference_dir: None,
        ..valid
    };
    assert_eq!(
        no_reference.validate(),
        Err(ConfigError::Missing("referenceDir"))
    );
}

#[test]
fn test_config_open_source_missing_directory() {
    let config = Config {
        crawler_data_loc: Some("/definitely/not/here".to_string()),
        ..Config::default()
    };
    assert!(matches!(
        config.open_source(),
        Err(PipelineError::SourceRead(_))
    ));
}

// ============================================================================
// Export Tests
// ============================================================================

#[tokio::test]
async fn test_export_writes_domain_entity_and_summary_files() {
    let snapshot = pipeline()
        .run(VecSource::new((1..=4).map(site).collect()))
        .await
        .unwrap();
    let temp_dir = TempDir::new().unwrap();

    let report = write_snapshot(&snapshot, temp_dir.path()).unwrap();
    assert_eq!(report.domains, 2);
    assert_eq!(report.entities, 2);

    let tracker: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp_dir.path().join("domains/tracker.com.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(tracker["domain"], "tracker.com");
    assert_eq!(tracker["owner"]["name"], "Tracker Inc");
    assert!(tracker["resources"].is_array());
    assert!(tracker["topInitiators"].is_array());

    assert!(temp_dir.path().join("entities/AdNet LLC.json").exists());

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp_dir.path().join(SUMMARY_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["stats"]["sites"], 4);
    assert!(summary["generatedAt"].is_string());
}

#[test]
fn test_summary_text_lists_counts() {
    colored::control::set_override(false);
    let stats = trackmap_core::StatsSnapshot {
        total_sites: 10,
        sites: 7,
        sites_skipped: 2,
        sites_failed: 1,
        requests: 120,
        requests_skipped: 3,
    };

    let text = summary_text(&stats);
    assert!(text.contains("Processed: 7"));
    assert!(text.contains("Skipped:   2"));
    assert!(text.contains("Failed:    1"));
    assert!(text.contains("Total:     10"));
}

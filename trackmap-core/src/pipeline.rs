//! Crawl pipeline: streams site records from a source, classifies up to
//! `parallelism` sites at once and folds each finished site into the
//! aggregator.
//!
//! The source runs on a blocking thread and hands records over a bounded
//! channel. Admission is a sliding window: once `parallelism` sites are in
//! flight, no record is pulled until one of them completes. Finished sites
//! are folded in source order, so the snapshot does not depend on which site
//! happened to finish first.

use crate::aggregate::{Aggregator, CrawlSnapshot, CrawlStats};
use crate::domain::DomainParser;
use crate::error::Result;
use crate::reference::ReferenceData;
use crate::site::{Site, SiteContribution};
use crate::tracker::TrackerOptions;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use trackmap_source::{RawSite, SiteSource, SourceError};

pub const DEFAULT_PARALLELISM: usize = 10;

/// Terminal state of one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteOutcome {
    /// No initial URL or no captured requests.
    Skipped,
    Folded { requests: usize },
    Failed(String),
}

/// Called once per site as it leaves the window.
pub type SiteProgressCallback = Arc<dyn Fn(&SiteOutcome) + Send + Sync>;

/// Read-only state handed to every site task.
#[derive(Clone)]
struct SiteContext {
    parser: Arc<DomainParser>,
    reference: Arc<ReferenceData>,
    stats: Arc<CrawlStats>,
}

/// What a site task hands back to the orchestrator.
type SiteResult = (SiteOutcome, Option<SiteContribution>);

/// Finished sites waiting for every earlier site in the stream to settle.
///
/// Skipped and failed sites settle with no contribution and only advance
/// the cursor.
#[derive(Debug, Default)]
pub(crate) struct FoldQueue {
    next: usize,
    pending: BTreeMap<usize, Option<SiteContribution>>,
}

impl FoldQueue {
    /// Record site `index` as settled and fold every contribution that is
    /// now contiguous with the cursor.
    pub(crate) fn settle(
        &mut self,
        index: usize,
        contribution: Option<SiteContribution>,
        aggregator: &mut Aggregator,
    ) {
        self.pending.insert(index, contribution);
        while let Some(ready) = self.pending.remove(&self.next) {
            if let Some(contribution) = ready {
                aggregator.fold(contribution);
            }
            self.next += 1;
        }
    }

    pub(crate) fn waiting(&self) -> usize {
        self.pending.len()
    }
}

pub struct CrawlPipeline {
    parser: Arc<DomainParser>,
    reference: Arc<ReferenceData>,
    parallelism: usize,
    region_code: Option<String>,
    tracker_options: TrackerOptions,
    progress_callback: Option<SiteProgressCallback>,
}

impl CrawlPipeline {
    pub fn new(parser: Arc<DomainParser>, reference: Arc<ReferenceData>) -> Self {
        Self {
            parser,
            reference,
            parallelism: DEFAULT_PARALLELISM,
            region_code: None,
            tracker_options: TrackerOptions::default(),
            progress_callback: None,
        }
    }

    /// Window size. Values below 1 are raised to 1.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_region_code(mut self, region_code: Option<String>) -> Self {
        self.region_code = region_code;
        self
    }

    pub fn with_tracker_options(mut self, options: TrackerOptions) -> Self {
        self.tracker_options = options;
        self
    }

    pub fn with_progress_callback(mut self, callback: SiteProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Process every record of `source` and return the folded snapshot.
    ///
    /// A source read failure aborts the crawl after in-flight sites are
    /// cancelled. The source is closed on every path.
    pub async fn run<S>(&self, mut source: S) -> Result<CrawlSnapshot>
    where
        S: SiteSource + 'static,
    {
        let total_sites = match source.len() {
            Ok(total) => total,
            Err(e) => {
                source.close();
                return Err(e.into());
            }
        };
        info!(
            "Processing {} sites with parallelism {}",
            total_sites, self.parallelism
        );

        let (tx, mut rx) = mpsc::channel::<std::result::Result<RawSite, SourceError>>(1);
        let reader = tokio::task::spawn_blocking(move || {
            stream_sites(&mut source, &tx);
            source.close();
            debug!("Site source closed");
        });

        let ctx = SiteContext {
            parser: self.parser.clone(),
            reference: self.reference.clone(),
            stats: Arc::new(CrawlStats::new()),
        };
        let mut aggregator = Aggregator::new(
            self.reference.clone(),
            self.parser.clone(),
            self.tracker_options.clone(),
        );
        let mut queue = FoldQueue::default();

        let mut in_flight: JoinSet<SiteResult> = JoinSet::new();
        let mut positions: HashMap<Id, usize> = HashMap::new();
        let mut next_position = 0;
        let mut source_error = None;

        loop {
            if in_flight.len() >= self.parallelism
                && let Some(finished) = in_flight.join_next_with_id().await
            {
                self.settle(finished, &mut positions, &mut queue, &mut aggregator, &ctx.stats);
            }

            let Some(next) = rx.recv().await else {
                break;
            };
            let raw = match next {
                Ok(raw) => raw,
                Err(e) => {
                    source_error = Some(e);
                    break;
                }
            };

            let handle = in_flight.spawn(process_site(raw, ctx.clone()));
            positions.insert(handle.id(), next_position);
            next_position += 1;
        }

        if let Some(e) = source_error {
            error!("Site source failed, aborting crawl: {}", e);
            in_flight.shutdown().await;
            drop(rx);
            reader.await?;
            return Err(e.into());
        }

        while let Some(finished) = in_flight.join_next_with_id().await {
            self.settle(finished, &mut positions, &mut queue, &mut aggregator, &ctx.stats);
        }
        drop(rx);
        reader.await?;

        if queue.waiting() > 0 {
            warn!("{} finished sites were never folded", queue.waiting());
        }

        let stats = ctx.stats.snapshot(total_sites);
        info!(
            "Crawl finished: {} processed, {} skipped, {} failed of {} sites",
            stats.sites, stats.sites_skipped, stats.sites_failed, stats.total_sites
        );

        Ok(aggregator.finalize(stats, self.region_code.as_deref()))
    }

    fn settle(
        &self,
        finished: std::result::Result<(Id, SiteResult), JoinError>,
        positions: &mut HashMap<Id, usize>,
        queue: &mut FoldQueue,
        aggregator: &mut Aggregator,
        stats: &CrawlStats,
    ) {
        let (id, (outcome, contribution)) = match finished {
            Ok(finished) => finished,
            Err(e) => {
                error!("Site task did not complete: {}", e);
                stats.site_failed();
                (e.id(), (SiteOutcome::Failed(e.to_string()), None))
            }
        };

        match positions.remove(&id) {
            Some(position) => queue.settle(position, contribution, aggregator),
            None => error!("Finished site task {} has no stream position", id),
        }

        if let Some(callback) = &self.progress_callback {
            callback(&outcome);
        }
    }
}

/// Push every record into the channel. Stops after the first error or when
/// the receiver goes away.
fn stream_sites<S: SiteSource + ?Sized>(
    source: &mut S,
    tx: &mpsc::Sender<std::result::Result<RawSite, SourceError>>,
) {
    let sites = match source.sites() {
        Ok(sites) => sites,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    for site in sites {
        let failed = site.is_err();
        if tx.blocking_send(site).is_err() {
            debug!("Pipeline stopped reading, releasing source");
            return;
        }
        if failed {
            return;
        }
    }
}

async fn process_site(raw: RawSite, ctx: SiteContext) -> SiteResult {
    let Some(requests) = raw.requests() else {
        debug!("Skipping site {:?}: no captured data", raw.initial_url);
        ctx.stats.site_skipped();
        return (SiteOutcome::Skipped, None);
    };

    let classified = Site::new(&raw, &ctx.parser).and_then(|site| {
        let classified = site.classify(&raw, requests, &ctx.parser, &ctx.reference)?;
        Ok((site, classified))
    });
    let (site, classified) = match classified {
        Ok(classified) => classified,
        Err(e) => {
            warn!(
                "Site {} failed during classification: {}",
                raw.initial_url.as_deref().unwrap_or_default(),
                e
            );
            ctx.stats.site_failed();
            return (SiteOutcome::Failed(e.to_string()), None);
        }
    };

    let requests_skipped = classified.iter().filter(|r| r.parsed.is_none()).count();
    let contribution = site.contribution(&classified);
    ctx.stats
        .site_processed(classified.len(), requests_skipped);

    debug!("Classified site {} ({} requests)", site.domain, classified.len());
    (
        SiteOutcome::Folded {
            requests: classified.len(),
        },
        Some(contribution),
    )
}

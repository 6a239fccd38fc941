pub mod aggregate;
pub mod classify;
pub mod cname;
pub mod config;
pub mod cookies;
pub mod domain;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod reference;
pub mod resolve;
pub mod site;
pub mod tracker;

pub use aggregate::{Aggregator, CrawlSnapshot, CrawlStats, EntityRecord, StatsSnapshot};
pub use classify::{ClassifiedRequest, Initiator, classify_request, resolve_initiator};
pub use cname::{CnameEntry, ResourceRule};
pub use config::{Config, DataLocation};
pub use domain::{DomainInfo, DomainParser, ParsedUrl};
pub use error::{ConfigError, DomainError, PipelineError, ReferenceError};
pub use pipeline::{CrawlPipeline, SiteOutcome, SiteProgressCallback};
pub use reference::{Entity, ReferenceData};
pub use site::{Site, SiteContribution};
pub use tracker::{TrackerOptions, TrackerRecord};

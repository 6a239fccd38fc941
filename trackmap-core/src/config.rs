// Run configuration: JSON config file plus command-line overrides

use crate::error::{ConfigError, Result};
use crate::pipeline::DEFAULT_PARALLELISM;
use crate::tracker::{DEFAULT_SOURCE_TAG, TrackerOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use trackmap_source::{JsonFileSource, SiteSource, SqliteSource};

/// `crawlerDataLoc` value selecting the relational store.
pub const SQLITE_SENTINEL: &str = "sqlite";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    #[serde(default)]
    pub add_surrogates: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub crawler_data_loc: Option<String>,
    pub database: Option<PathBuf>,
    pub crawl_id: Option<String>,
    pub region_code: Option<String>,
    pub parallelism: usize,
    pub psl_extras: Option<PathBuf>,
    pub reference_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub source_tag: String,
    pub flags: Flags,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler_data_loc: None,
            database: None,
            crawl_id: None,
            region_code: None,
            parallelism: DEFAULT_PARALLELISM,
            psl_extras: None,
            reference_dir: None,
            output_dir: PathBuf::from("./output"),
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            flags: Flags::default(),
        }
    }
}

/// Where the crawl records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    Directory(PathBuf),
    Sqlite {
        database: PathBuf,
        crawl_id: String,
        region: Option<String>,
    },
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Reject configurations the pipeline cannot start with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid {
                option: "parallelism",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.reference_dir.is_none() {
            return Err(ConfigError::Missing("referenceDir"));
        }
        self.data_location().map(|_| ())
    }

    pub fn data_location(&self) -> std::result::Result<DataLocation, ConfigError> {
        let location = self
            .crawler_data_loc
            .as_deref()
            .filter(|loc| !loc.is_empty())
            .ok_or(ConfigError::Missing("crawlerDataLoc"))?;

        if location != SQLITE_SENTINEL {
            return Ok(DataLocation::Directory(PathBuf::from(location)));
        }

        let database = self.database.clone().ok_or(ConfigError::Missing("database"))?;
        let crawl_id = self
            .crawl_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::Missing("crawlId"))?;

        Ok(DataLocation::Sqlite {
            database,
            crawl_id,
            region: self.region_code.clone(),
        })
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            source_tag: self.source_tag.clone(),
            add_surrogates: self.flags.add_surrogates,
        }
    }

    /// Open the configured backend.
    pub fn open_source(&self) -> Result<Box<dyn SiteSource>> {
        let source: Box<dyn SiteSource> = match self.data_location()? {
            DataLocation::Directory(dir) => Box::new(JsonFileSource::open(&dir)?),
            DataLocation::Sqlite {
                database,
                crawl_id,
                region,
            } => Box::new(SqliteSource::open(&database, &crawl_id, region.as_deref())?),
        };
        Ok(source)
    }
}

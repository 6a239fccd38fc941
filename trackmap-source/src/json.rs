// Flat-file crawl reader: one JSON record per file

use crate::error::{Result, SourceError};
use crate::record::RawSite;
use crate::source::{SiteIter, SiteSource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct JsonFileSource {
    files: Vec<PathBuf>,
    closed: bool,
}

impl JsonFileSource {
    /// Index every `*.json` file in `dir`. Files are visited in file name
    /// order so repeated runs see the same record sequence.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.display().to_string()));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("json")
            })
            .collect();
        files.sort();

        info!("Found {} crawl files in {}", files.len(), dir.display());

        Ok(Self {
            files,
            closed: false,
        })
    }

    /// Parse a single crawl file.
    pub fn read_file(path: &Path) -> Result<RawSite> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| SourceError::MalformedRecord {
            location: path.display().to_string(),
            source: e,
        })
    }
}

impl SiteSource for JsonFileSource {
    fn len(&self) -> Result<usize> {
        Ok(self.files.len())
    }

    fn sites(&mut self) -> Result<SiteIter<'_>> {
        if self.closed {
            return Err(SourceError::Closed);
        }

        Ok(Box::new(self.files.iter().map(|path| {
            debug!("Reading crawl file {}", path.display());
            Self::read_file(path)
        })))
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Closing flat-file source");
            self.closed = true;
            self.files.clear();
        }
    }
}

impl Drop for JsonFileSource {
    fn drop(&mut self) {
        self.close();
    }
}

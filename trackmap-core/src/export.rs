// Export of a finished crawl snapshot to disk

use crate::aggregate::{CrawlSnapshot, StatsSnapshot};
use crate::error::Result;
use colored::Colorize;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DOMAINS_DIR: &str = "domains";
pub const ENTITIES_DIR: &str = "entities";
pub const SUMMARY_FILE: &str = "crawl_summary.json";

/// Files written by [`write_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub domains: usize,
    pub entities: usize,
    pub summary: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlSummary<'a> {
    generator: &'static str,
    version: &'static str,
    generated_at: String,
    stats: &'a StatsSnapshot,
    trackers: usize,
    entities: usize,
}

/// Write one JSON file per tracker domain and per entity, plus the crawl
/// summary, under `output_dir`.
pub fn write_snapshot(snapshot: &CrawlSnapshot, output_dir: &Path) -> Result<ExportReport> {
    let domains_dir = output_dir.join(DOMAINS_DIR);
    let entities_dir = output_dir.join(ENTITIES_DIR);
    fs::create_dir_all(&domains_dir)?;
    fs::create_dir_all(&entities_dir)?;

    for tracker in &snapshot.trackers {
        let path = domains_dir.join(format!("{}.json", file_stem(&tracker.domain)));
        debug!("Writing {}", path.display());
        save_json(tracker, &path)?;
    }

    for entity in &snapshot.entities {
        let path = entities_dir.join(format!("{}.json", file_stem(&entity.name)));
        save_json(entity, &path)?;
    }

    let summary = CrawlSummary {
        generator: "trackmap",
        version: env!("CARGO_PKG_VERSION"),
        generated_at: chrono::Utc::now().to_rfc3339(),
        stats: &snapshot.stats,
        trackers: snapshot.trackers.len(),
        entities: snapshot.entities.len(),
    };
    let summary_path = output_dir.join(SUMMARY_FILE);
    save_json(&summary, &summary_path)?;

    info!(
        "Exported {} tracker domains and {} entities to {}",
        snapshot.trackers.len(),
        snapshot.entities.len(),
        output_dir.display()
    );

    Ok(ExportReport {
        domains: snapshot.trackers.len(),
        entities: snapshot.entities.len(),
        summary: summary_path,
    })
}

/// Terminal summary of a crawl.
pub fn summary_text(stats: &StatsSnapshot) -> String {
    let mut text = String::new();
    text.push_str(&format!("{}\n", "Crawl summary".bold()));
    text.push_str(&format!(
        "  Processed: {}\n",
        stats.sites.to_string().bright_green()
    ));
    text.push_str(&format!(
        "  Skipped:   {}\n",
        stats.sites_skipped.to_string().yellow()
    ));
    if stats.sites_failed > 0 {
        text.push_str(&format!(
            "  Failed:    {}\n",
            stats.sites_failed.to_string().red()
        ));
    }
    text.push_str(&format!(
        "  Total:     {}\n",
        stats.total_sites.to_string().bright_white()
    ));
    text.push_str(&format!(
        "  Requests:  {} ({} without a network host)\n",
        stats.requests, stats.requests_skipped
    ));
    text
}

fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

// Entity names may carry characters that are not valid in file names.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

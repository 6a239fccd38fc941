// Relational crawl store backed by SQLite

use crate::error::{Result, SourceError};
use crate::record::RawSite;
use crate::source::{SiteIter, SiteSource};
use rusqlite::{Connection, params};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info, warn};

const PAGE_SIZE: i64 = 100;

/// Write side of the relational store. Used to create the schema and to
/// import flat-file crawls.
pub struct CrawlStore {
    conn: Connection,
}

impl CrawlStore {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let store = CrawlStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crawl_id TEXT NOT NULL,
                region TEXT,
                domain TEXT,
                initial_url TEXT,       -- NULL when the crawl of this site failed
                final_url TEXT,
                data TEXT               -- JSON object: requests, apis
            );

            CREATE INDEX IF NOT EXISTS idx_sites_crawl ON sites(crawl_id, region, id);
            ",
        )?;
        Ok(())
    }

    pub fn insert_site(
        &self,
        crawl_id: &str,
        region: Option<&str>,
        domain: Option<&str>,
        site: &RawSite,
    ) -> Result<i64> {
        let data = site
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SourceError::MalformedRecord {
                location: format!("site {:?}", site.initial_url),
                source: e,
            })?;

        self.conn.execute(
            "INSERT INTO sites (crawl_id, region, domain, initial_url, final_url, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                crawl_id,
                region,
                domain,
                &site.initial_url,
                &site.final_url,
                data,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn count_sites(&self, crawl_id: &str, region: Option<&str>) -> Result<usize> {
        count_sites(&self.conn, crawl_id, region)
    }
}

fn count_sites(conn: &Connection, crawl_id: &str, region: Option<&str>) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sites WHERE crawl_id = ?1 AND (?2 IS NULL OR region = ?2)",
        params![crawl_id, region],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Read side of the relational store: every site of one crawl (and
/// optionally one region), in insertion order.
pub struct SqliteSource {
    conn: Option<Connection>,
    crawl_id: String,
    region: Option<String>,
}

impl SqliteSource {
    pub fn open(path: &Path, crawl_id: &str, region: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }
        let conn = Connection::open(path)?;
        info!(
            "Opened crawl store {} (crawl {}, region {})",
            path.display(),
            crawl_id,
            region.unwrap_or("all")
        );

        Ok(Self {
            conn: Some(conn),
            crawl_id: crawl_id.to_string(),
            region: region.map(str::to_string),
        })
    }
}

impl SiteSource for SqliteSource {
    fn len(&self) -> Result<usize> {
        let conn = self.conn.as_ref().ok_or(SourceError::Closed)?;
        count_sites(conn, &self.crawl_id, self.region.as_deref())
    }

    fn sites(&mut self) -> Result<SiteIter<'_>> {
        let conn = self.conn.as_ref().ok_or(SourceError::Closed)?;
        Ok(Box::new(SitePages {
            conn,
            crawl_id: &self.crawl_id,
            region: self.region.as_deref(),
            last_id: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("Closing crawl store for crawl {}", self.crawl_id);
            if let Err((_, e)) = conn.close() {
                warn!("Error closing crawl store: {}", e);
            }
        }
    }
}

impl Drop for SqliteSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keyset-paginated cursor over the `sites` table.
struct SitePages<'a> {
    conn: &'a Connection,
    crawl_id: &'a str,
    region: Option<&'a str>,
    last_id: i64,
    buffer: VecDeque<Result<RawSite>>,
    exhausted: bool,
}

impl SitePages<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, initial_url, final_url, data FROM sites
             WHERE crawl_id = ?1 AND (?2 IS NULL OR region = ?2) AND id > ?3
             ORDER BY id LIMIT ?4",
        )?;

        let rows = stmt
            .query_map(
                params![self.crawl_id, self.region, self.last_id, PAGE_SIZE],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Fetched {} sites after id {}", rows.len(), self.last_id);
        if (rows.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
        }

        for (id, initial_url, final_url, data) in rows {
            self.last_id = id;
            let record = match data {
                Some(text) => serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| SourceError::MalformedRecord {
                        location: format!("sites row {}", id),
                        source: e,
                    }),
                None => Ok(None),
            }
            .map(|data| RawSite {
                initial_url,
                final_url,
                data,
            });
            self.buffer.push_back(record);
        }

        Ok(())
    }
}

impl Iterator for SitePages<'_> {
    type Item = Result<RawSite>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front()
    }
}

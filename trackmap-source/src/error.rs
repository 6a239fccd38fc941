use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Malformed crawl record in {location}: {source}")]
    MalformedRecord {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Crawl data location not found: {0}")]
    NotFound(String),

    #[error("Source already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SourceError>;

use std::path::PathBuf;
use thiserror::Error;
use trackmap_source::SourceError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The URL uses a scheme that carries no network host (`javascript:`,
    /// `data:`, `about:` ...). Callers skip the request and continue.
    #[error("Invalid URL protocol: {0}")]
    InvalidUrlProtocol(String),

    #[error("Malformed URL '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Failed to read reference data {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse reference data {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Required reference data missing: {0}")]
    Missing(PathBuf),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required option: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {option}: {reason}")]
    Invalid { option: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read crawl data: {0}")]
    SourceRead(#[from] SourceError),

    #[error("Reference data load failure: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

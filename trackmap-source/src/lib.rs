pub mod error;
pub mod json;
pub mod record;
pub mod source;
pub mod sqlite;

pub use error::SourceError;
pub use json::JsonFileSource;
pub use record::{RawApis, RawRequest, RawSite, RawSiteData, SavedCall};
pub use source::SiteSource;
pub use sqlite::{CrawlStore, SqliteSource};

use crate::error::Result;
use crate::record::RawSite;

/// Lazy iterator over the records of a source. Single pass, forward only.
pub type SiteIter<'a> = Box<dyn Iterator<Item = Result<RawSite>> + 'a>;

/// A backend holding captured crawl records.
///
/// The pipeline treats every implementation identically: it asks for the
/// record count once, walks `sites()` exactly once, and calls `close()` on
/// every exit path. Implementations must make `close()` idempotent.
pub trait SiteSource: Send {
    /// Total number of site records this source will produce.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Stream the records. Calling this after `close()` yields
    /// `SourceError::Closed`.
    fn sites(&mut self) -> Result<SiteIter<'_>>;

    /// Release backend resources.
    fn close(&mut self);
}

impl<S: SiteSource + ?Sized> SiteSource for Box<S> {
    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn sites(&mut self) -> Result<SiteIter<'_>> {
        (**self).sites()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

use log::debug;

use crate::session::{Session, SessionError};

/// Finds listing cards on a results page, trying each selector in turn.
pub struct ListingPageScanner {
    selectors: Vec<String>,
}

impl ListingPageScanner {
    pub fn new(selectors: Vec<String>) -> Self {
        ListingPageScanner { selectors }
    }

    pub fn jobsdb() -> Self {
        Self::new(vec!["[data-automation='job-card']".into(), "article".into()])
    }

    /// Cards in document order. An empty result is the end of pagination.
    pub fn scan<S: Session>(&self, session: &S) -> Result<Vec<S::Handle>, SessionError> {
        for selector in &self.selectors {
            let cards = session.query_all(None, selector)?;
            if !cards.is_empty() {
                debug!("Found {} cards using selector '{}'", cards.len(), selector);
                return Ok(cards);
            }
        }
        Ok(Vec::new())
    }
}

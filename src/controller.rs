use std::time::Duration;

use chrono::{Local, NaiveDate};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::{ConfigError, CrawlConfig, ExtractionMode, MaxPages};
use crate::dedup::DedupStore;
use crate::extractor::{posting_id, FieldExtractor};
use crate::input_loader::InputError;
use crate::listing::{CrawlTarget, JobListing};
use crate::locator::FieldName;
use crate::navigator::{NavigationError, NavigationMode, SearchNavigator};
use crate::retry::{RetryError, RetryPolicy, Sleeper, ThreadSleeper};
use crate::scanner::ListingPageScanner;
use crate::session::{Session, SessionError, SessionGuard};
use crate::sink::{PersistenceError, RecordSink};

/// Marks a job detail view as rendered.
const DETAIL_READY: &str =
    "[data-automation='jobDetailsPage'], [data-automation='jobAdDetails'], [data-automation='job-detail-title']";

/// Scope for detail lookups: the detail container, else the whole document.
const DETAIL_ROOTS: [&str; 2] = ["[data-automation='jobDetailsPage']", "html"];

/// Ends the current target; the run moves on to the next one.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("navigation failed: {0}")]
    Navigation(#[from] RetryError<NavigationError>),
    #[error("session unusable: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl TargetError {
    /// Whether the session has to be replaced before the next target.
    pub fn needs_new_session(&self) -> bool {
        match self {
            TargetError::Session(e) => e.is_fatal(),
            TargetError::Navigation(r) => matches!(r.inner(), NavigationError::Session(e) if e.is_fatal()),
            TargetError::Persistence(_) => false,
        }
    }
}

/// Ends the whole run.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub targets: usize,
    pub targets_failed: usize,
    pub pages_visited: usize,
    pub cards_seen: usize,
    pub records_written: usize,
    pub duplicates_skipped: usize,
    pub cards_dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailState {
    OnListPage,
    Transitioning,
    OnDetailPage,
}

fn transition(state: &mut DetailState, next: DetailState) {
    debug!("Detail view: {:?} -> {:?}", state, next);
    *state = next;
}

/// Drives every target through navigation, scanning, extraction and persistence.
///
/// Sessions come from `factory`, are opened lazily, and are closed when the
/// controller drops them or a target leaves them unusable.
pub struct CrawlController<S, F, K>
where
    S: Session,
    F: FnMut() -> Result<S, SessionError>,
    K: RecordSink,
{
    factory: F,
    session: Option<SessionGuard<S>>,
    sink: K,
    navigator: SearchNavigator,
    scanner: ListingPageScanner,
    extractor: FieldExtractor,
    card_extractor: FieldExtractor,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    dedup: DedupStore,
    mode: ExtractionMode,
    detail_timeout: Duration,
    today: NaiveDate,
    records: Vec<JobListing>,
    summary: CrawlSummary,
}

impl<S, F, K> CrawlController<S, F, K>
where
    S: Session,
    F: FnMut() -> Result<S, SessionError>,
    K: RecordSink,
{
    pub fn from_config(config: &CrawlConfig, factory: F, sink: K, dedup: DedupStore) -> Result<Self, ConfigError> {
        Ok(CrawlController {
            factory,
            session: None,
            sink,
            navigator: SearchNavigator::from_config(config),
            scanner: ListingPageScanner::jobsdb(),
            extractor: FieldExtractor::new(config.locator_table()?, &config.base_url),
            card_extractor: FieldExtractor::new(config.card_table()?, &config.base_url),
            retry: config.retry.policy(),
            sleeper: Box::new(ThreadSleeper),
            dedup,
            mode: config.extraction,
            detail_timeout: config.timeouts.detail(),
            today: Local::now().date_naive(),
            records: Vec::new(),
            summary: CrawlSummary::default(),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Fixes the date relative posting times are resolved against.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Records persisted during this run, in order.
    pub fn records(&self) -> &[JobListing] {
        &self.records
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Crawls every target in order. Only a persistence failure stops the run early.
    pub fn run(&mut self, targets: &[CrawlTarget], max_pages: MaxPages) -> Result<CrawlSummary, CrawlError> {
        let total = targets.len();
        for (i, target) in targets.iter().enumerate() {
            info!("Processing {} / {} : {}", i + 1, total, target);
            self.summary.targets += 1;

            match self.crawl_target(target, max_pages) {
                Ok(()) => {}
                Err(TargetError::Persistence(e)) => {
                    error!("Could not persist results for {}: {}. Aborting.", target, e);
                    self.close_session();
                    return Err(CrawlError::Persistence(e));
                }
                Err(e) => {
                    error!("Skipping {}: {}", target, e);
                    self.summary.targets_failed += 1;
                }
            }
        }

        self.close_session();
        info!(
            "Crawl completed. {} new records from {} targets ({} failed).",
            self.summary.records_written, self.summary.targets, self.summary.targets_failed
        );
        Ok(self.summary.clone())
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!("Failed to close session cleanly: {}", e);
            }
        }
    }

    fn crawl_target(&mut self, target: &CrawlTarget, max_pages: MaxPages) -> Result<(), TargetError> {
        let mut session = match self.session.take() {
            Some(s) => s,
            None => {
                info!("Opening a new session.");
                SessionGuard::new((self.factory)()?)
            }
        };

        let result = self.paginate(&mut session, target, max_pages);
        match &result {
            Err(e) if e.needs_new_session() => {
                warn!("Session is no longer usable; it will be replaced for the next target.");
                drop(session);
            }
            _ => self.session = Some(session),
        }
        result
    }

    fn paginate(&mut self, session: &mut S, target: &CrawlTarget, max_pages: MaxPages) -> Result<(), TargetError> {
        let mut page = 1;
        while max_pages.allows(page) {
            let label = format!("Loading page {} for {}", page, target);
            let navigator = &self.navigator;
            let ready = self.retry.run(self.sleeper.as_ref(), &label, |_| {
                navigator.prepare(session, target, page)
            })?;
            if !ready.marker_seen {
                debug!("Page {} for {} settled without the listing marker", page, target);
            }

            let cards = self.scanner.scan(session)?;
            if cards.is_empty() {
                info!("No cards on page {} for {}. Moving on.", page, target);
                break;
            }
            self.summary.pages_visited += 1;
            info!("Page {} for {}: {} cards", page, target, cards.len());

            match self.mode {
                ExtractionMode::Cards => self.harvest_cards(session, target, &cards)?,
                ExtractionMode::Detail => self.harvest_details(session, target, cards)?,
            }

            let must_link = max_pages == MaxPages::Unbounded || self.navigator.mode() == NavigationMode::Form;
            if must_link && !self.navigator.has_next_page(session, page) {
                info!("No link past page {} for {}. Done.", page, target);
                break;
            }
            page += 1;
        }
        Ok(())
    }

    fn harvest_cards(&mut self, session: &mut S, target: &CrawlTarget, cards: &[S::Handle]) -> Result<(), TargetError> {
        for (i, card) in cards.iter().enumerate() {
            self.summary.cards_seen += 1;
            let Some(job_url) = self.extractor.extract(session, card, FieldName::JobUrl) else {
                warn!("Card {} for {} has no job link; skipping it.", i + 1, target);
                self.summary.cards_dropped += 1;
                continue;
            };
            if self.dedup.contains(&job_url) {
                debug!("Already have {}", job_url);
                self.summary.duplicates_skipped += 1;
                continue;
            }
            let listing = self.extractor.read_listing(session, card, target, job_url, self.today);
            self.persist(listing)?;
        }
        Ok(())
    }

    /// Opens each card's detail view in turn and always comes back to the list.
    fn harvest_details(
        &mut self,
        session: &mut S,
        target: &CrawlTarget,
        mut cards: Vec<S::Handle>,
    ) -> Result<(), TargetError> {
        let total = cards.len();
        let mut stale = false;
        let mut state = DetailState::OnListPage;

        for index in 0..total {
            if stale {
                cards = self.scanner.scan(session)?;
                stale = false;
            }
            let Some(card) = cards.get(index).cloned() else {
                warn!("Result list shrank to {} cards after returning from a detail view.", cards.len());
                break;
            };
            self.summary.cards_seen += 1;

            let card_url = self.card_extractor.extract(session, &card, FieldName::JobUrl);
            if let Some(url) = card_url.as_deref() {
                if self.dedup.contains(url) {
                    debug!("Already have {}", url);
                    self.summary.duplicates_skipped += 1;
                    continue;
                }
            }

            let list_url = session.current_url();
            transition(&mut state, DetailState::Transitioning);
            if let Err(e) = session.click(&card, self.detail_timeout) {
                if e.is_fatal() {
                    return Err(e.into());
                }
                warn!("Could not open card {} for {}: {}", index + 1, target, e);
                self.summary.cards_dropped += 1;
                transition(&mut state, DetailState::OnListPage);
                continue;
            }
            let navigated = session.current_url() != list_url;

            match session.wait_for_selector(DETAIL_READY, self.detail_timeout) {
                Ok(()) => transition(&mut state, DetailState::OnDetailPage),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("Detail view for card {} never became ready: {}", index + 1, e);
                    self.summary.cards_dropped += 1;
                }
            }

            if state == DetailState::OnDetailPage {
                match self.read_detail(session, target, card_url, navigated)? {
                    Some(listing) => self.persist(listing)?,
                    None => self.summary.cards_dropped += 1,
                }
            }

            if navigated {
                session.back(self.detail_timeout)?;
                self.navigator.wait_until_ready(session)?;
                stale = true;
            }
            transition(&mut state, DetailState::OnListPage);
        }
        Ok(())
    }

    /// Reads the open detail view. The card's own link stays the record key so
    /// that both extraction modes agree on it.
    fn read_detail(
        &self,
        session: &S,
        target: &CrawlTarget,
        card_url: Option<String>,
        navigated: bool,
    ) -> Result<Option<JobListing>, SessionError> {
        let mut root = None;
        for selector in DETAIL_ROOTS {
            if let Some(found) = session.query_all(None, selector)?.into_iter().next() {
                root = Some(found);
                break;
            }
        }
        let Some(root) = root else {
            return Ok(None);
        };

        let detail_url = self.extractor.extract(session, &root, FieldName::JobUrl);
        if !navigated {
            // An in-place pane may still be showing the previously opened posting.
            let shown = detail_url.as_deref().and_then(posting_id);
            if shown.is_none() || shown != card_url.as_deref().and_then(posting_id) {
                warn!(
                    "Detail view shows {} instead of the clicked card {}; skipping it.",
                    detail_url.as_deref().unwrap_or("an unknown posting"),
                    card_url.as_deref().unwrap_or("(no link)")
                );
                return Ok(None);
            }
        }

        let job_url = card_url
            .or(detail_url)
            .or_else(|| if navigated { session.current_url() } else { None });
        let Some(job_url) = job_url else {
            warn!("Detail view has no job URL; skipping it.");
            return Ok(None);
        };
        Ok(Some(self.extractor.read_listing(session, &root, target, job_url, self.today)))
    }

    fn persist(&mut self, listing: JobListing) -> Result<(), PersistenceError> {
        if !self.dedup.accept(&listing.job_url) {
            self.summary.duplicates_skipped += 1;
            return Ok(());
        }
        self.sink.append(&listing)?;
        info!(
            "Saved: {} at {}",
            listing.job_title.as_deref().unwrap_or("(untitled)"),
            listing.company_name.as_deref().unwrap_or("(unknown company)")
        );
        self.summary.records_written += 1;
        self.records.push(listing);
        Ok(())
    }
}

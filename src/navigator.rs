use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{CrawlConfig, Timeouts};
use crate::listing::CrawlTarget;
use crate::retry::Transient;
use crate::session::{Session, SessionError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMode {
    /// Build the results URL from the keyword and page number.
    #[default]
    Direct,
    /// Fill in the search form on the home page, then click through pages.
    Form,
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("invalid search target: {0}")]
    InvalidTarget(String),
    #[error("could not find {0} on the page")]
    MissingControl(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Transient for NavigationError {
    fn is_transient(&self) -> bool {
        match self {
            NavigationError::Session(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Locator chains for the search form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormSelectors {
    pub home_path: String,
    pub keyword_input: Vec<String>,
    pub location_input: Vec<String>,
    pub submit: Vec<String>,
}

impl Default for FormSelectors {
    fn default() -> Self {
        FormSelectors {
            home_path: "/".to_string(),
            keyword_input: vec!["#keywords-input".into(), "input[name='keywords']".into()],
            location_input: vec!["#SearchBar__Where".into(), "input[name='where']".into()],
            submit: vec![
                "button[data-automation='searchButton']".into(),
                "button[type='submit']".into(),
            ],
        }
    }
}

/// Result of a successful [`SearchNavigator::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySignal {
    pub url: Option<String>,
    /// False when readiness was only inferred from the page settling.
    pub marker_seen: bool,
    pub consent_dismissed: bool,
}

pub struct SearchNavigator {
    base_url: String,
    search_path: String,
    mode: NavigationMode,
    form: FormSelectors,
    ready_selector: String,
    consent_selectors: Vec<String>,
    timeouts: Timeouts,
}

impl SearchNavigator {
    pub fn new(base_url: &str, search_path: &str, mode: NavigationMode, timeouts: Timeouts) -> Self {
        SearchNavigator {
            base_url: base_url.trim_end_matches('/').to_string(),
            search_path: search_path.to_string(),
            mode,
            form: FormSelectors::default(),
            ready_selector: "[data-automation='job-card-list'], [data-automation='job-card']".to_string(),
            consent_selectors: vec![
                "#onetrust-accept-btn-handler".into(),
                "button[data-automation='cookie-accept']".into(),
                "button".into(),
            ],
            timeouts,
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        let mut nav = Self::new(
            &config.base_url,
            &config.search_path,
            config.navigation,
            config.timeouts.clone(),
        );
        nav.form = config.form.clone();
        nav
    }

    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    /// Absolute results URL for `target` at 1-based `page`.
    pub fn build_search_url(&self, target: &CrawlTarget, page: u32) -> Result<String, NavigationError> {
        let keyword = target.keyword.trim();
        if keyword.is_empty() {
            return Err(NavigationError::InvalidTarget("empty keyword".into()));
        }
        let location = target.location.as_deref().unwrap_or("").trim();

        let path = self
            .search_path
            .replace("{keyword}", &urlencoding::encode(keyword))
            .replace("{location}", &urlencoding::encode(location));

        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else {
            format!("{}{}", self.base_url, path)
        };
        if page > 1 {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push_str(&format!("{}page={}", sep, page));
        }
        Ok(url)
    }

    /// Brings the session to the results for `target` at `page` and waits until
    /// it is usable. Safe to call again after a transient failure.
    pub fn prepare<S: Session>(
        &self,
        session: &mut S,
        target: &CrawlTarget,
        page: u32,
    ) -> Result<ReadySignal, NavigationError> {
        let home_dismissed = match (self.mode, page) {
            (NavigationMode::Direct, _) => {
                let url = self.build_search_url(target, page)?;
                session.goto(&url, self.timeouts.navigation())?;
                false
            }
            (NavigationMode::Form, 1) => self.submit_search_form(session, target)?,
            (NavigationMode::Form, _) => {
                self.click_page_link(session, page)?;
                false
            }
        };

        let marker_seen = self.wait_until_ready(session)?;
        let consent_dismissed = self.dismiss_consent(session) || home_dismissed;
        Ok(ReadySignal {
            url: session.current_url(),
            marker_seen,
            consent_dismissed,
        })
    }

    fn submit_search_form<S: Session>(&self, session: &mut S, target: &CrawlTarget) -> Result<bool, NavigationError> {
        if target.keyword.trim().is_empty() {
            return Err(NavigationError::InvalidTarget("empty keyword".into()));
        }
        let home = format!("{}{}", self.base_url, self.form.home_path);
        session.goto(&home, self.timeouts.navigation())?;
        let dismissed = self.dismiss_consent(session);

        let keyword_input = first_present(session, &self.form.keyword_input)?
            .ok_or_else(|| NavigationError::MissingControl("keyword input".into()))?;
        session.type_text(&keyword_input, target.keyword.trim())?;

        if let Some(location) = target.location.as_deref() {
            match first_present(session, &self.form.location_input)? {
                Some(input) => session.type_text(&input, location)?,
                None => warn!("No location input found; searching {} without it", target),
            }
        }

        let submit = first_present(session, &self.form.submit)?
            .ok_or_else(|| NavigationError::MissingControl("search button".into()))?;
        session.click(&submit, self.timeouts.navigation())?;
        Ok(dismissed)
    }

    fn page_link_selectors(page: u32) -> [String; 2] {
        [format!("[data-automation='page-{}']", page), "a[rel='next']".to_string()]
    }

    fn click_page_link<S: Session>(&self, session: &mut S, page: u32) -> Result<(), NavigationError> {
        let link = first_present(session, &Self::page_link_selectors(page))?
            .ok_or_else(|| NavigationError::MissingControl(format!("link to page {}", page)))?;
        session.click(&link, self.timeouts.navigation())?;
        Ok(())
    }

    /// Whether the current results page links to the page after `page`.
    pub fn has_next_page<S: Session>(&self, session: &S, page: u32) -> bool {
        match first_present(session, &Self::page_link_selectors(page + 1)) {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!("Could not look for a next page link: {}", e);
                false
            }
        }
    }

    /// Waits for the listing container, falling back to the page settling.
    /// Returns whether the container itself was seen.
    pub fn wait_until_ready<S: Session>(&self, session: &mut S) -> Result<bool, SessionError> {
        match session.wait_for_selector(&self.ready_selector, self.timeouts.readiness()) {
            Ok(()) => Ok(true),
            Err(SessionError::Timeout { .. }) => {
                debug!("Listing container not seen; waiting for the page to settle instead");
                session.wait_for_idle(self.timeouts.navigation())?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Tries to click away a cookie/consent banner. Never fails navigation.
    /// Only controls that stay on the page are clicked; a click that moves the
    /// session anyway is undone.
    pub fn dismiss_consent<S: Session>(&self, session: &mut S) -> bool {
        for selector in &self.consent_selectors {
            let candidates = match session.query_all(None, selector) {
                Ok(c) => c,
                Err(e) => {
                    debug!("Consent selector '{}' failed: {}", selector, e);
                    continue;
                }
            };
            let generic = selector == "button";
            for handle in candidates {
                if generic && !looks_like_consent(session.text(&handle).ok().flatten().as_deref()) {
                    continue;
                }
                if would_navigate(session, &handle) {
                    debug!("Skipping consent candidate via '{}': it leaves the page", selector);
                    continue;
                }
                let before = session.current_url();
                match session.click(&handle, self.timeouts.consent()) {
                    Ok(()) if session.current_url() != before => {
                        warn!("Consent click via '{}' left the page; going back", selector);
                        if let Err(e) = session.back(self.timeouts.navigation()) {
                            debug!("Could not return after consent click: {}", e);
                        }
                        return false;
                    }
                    Ok(()) => {
                        info!("Dismissed consent banner via '{}'", selector);
                        return true;
                    }
                    Err(e) => {
                        debug!("Consent click via '{}' failed: {}", selector, e);
                        break;
                    }
                }
            }
        }
        false
    }
}

/// Whether clicking the control would load another page: a real link or a
/// form submit button.
fn would_navigate<S: Session>(session: &S, handle: &S::Handle) -> bool {
    let attr = |name| session.attribute(handle, name).ok().flatten();
    if let Some(href) = attr("href") {
        let href = href.trim();
        if !(href.is_empty() || href.starts_with('#') || href.starts_with("javascript:")) {
            return true;
        }
    }
    attr("type").is_some_and(|t| t.eq_ignore_ascii_case("submit"))
}

fn looks_like_consent(label: Option<&str>) -> bool {
    label
        .map(|l| {
            let l = l.to_lowercase();
            l.contains("accept") || l.contains("agree")
        })
        .unwrap_or(false)
}

/// First handle matched by any selector in the chain.
fn first_present<S: Session>(session: &S, chain: &[String]) -> Result<Option<S::Handle>, SessionError> {
    for selector in chain {
        if let Some(h) = session.query_all(None, selector)?.into_iter().next() {
            return Ok(Some(h));
        }
    }
    Ok(None)
}

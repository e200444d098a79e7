use std::ops::{Deref, DerefMut};
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
    #[error("element handle no longer belongs to the current page")]
    StaleHandle,
    #[error("element cannot be clicked: {0}")]
    NotClickable(String),
    #[error("element does not accept text: {0}")]
    NotEditable(String),
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    #[error("no previous page to go back to")]
    NoHistory,
    #[error("blocked by site (HTTP {0})")]
    Blocked(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("session is closed or has no page loaded")]
    Closed,
    #[error("webdriver error: {0}")]
    WebDriver(String),
}

impl SessionError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        SessionError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Whether trying the same operation again could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Timeout { .. } => true,
            SessionError::Status(code) => *code >= 500,
            SessionError::Blocked(code) => *code == 429,
            SessionError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// The session itself is unusable and must be replaced.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Closed | SessionError::WebDriver(_))
    }
}

/// Browser-like capabilities the crawler relies on.
///
/// Handles are only valid for the page they were queried from; once the
/// session navigates, old handles resolve to [`SessionError::StaleHandle`].
pub trait Session {
    type Handle: Clone;

    fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Waits until `selector` matches, failing with `Timeout` once `timeout` elapses.
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Waits until the page has stopped loading resources.
    fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), SessionError>;

    fn query_all(
        &self,
        scope: Option<&Self::Handle>,
        selector: &str,
    ) -> Result<Vec<Self::Handle>, SessionError>;

    fn text(&self, handle: &Self::Handle) -> Result<Option<String>, SessionError>;

    fn attribute(&self, handle: &Self::Handle, name: &str) -> Result<Option<String>, SessionError>;

    fn click(&mut self, handle: &Self::Handle, timeout: Duration) -> Result<(), SessionError>;

    fn type_text(&mut self, handle: &Self::Handle, text: &str) -> Result<(), SessionError>;

    fn back(&mut self, timeout: Duration) -> Result<(), SessionError>;

    fn current_url(&self) -> Option<String>;

    fn close(&mut self) -> Result<(), SessionError>;
}

/// Owns a session and closes it when dropped, whatever path leaves the scope.
pub struct SessionGuard<S: Session> {
    inner: Option<S>,
}

impl<S: Session> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        SessionGuard {
            inner: Some(session),
        }
    }

    /// Closes now instead of waiting for drop.
    pub fn close(mut self) -> Result<(), SessionError> {
        match self.inner.take() {
            Some(mut s) => s.close(),
            None => Ok(()),
        }
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.inner.as_ref().expect("session taken before drop")
    }
}

impl<S: Session> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.inner.as_mut().expect("session taken before drop")
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(mut s) = self.inner.take() {
            match s.close() {
                Ok(()) => debug!("Session closed."),
                Err(e) => warn!("Failed to close session cleanly: {}", e),
            }
        }
    }
}

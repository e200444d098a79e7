use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::session::{Session, SessionError};

/// Where a [`DocumentSession`] gets its HTML from.
pub trait PageSource {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, SessionError>;
}

impl<P: PageSource + ?Sized> PageSource for Arc<P> {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, SessionError> {
        (**self).fetch(url, timeout)
    }
}

/// Live pages over HTTP.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, SessionError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(HttpSource { client })
    }

    fn random_user_agent(&self) -> &'static str {
        let uas = [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
        ];
        use rand::Rng;
        let mut rng = rand::thread_rng();
        uas[rng.gen_range(0..uas.len())]
    }
}

impl PageSource for HttpSource {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, SessionError> {
        let resp = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, self.random_user_agent())
            .timeout(timeout)
            .send()
            .map_err(|e| classify(e, url, timeout))?;

        let status = resp.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            warn!("Blocked at {}: {}", url, status);
            return Err(SessionError::Blocked(status.as_u16()));
        }
        if !status.is_success() {
            return Err(SessionError::Status(status.as_u16()));
        }

        resp.text().map_err(|e| classify(e, url, timeout))
    }
}

fn classify(e: reqwest::Error, url: &Url, timeout: Duration) -> SessionError {
    if e.is_timeout() {
        SessionError::timeout(url.as_str(), timeout)
    } else {
        SessionError::Http(e)
    }
}

/// Canned pages keyed by URL, for replaying saved snapshots offline.
#[derive(Default)]
pub struct StaticPages {
    pages: HashMap<String, String>,
    failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<String>>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(normalize_key(url), html.into());
        self
    }

    /// The next `times` fetches of `url` time out before it is served.
    pub fn failing(self, url: &str, times: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(normalize_key(url), times);
        }
        self
    }

    /// Every URL fetched so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

fn normalize_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl PageSource for StaticPages {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, SessionError> {
        let key = url.to_string();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(key.clone());
        }

        if let Ok(mut failures) = self.failures.lock() {
            if let Some(left) = failures.get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SessionError::timeout(key, timeout));
                }
            }
        }

        self.pages
            .get(&key)
            .cloned()
            .ok_or(SessionError::Status(404))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    generation: u64,
    ordinal: usize,
}

struct LoadedPage {
    url: Url,
    html: Html,
    generation: u64,
}

fn all_elements() -> &'static Selector {
    static ALL: OnceLock<Selector> = OnceLock::new();
    ALL.get_or_init(|| Selector::parse("*").expect("universal selector"))
}

fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|_| SessionError::InvalidSelector(selector.to_string()))
}

/// A [`Session`] over static HTML documents.
///
/// Links are followed by fetching their `href`, GET forms are submitted with
/// whatever was typed into their fields, and `back` restores the previous
/// document. Nothing executes scripts, so a loaded document is always settled
/// and a selector that is absent now will never appear.
pub struct DocumentSession<P: PageSource> {
    source: P,
    current: Option<LoadedPage>,
    history: Vec<LoadedPage>,
    generation: u64,
    typed: HashMap<usize, String>,
    closed: bool,
}

impl<P: PageSource> DocumentSession<P> {
    pub fn new(source: P) -> Self {
        DocumentSession {
            source,
            current: None,
            history: Vec::new(),
            generation: 0,
            typed: HashMap::new(),
            closed: false,
        }
    }

    fn page(&self) -> Result<&LoadedPage, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.current.as_ref().ok_or(SessionError::Closed)
    }

    fn element<'a>(
        &self,
        page: &'a LoadedPage,
        handle: &NodeHandle,
    ) -> Result<ElementRef<'a>, SessionError> {
        if handle.generation != page.generation {
            return Err(SessionError::StaleHandle);
        }
        page.html
            .select(all_elements())
            .nth(handle.ordinal)
            .ok_or(SessionError::StaleHandle)
    }

    fn ordinal_of(page: &LoadedPage, el: ElementRef<'_>) -> Option<usize> {
        page.html.select(all_elements()).position(|e| e.id() == el.id())
    }

    fn absolute(&self, url: &str) -> Result<Url, SessionError> {
        let parsed = match self.current.as_ref() {
            Some(page) => page.url.join(url),
            None => Url::parse(url),
        };
        parsed.map_err(|_| SessionError::InvalidUrl(url.to_string()))
    }

    fn load(&mut self, url: Url, timeout: Duration) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        debug!("Loading {}", url);
        let body = self.source.fetch(&url, timeout)?;
        let html = Html::parse_document(&body);

        self.generation += 1;
        if let Some(prev) = self.current.take() {
            self.history.push(prev);
        }
        self.current = Some(LoadedPage {
            url,
            html,
            generation: self.generation,
        });
        self.typed.clear();
        Ok(())
    }

    /// Works out where clicking `el` would take the browser. `None` means the
    /// click is handled in place, as for a plain button outside any form.
    fn click_target(&self, page: &LoadedPage, el: ElementRef<'_>) -> Result<Option<Url>, SessionError> {
        let tag = el.value().name();

        if tag == "a" {
            if let Some(href) = el.value().attr("href") {
                return follow(page, href).map(Some);
            }
        }

        if is_plain_button(el) || (is_submit_control(el) && enclosing_form(el).is_none()) {
            return Ok(None);
        }
        if is_submit_control(el) {
            return self.submit_form(page, el).map(Some);
        }

        let link = parse_selector("a[href]")?;
        if let Some(a) = el.select(&link).next() {
            if let Some(href) = a.value().attr("href") {
                return follow(page, href).map(Some);
            }
        }

        Err(SessionError::NotClickable(format!("<{}> has no link or form", tag)))
    }

    fn submit_form(&self, page: &LoadedPage, submitter: ElementRef<'_>) -> Result<Url, SessionError> {
        let form = enclosing_form(submitter)
            .ok_or_else(|| SessionError::NotClickable("submit control outside a form".into()))?;

        let method = form.value().attr("method").unwrap_or("get");
        if !method.eq_ignore_ascii_case("get") {
            return Err(SessionError::NotClickable(format!("{} forms are not supported", method)));
        }

        let mut action = match form.value().attr("action") {
            Some(a) if !a.trim().is_empty() => follow(page, a)?,
            _ => page.url.clone(),
        };
        action.set_query(None);

        let controls = parse_selector("input[name], textarea[name], select[name]")?;
        {
            let mut query = action.query_pairs_mut();
            for control in form.select(&controls) {
                let name = control.value().attr("name").unwrap_or_default();
                let kind = control.value().attr("type").unwrap_or("text").to_ascii_lowercase();
                if matches!(kind.as_str(), "submit" | "button" | "image" | "reset") {
                    continue;
                }
                if matches!(kind.as_str(), "checkbox" | "radio") && control.value().attr("checked").is_none() {
                    continue;
                }
                let typed = Self::ordinal_of(page, control).and_then(|o| self.typed.get(&o));
                let value = match typed {
                    Some(v) => v.clone(),
                    None => control.value().attr("value").unwrap_or_default().to_string(),
                };
                query.append_pair(name, &value);
            }
            if let (Some(name), Some(value)) =
                (submitter.value().attr("name"), submitter.value().attr("value"))
            {
                query.append_pair(name, value);
            }
        }
        Ok(action)
    }
}

fn follow(page: &LoadedPage, href: &str) -> Result<Url, SessionError> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return Err(SessionError::NotClickable(format!("href `{}` does not navigate", href)));
    }
    page.url
        .join(href)
        .map_err(|_| SessionError::InvalidUrl(href.to_string()))
}

fn enclosing_form(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "form")
}

fn is_plain_button(el: ElementRef<'_>) -> bool {
    let kind = el.value().attr("type").map(|t| t.to_ascii_lowercase());
    matches!(el.value().name(), "button" | "input") && kind.as_deref() == Some("button")
}

fn is_submit_control(el: ElementRef<'_>) -> bool {
    let kind = el.value().attr("type").map(|t| t.to_ascii_lowercase());
    match el.value().name() {
        "button" => matches!(kind.as_deref(), None | Some("submit")),
        "input" => matches!(kind.as_deref(), Some("submit") | Some("image")),
        _ => false,
    }
}

impl<P: PageSource> Session for DocumentSession<P> {
    type Handle = NodeHandle;

    fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let target = self.absolute(url)?;
        info!("Visiting: {}", target);
        self.load(target, timeout)
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError> {
        let sel = parse_selector(selector)?;
        let page = self.page()?;
        match page.html.select(&sel).next() {
            Some(_) => Ok(()),
            None => Err(SessionError::timeout(selector, timeout)),
        }
    }

    fn wait_for_idle(&mut self, _timeout: Duration) -> Result<(), SessionError> {
        self.page().map(|_| ())
    }

    fn query_all(
        &self,
        scope: Option<&NodeHandle>,
        selector: &str,
    ) -> Result<Vec<NodeHandle>, SessionError> {
        let sel = parse_selector(selector)?;
        let page = self.page()?;

        let matched: Vec<_> = match scope {
            Some(handle) => self.element(page, handle)?.select(&sel).map(|e| e.id()).collect(),
            None => page.html.select(&sel).map(|e| e.id()).collect(),
        };
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        Ok(page
            .html
            .select(all_elements())
            .enumerate()
            .filter(|(_, e)| matched.contains(&e.id()))
            .map(|(ordinal, _)| NodeHandle {
                generation: page.generation,
                ordinal,
            })
            .collect())
    }

    fn text(&self, handle: &NodeHandle) -> Result<Option<String>, SessionError> {
        let page = self.page()?;
        let el = self.element(page, handle)?;
        let raw: String = el.text().collect();
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    fn attribute(&self, handle: &NodeHandle, name: &str) -> Result<Option<String>, SessionError> {
        let page = self.page()?;
        let el = self.element(page, handle)?;
        Ok(el.value().attr(name).map(|v| v.to_string()))
    }

    fn click(&mut self, handle: &NodeHandle, timeout: Duration) -> Result<(), SessionError> {
        let target = {
            let page = self.page()?;
            let el = self.element(page, handle)?;
            self.click_target(page, el)?
        };
        match target {
            Some(url) => {
                debug!("Click navigates to {}", url);
                self.load(url, timeout)
            }
            None => {
                debug!("Click handled in place");
                Ok(())
            }
        }
    }

    fn type_text(&mut self, handle: &NodeHandle, text: &str) -> Result<(), SessionError> {
        {
            let page = self.page()?;
            let el = self.element(page, handle)?;
            let tag = el.value().name();
            if tag != "input" && tag != "textarea" {
                return Err(SessionError::NotEditable(format!("<{}>", tag)));
            }
        }
        self.typed.insert(handle.ordinal, text.to_string());
        Ok(())
    }

    fn back(&mut self, _timeout: Duration) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let mut prev = self.history.pop().ok_or(SessionError::NoHistory)?;
        self.generation += 1;
        prev.generation = self.generation;
        self.current = Some(prev);
        self.typed.clear();
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.current.as_ref().map(|p| p.url.to_string())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        self.current = None;
        self.history.clear();
        self.typed.clear();
        Ok(())
    }
}

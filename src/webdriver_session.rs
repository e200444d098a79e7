//! [`Session`] backed by a real browser through a WebDriver endpoint.

use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thirtyfour::error::WebDriverError;
use thirtyfour::{By, DesiredCapabilities, WebDriver, WebElement};
use tokio::runtime::Runtime;

use crate::session::{Session, SessionError};

const POLL: Duration = Duration::from_millis(250);

fn classify(e: WebDriverError) -> SessionError {
    match e {
        WebDriverError::StaleElementReference(_) | WebDriverError::NoSuchElement(_) => SessionError::StaleHandle,
        WebDriverError::ElementNotInteractable(_) | WebDriverError::ElementClickIntercepted(_) => {
            SessionError::NotClickable(e.to_string())
        }
        WebDriverError::InvalidSelector(_) => SessionError::InvalidSelector(e.to_string()),
        WebDriverError::Timeout(_) => SessionError::timeout("webdriver command", Duration::ZERO),
        other => SessionError::WebDriver(other.to_string()),
    }
}

pub struct WebDriverSession {
    runtime: Runtime,
    driver: Option<WebDriver>,
}

impl WebDriverSession {
    /// Starts a Chrome session on the WebDriver server at `server_url`.
    pub fn connect(server_url: &str) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| SessionError::WebDriver(e.to_string()))?;

        let caps = DesiredCapabilities::chrome();
        let driver = runtime
            .block_on(WebDriver::new(server_url, caps))
            .map_err(|e| SessionError::WebDriver(e.to_string()))?;
        if let Err(e) = runtime.block_on(driver.maximize_window()) {
            warn!("Could not maximize browser window: {}", e);
        }
        info!("Connected to WebDriver at {}", server_url);

        Ok(WebDriverSession {
            runtime,
            driver: Some(driver),
        })
    }

    fn driver(&self) -> Result<&WebDriver, SessionError> {
        self.driver.as_ref().ok_or(SessionError::Closed)
    }

    /// Runs a driver command, giving up once `timeout` elapses.
    fn bounded<T, Fut>(&self, what: &str, timeout: Duration, fut: Fut) -> Result<T, SessionError>
    where
        Fut: Future<Output = Result<T, WebDriverError>>,
    {
        match self.runtime.block_on(tokio::time::timeout(timeout, fut)) {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(SessionError::timeout(what, timeout)),
        }
    }
}

impl Session for WebDriverSession {
    type Handle = WebElement;

    fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        info!("Visiting: {}", url);
        let driver = self.driver()?;
        self.bounded(url, timeout, driver.goto(url))
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError> {
        let driver = self.driver()?;
        let deadline = Instant::now() + timeout;
        self.runtime.block_on(async {
            loop {
                let found = driver.find_all(By::Css(selector)).await.map_err(classify)?;
                if !found.is_empty() {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(SessionError::timeout(selector, timeout));
                }
                tokio::time::sleep(POLL).await;
            }
        })
    }

    fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let driver = self.driver()?;
        let deadline = Instant::now() + timeout;
        self.runtime.block_on(async {
            loop {
                let ret = driver
                    .execute("return document.readyState", Vec::new())
                    .await
                    .map_err(classify)?;
                if ret.json().as_str() == Some("complete") {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(SessionError::timeout("document ready state", timeout));
                }
                tokio::time::sleep(POLL).await;
            }
        })
    }

    fn query_all(&self, scope: Option<&WebElement>, selector: &str) -> Result<Vec<WebElement>, SessionError> {
        let driver = self.driver()?;
        let found = match scope {
            Some(el) => self.runtime.block_on(el.find_all(By::Css(selector))),
            None => self.runtime.block_on(driver.find_all(By::Css(selector))),
        };
        found.map_err(classify)
    }

    fn text(&self, handle: &WebElement) -> Result<Option<String>, SessionError> {
        self.driver()?;
        let text = self.runtime.block_on(handle.text()).map_err(classify)?;
        let text = text.trim();
        Ok(if text.is_empty() { None } else { Some(text.to_string()) })
    }

    fn attribute(&self, handle: &WebElement, name: &str) -> Result<Option<String>, SessionError> {
        self.driver()?;
        self.runtime.block_on(handle.attr(name)).map_err(classify)
    }

    fn click(&mut self, handle: &WebElement, timeout: Duration) -> Result<(), SessionError> {
        self.driver()?;
        self.bounded("click", timeout, handle.click())
    }

    fn type_text(&mut self, handle: &WebElement, text: &str) -> Result<(), SessionError> {
        self.driver()?;
        self.runtime.block_on(async {
            handle.clear().await?;
            handle.send_keys(text).await
        })
        .map_err(classify)
    }

    fn back(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let driver = self.driver()?;
        self.bounded("history back", timeout, driver.back())
    }

    fn current_url(&self) -> Option<String> {
        let driver = self.driver.as_ref()?;
        self.runtime.block_on(driver.current_url()).ok().map(|u| u.to_string())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };
        debug!("Quitting WebDriver session");
        self.runtime
            .block_on(driver.quit())
            .map_err(|e| SessionError::WebDriver(e.to_string()))
    }
}

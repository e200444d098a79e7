pub mod config;
pub mod controller;
pub mod dedup;
pub mod document_session;
pub mod extractor;
pub mod input_loader;
pub mod listing;
pub mod locator;
pub mod logger;
pub mod navigator;
pub mod posted_date;
pub mod retry;
pub mod scanner;
pub mod session;
pub mod sink;
#[cfg(feature = "webdriver")]
pub mod webdriver_session;

// Exporting types for convenience
pub use config::{CrawlConfig, ExtractionMode, MaxPages};
pub use controller::{CrawlController, CrawlError, CrawlSummary, TargetError};
pub use dedup::DedupStore;
pub use document_session::{DocumentSession, HttpSource, StaticPages};
pub use listing::{CrawlTarget, JobListing};
pub use navigator::{NavigationMode, SearchNavigator};
pub use session::{Session, SessionError, SessionGuard};
pub use sink::{CsvSink, PersistenceError, RecordSink};
#[cfg(feature = "webdriver")]
pub use webdriver_session::WebDriverSession;

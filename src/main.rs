use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, warn};

use job_crawler_lib::config::{CrawlConfig, MaxPages};
use job_crawler_lib::controller::{CrawlController, CrawlError};
use job_crawler_lib::dedup::DedupStore;
use job_crawler_lib::document_session::{DocumentSession, HttpSource};
use job_crawler_lib::listing::CrawlTarget;
use job_crawler_lib::session::{Session, SessionError};
use job_crawler_lib::sink::{self, CsvSink};
use job_crawler_lib::{input_loader, logger};

#[derive(Parser)]
#[command(name = "job-crawler")]
#[command(about = "Crawl paginated job search results into an append-only CSV")]
#[command(version)]
struct Cli {
    /// TOML config file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV or Excel file with Keyword and Location columns
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output CSV, appended to across runs
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Search keyword (repeatable); replaces the configured keywords
    #[arg(short, long = "keyword")]
    keywords: Vec<String>,

    /// Location filter (repeatable); replaces the configured locations
    #[arg(short, long = "location")]
    locations: Vec<String>,

    /// Pages per target: a positive number or "unbounded"
    #[arg(long)]
    max_pages: Option<MaxPages>,

    /// WebDriver server URL; drives a real browser instead of plain HTTP
    #[arg(long, env = "JOB_CRAWLER_WEBDRIVER")]
    webdriver: Option<String>,

    /// Write a full snapshot of this run to <SNAPSHOT>.csv and <SNAPSHOT>.xlsx
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Write this run's records as a JSON array
    #[arg(long)]
    json: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut CrawlConfig) {
        if !self.keywords.is_empty() {
            config.keywords = self.keywords.clone();
        }
        if !self.locations.is_empty() {
            config.locations = self.locations.clone();
        }
        if let Some(max) = self.max_pages {
            config.max_pages = max;
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if self.snapshot.is_some() {
            config.snapshot = self.snapshot.clone();
        }
        if self.json.is_some() {
            config.json_dump = self.json.clone();
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    info!("Starting job crawler...");

    let cli = Cli::parse();
    let mut config = CrawlConfig::load(cli.config.as_deref()).map_err(CrawlError::from)?;
    cli.apply(&mut config);

    let targets = match &cli.input {
        Some(path) => input_loader::load_targets(path).map_err(CrawlError::from)?,
        None => config.targets(),
    };
    if targets.is_empty() {
        error!("No search targets. Provide keywords in the config, with --keyword, or via --input.");
        return Ok(());
    }
    info!("{} targets, max pages {:?}, {:?} navigation, {:?} extraction", targets.len(), config.max_pages, config.navigation, config.extraction);

    match cli.webdriver.as_deref() {
        Some(url) => crawl_with_browser(&config, &targets, url),
        None => crawl(&config, &targets, || Ok(DocumentSession::new(HttpSource::new()?))),
    }
}

#[cfg(feature = "webdriver")]
fn crawl_with_browser(config: &CrawlConfig, targets: &[CrawlTarget], url: &str) -> Result<(), Box<dyn Error>> {
    use job_crawler_lib::webdriver_session::WebDriverSession;

    crawl(config, targets, || WebDriverSession::connect(url))
}

#[cfg(not(feature = "webdriver"))]
fn crawl_with_browser(_config: &CrawlConfig, _targets: &[CrawlTarget], url: &str) -> Result<(), Box<dyn Error>> {
    Err(format!("--webdriver {} requires a build with the `webdriver` feature", url).into())
}

fn crawl<S, F>(config: &CrawlConfig, targets: &[CrawlTarget], factory: F) -> Result<(), Box<dyn Error>>
where
    S: Session,
    F: FnMut() -> Result<S, SessionError>,
{
    let dedup = DedupStore::load(&config.output).map_err(CrawlError::from)?;
    let csv_sink = CsvSink::open(&config.output).map_err(CrawlError::from)?;

    let mut controller = CrawlController::from_config(config, factory, csv_sink, dedup).map_err(CrawlError::from)?;
    let summary = controller.run(targets, config.max_pages)?;

    info!(
        "Visited {} pages, saw {} cards, wrote {} new records, skipped {} duplicates, dropped {} cards.",
        summary.pages_visited,
        summary.cards_seen,
        summary.records_written,
        summary.duplicates_skipped,
        summary.cards_dropped
    );
    if summary.targets_failed > 0 {
        warn!("{} of {} targets failed; see the log above.", summary.targets_failed, summary.targets);
    }

    let records = controller.records();
    if let Some(base) = &config.snapshot {
        sink::export_snapshot(records, base).map_err(CrawlError::from)?;
    }
    if let Some(path) = &config.json_dump {
        sink::write_json_dump(records, path).map_err(CrawlError::from)?;
    }
    Ok(())
}

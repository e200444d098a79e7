use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::listing::CrawlTarget;
use crate::locator::{FieldName, Locator, LocatorTable};
use crate::navigator::{FormSelectors, NavigationMode};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid locator override: {0}")]
    Locator(String),
}

/// How far to paginate each target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "MaxPagesRepr")]
pub enum MaxPages {
    Bounded(u32),
    Unbounded,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaxPagesRepr {
    Count(i64),
    Word(String),
}

impl TryFrom<MaxPagesRepr> for MaxPages {
    type Error = String;

    fn try_from(repr: MaxPagesRepr) -> Result<Self, Self::Error> {
        match repr {
            MaxPagesRepr::Count(n) if n >= 1 && n <= u32::MAX as i64 => Ok(MaxPages::Bounded(n as u32)),
            MaxPagesRepr::Count(n) => Err(format!("max_pages must be positive, got {}", n)),
            MaxPagesRepr::Word(w) => w.parse(),
        }
    }
}

impl FromStr for MaxPages {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(MaxPages::Unbounded);
        }
        match s.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(MaxPages::Bounded(n)),
            _ => Err(format!("expected a positive integer or \"unbounded\", got `{}`", s)),
        }
    }
}

impl MaxPages {
    pub fn allows(&self, page: u32) -> bool {
        match self {
            MaxPages::Bounded(n) => page <= *n,
            MaxPages::Unbounded => true,
        }
    }
}

impl Default for MaxPages {
    fn default() -> Self {
        MaxPages::Bounded(3)
    }
}

/// Where listing fields are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Straight off the result cards.
    #[default]
    Cards,
    /// From the detail view opened by clicking each card.
    Detail,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub navigation_secs: u64,
    pub readiness_secs: u64,
    pub consent_secs: u64,
    pub detail_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            navigation_secs: 90,
            readiness_secs: 30,
            consent_secs: 2,
            detail_secs: 10,
        }
    }
}

impl Timeouts {
    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn consent(&self) -> Duration {
        Duration::from_secs(self.consent_secs)
    }

    pub fn detail(&self) -> Duration {
        Duration::from_secs(self.detail_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Length of one backoff unit.
    pub unit_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            unit_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::with_unit(Duration::from_millis(self.unit_ms))
        }
    }
}

/// Per-field locator chains replacing the built-in ones, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocatorOverrides {
    pub card: HashMap<String, Vec<Locator>>,
    pub detail: HashMap<String, Vec<Locator>>,
}

fn by_field(raw: &HashMap<String, Vec<Locator>>) -> Result<HashMap<FieldName, Vec<Locator>>, ConfigError> {
    raw.iter()
        .map(|(name, chain)| {
            let field = name.parse::<FieldName>().map_err(ConfigError::Locator)?;
            Ok((field, chain.clone()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub base_url: String,
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub max_pages: MaxPages,
    pub navigation: NavigationMode,
    pub extraction: ExtractionMode,
    /// Path template for direct navigation; `{keyword}` and `{location}` are substituted.
    pub search_path: String,
    pub output: PathBuf,
    pub snapshot: Option<PathBuf>,
    pub json_dump: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub retry: RetrySettings,
    pub form: FormSelectors,
    pub locators: LocatorOverrides,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            base_url: "https://hk.jobsdb.com".to_string(),
            keywords: [
                "Machine Learning",
                "AI",
                "AI Research",
                "Data Engineer",
                "Data Scientist",
                "Data Analyst",
                "Data Architecture",
                "Data Modeling",
                "Data Engineering",
                "Data Science",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            locations: Vec::new(),
            max_pages: MaxPages::default(),
            navigation: NavigationMode::default(),
            extraction: ExtractionMode::default(),
            search_path: "/hk/search-jobs/{keyword}".to_string(),
            output: PathBuf::from("job_postings.csv"),
            snapshot: None,
            json_dump: Some(PathBuf::from("job_postings.json")),
            timeouts: Timeouts::default(),
            retry: RetrySettings::default(),
            form: FormSelectors::default(),
            locators: LocatorOverrides::default(),
        }
    }
}

impl CrawlConfig {
    /// Reads a TOML config, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given. Using built-in defaults.");
            return Ok(CrawlConfig::default());
        };

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn targets(&self) -> Vec<CrawlTarget> {
        CrawlTarget::cross(&self.keywords, &self.locations)
    }

    /// Locators for the active extraction mode, with overrides applied.
    pub fn locator_table(&self) -> Result<LocatorTable, ConfigError> {
        let table = match self.extraction {
            ExtractionMode::Cards => LocatorTable::jobsdb_cards().merged(&by_field(&self.locators.card)?),
            ExtractionMode::Detail => LocatorTable::jobsdb_detail().merged(&by_field(&self.locators.detail)?),
        };
        Ok(table)
    }

    /// Locators used on result cards regardless of mode.
    pub fn card_table(&self) -> Result<LocatorTable, ConfigError> {
        Ok(LocatorTable::jobsdb_cards().merged(&by_field(&self.locators.card)?))
    }
}

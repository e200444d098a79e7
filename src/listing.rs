use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Output columns, in the order they are written.
pub const COLUMNS: [&str; 11] = [
    "search_keyword",
    "location",
    "job_title",
    "company_name",
    "company_profile_url",
    "job_url",
    "industry",
    "work_type",
    "posted_time_raw",
    "posted_date",
    "job_description",
];

/// One scraped posting. Field order matches [`COLUMNS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub search_keyword: String,
    pub location: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub company_profile_url: Option<String>,
    /// Absolute URL of the posting; the dedup key.
    pub job_url: String,
    pub industry: Option<String>,
    pub work_type: Option<String>,
    #[serde(rename = "posted_time_raw")]
    pub posted_raw_text: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub job_description: Option<String>,
}

impl JobListing {
    /// Cell values in [`COLUMNS`] order; `None` is an empty cell.
    pub fn cells(&self) -> [Option<String>; 11] {
        [
            Some(self.search_keyword.clone()),
            self.location.clone(),
            self.job_title.clone(),
            self.company_name.clone(),
            self.company_profile_url.clone(),
            Some(self.job_url.clone()),
            self.industry.clone(),
            self.work_type.clone(),
            self.posted_raw_text.clone(),
            self.posted_date.map(|d| d.format("%Y-%m-%d").to_string()),
            self.job_description.clone(),
        ]
    }
}

/// A keyword, optionally narrowed to a location, crawled independently.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CrawlTarget {
    pub keyword: String,
    pub location: Option<String>,
}

impl CrawlTarget {
    pub fn new(keyword: impl Into<String>, location: Option<String>) -> Self {
        CrawlTarget {
            keyword: keyword.into(),
            location,
        }
    }

    /// Every keyword for every location, locations outermost.
    pub fn cross(keywords: &[String], locations: &[String]) -> Vec<CrawlTarget> {
        if locations.is_empty() {
            return keywords.iter().map(|k| CrawlTarget::new(k.clone(), None)).collect();
        }
        locations
            .iter()
            .flat_map(|loc| {
                keywords
                    .iter()
                    .map(move |k| CrawlTarget::new(k.clone(), Some(loc.clone())))
            })
            .collect()
    }
}

impl fmt::Display for CrawlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "'{}' in '{}'", self.keyword, loc),
            None => write!(f, "'{}'", self.keyword),
        }
    }
}

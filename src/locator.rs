use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    JobTitle,
    CompanyName,
    CompanyProfileUrl,
    JobUrl,
    Location,
    PostedRawText,
    Industry,
    WorkType,
    JobDescription,
}

impl FieldName {
    pub const ALL: [FieldName; 9] = [
        FieldName::JobTitle,
        FieldName::CompanyName,
        FieldName::CompanyProfileUrl,
        FieldName::JobUrl,
        FieldName::Location,
        FieldName::PostedRawText,
        FieldName::Industry,
        FieldName::WorkType,
        FieldName::JobDescription,
    ];

    /// Fields whose values are links and must end up absolute.
    pub fn is_url(self) -> bool {
        matches!(self, FieldName::JobUrl | FieldName::CompanyProfileUrl)
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "posted_time_raw" {
            return Ok(FieldName::PostedRawText);
        }
        FieldName::ALL
            .into_iter()
            .find(|f| f.to_string() == s)
            .ok_or_else(|| format!("unknown field `{}`", s))
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldName::JobTitle => "job_title",
            FieldName::CompanyName => "company_name",
            FieldName::CompanyProfileUrl => "company_profile_url",
            FieldName::JobUrl => "job_url",
            FieldName::Location => "location",
            FieldName::PostedRawText => "posted_raw_text",
            FieldName::Industry => "industry",
            FieldName::WorkType => "work_type",
            FieldName::JobDescription => "job_description",
        };
        f.write_str(name)
    }
}

/// One way of finding a value inside a card or detail view.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// Text of the first element matching `css`.
    Text { css: String },
    /// Attribute `name` of the first element matching `css`.
    Attribute { css: String, name: String },
    /// First "Posted N<unit> ago" phrase found in any element matching `css`.
    PostedPhrase { css: String },
}

impl Locator {
    pub fn text(css: &str) -> Self {
        Locator::Text { css: css.to_string() }
    }

    pub fn attr(css: &str, name: &str) -> Self {
        Locator::Attribute {
            css: css.to_string(),
            name: name.to_string(),
        }
    }

    pub fn posted_phrase(css: &str) -> Self {
        Locator::PostedPhrase { css: css.to_string() }
    }

    pub fn css(&self) -> &str {
        match self {
            Locator::Text { css } | Locator::Attribute { css, .. } | Locator::PostedPhrase { css } => css,
        }
    }
}

/// Ordered fallback locators per field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatorTable {
    chains: HashMap<FieldName, Vec<Locator>>,
}

impl LocatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: FieldName, chain: Vec<Locator>) -> Self {
        self.chains.insert(field, chain);
        self
    }

    pub fn chain(&self, field: FieldName) -> &[Locator] {
        self.chains.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces whole chains for the fields present in `overrides`.
    pub fn merged(mut self, overrides: &HashMap<FieldName, Vec<Locator>>) -> Self {
        for (field, chain) in overrides {
            self.chains.insert(*field, chain.clone());
        }
        self
    }

    /// Fields as they appear on a search-results card.
    pub fn jobsdb_cards() -> Self {
        LocatorTable::new()
            .with(
                FieldName::JobTitle,
                vec![
                    Locator::text("a[data-automation='jobTitle']"),
                    Locator::text("a[aria-label]"),
                    Locator::text("a[title]"),
                ],
            )
            .with(
                FieldName::JobUrl,
                vec![
                    Locator::attr("a[data-automation='jobTitle']", "href"),
                    Locator::attr("a[aria-label]", "href"),
                    Locator::attr("a[title]", "href"),
                ],
            )
            .with(
                FieldName::CompanyName,
                vec![
                    Locator::text("[data-automation='jobCompany']"),
                    Locator::text("[data-automation='job-card-company-name']"),
                    Locator::text(".company"),
                ],
            )
            .with(
                FieldName::CompanyProfileUrl,
                vec![
                    Locator::attr("a[href*='/companies/']", "href"),
                    Locator::attr("a[href*='/company/']", "href"),
                ],
            )
            .with(
                FieldName::Location,
                vec![
                    Locator::text("[data-automation='jobLocation']"),
                    Locator::text(".job-location"),
                ],
            )
            .with(
                FieldName::PostedRawText,
                vec![
                    Locator::text("[data-automation='jobListingDate'] time"),
                    Locator::text("[data-automation='jobListingDate']"),
                    Locator::text("time"),
                    Locator::text(".job-date"),
                ],
            )
            .with(
                FieldName::Industry,
                vec![
                    Locator::text("[data-automation='jobClassification']"),
                    Locator::text("[data-automation='jobSubClassification']"),
                ],
            )
            .with(
                FieldName::WorkType,
                vec![Locator::text("[data-automation='jobWorkType']")],
            )
            .with(
                FieldName::JobDescription,
                vec![Locator::text("[data-automation='jobShortDescription']")],
            )
    }

    /// Fields as they appear on an opened job detail view.
    pub fn jobsdb_detail() -> Self {
        LocatorTable::new()
            .with(
                FieldName::JobTitle,
                vec![
                    Locator::text("[data-automation='job-detail-title']"),
                    Locator::text("h1"),
                ],
            )
            .with(
                FieldName::CompanyName,
                vec![Locator::text("[data-automation='advertiser-name']")],
            )
            .with(
                FieldName::JobUrl,
                vec![
                    Locator::attr("[data-automation='job-detail-apply']", "href"),
                    Locator::attr("link[rel='canonical']", "href"),
                ],
            )
            .with(
                FieldName::CompanyProfileUrl,
                vec![
                    Locator::attr("a[href*='/companies/']", "href"),
                    Locator::attr("a[href*='/company/']", "href"),
                ],
            )
            .with(
                FieldName::Location,
                vec![Locator::text("[data-automation='job-detail-location']")],
            )
            .with(
                FieldName::PostedRawText,
                vec![
                    Locator::text("[data-automation='job-detail-date']"),
                    Locator::posted_phrase("span, div, p"),
                ],
            )
            .with(
                FieldName::Industry,
                vec![Locator::text("[data-automation='job-detail-classifications']")],
            )
            .with(
                FieldName::WorkType,
                vec![Locator::text("[data-automation='job-detail-work-type']")],
            )
            .with(
                FieldName::JobDescription,
                vec![Locator::text("[data-automation='jobAdDetails']")],
            )
    }
}

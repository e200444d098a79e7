use chrono::NaiveDate;
use log::debug;
use regex::Regex;
use url::Url;

use crate::listing::{CrawlTarget, JobListing};
use crate::locator::{FieldName, Locator, LocatorTable};
use crate::posted_date;
use crate::session::{Session, SessionError};

/// Prefixes site-relative paths with `base_origin`; anything else is returned as is.
pub fn resolve_url(base_origin: &str, value: &str) -> String {
    if value.starts_with('/') && !value.starts_with("//") {
        format!("{}{}", base_origin.trim_end_matches('/'), value)
    } else {
        value.to_string()
    }
}

/// Identifier of the posting a job link points at: the `jobId` query value,
/// else the first all-digit path segment.
pub fn posting_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if let Some((_, id)) = parsed.query_pairs().find(|(k, v)| k == "jobId" && !v.is_empty()) {
        return Some(id.into_owned());
    }
    parsed
        .path_segments()?
        .find(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
}

pub struct FieldExtractor {
    table: LocatorTable,
    base_origin: String,
    posted_regex: Regex,
}

impl FieldExtractor {
    pub fn new(table: LocatorTable, base_origin: &str) -> Self {
        FieldExtractor {
            table,
            base_origin: base_origin.to_string(),
            posted_regex: Regex::new(r"(?i)\bposted\s+\d+\s*[dhm]\s+ago\b").expect("static regex"),
        }
    }

    /// Walks the field's locator chain and returns the first non-empty value.
    ///
    /// A locator that matches nothing, or whose query errors, just hands over
    /// to the next one. `None` means every locator came up empty.
    pub fn extract<S: Session>(&self, session: &S, scope: &S::Handle, field: FieldName) -> Option<String> {
        let value = self.table.chain(field).iter().find_map(|locator| {
            match self.try_locator(session, scope, locator) {
                Ok(found) => found,
                Err(e) => {
                    debug!("{} locator `{}` failed: {}", field, locator.css(), e);
                    None
                }
            }
        });

        match value {
            Some(v) if field.is_url() => Some(resolve_url(&self.base_origin, &v)),
            Some(v) => Some(v),
            None => {
                debug!("No value for {}", field);
                None
            }
        }
    }

    fn try_locator<S: Session>(
        &self,
        session: &S,
        scope: &S::Handle,
        locator: &Locator,
    ) -> Result<Option<String>, SessionError> {
        let matches = session.query_all(Some(scope), locator.css())?;

        let raw = match locator {
            Locator::Text { .. } => match matches.first() {
                Some(h) => session.text(h)?,
                None => None,
            },
            Locator::Attribute { name, .. } => match matches.first() {
                Some(h) => session.attribute(h, name)?,
                None => None,
            },
            Locator::PostedPhrase { .. } => {
                let mut phrase = None;
                for h in &matches {
                    let Some(text) = session.text(h)? else { continue };
                    if !text.to_lowercase().contains("ago") {
                        continue;
                    }
                    if let Some(m) = self.posted_regex.find(&text) {
                        phrase = Some(m.as_str().to_string());
                        break;
                    }
                }
                phrase
            }
        };

        Ok(raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
    }

    /// Reads every field except the key, which the caller already resolved.
    pub fn read_listing<S: Session>(
        &self,
        session: &S,
        scope: &S::Handle,
        target: &CrawlTarget,
        job_url: String,
        today: NaiveDate,
    ) -> JobListing {
        let get = |field| self.extract(session, scope, field);

        let posted_raw_text = get(FieldName::PostedRawText);
        let posted_date = posted_raw_text
            .as_deref()
            .and_then(|raw| posted_date::resolve(raw, today));

        JobListing {
            search_keyword: target.keyword.clone(),
            location: get(FieldName::Location).or_else(|| target.location.clone()),
            job_title: get(FieldName::JobTitle),
            company_name: get(FieldName::CompanyName),
            company_profile_url: get(FieldName::CompanyProfileUrl),
            job_url,
            industry: get(FieldName::Industry),
            work_type: get(FieldName::WorkType),
            posted_raw_text,
            posted_date,
            job_description: get(FieldName::JobDescription),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_session::{DocumentSession, StaticPages};
    use std::time::Duration;

    const BASE: &str = "https://hk.jobsdb.com";

    fn card_session(html: &str) -> (DocumentSession<StaticPages>, Vec<crate::document_session::NodeHandle>) {
        let pages = StaticPages::new().with_page("https://hk.jobsdb.com/list", html);
        let mut s = DocumentSession::new(pages);
        s.goto("https://hk.jobsdb.com/list", Duration::from_secs(1)).unwrap();
        let cards = s.query_all(None, "article").unwrap();
        (s, cards)
    }

    #[test]
    fn resolves_relative_and_keeps_absolute() {
        assert_eq!(resolve_url(BASE, "/companies/123"), "https://hk.jobsdb.com/companies/123");
        assert_eq!(resolve_url("https://hk.jobsdb.com/", "/job/9"), "https://hk.jobsdb.com/job/9");
        assert_eq!(
            resolve_url(BASE, "https://other.example/companies/1"),
            "https://other.example/companies/1"
        );
    }

    #[test]
    fn posting_ids_from_paths_and_queries() {
        assert_eq!(posting_id("https://hk.jobsdb.com/job/81234567").as_deref(), Some("81234567"));
        assert_eq!(posting_id("https://hk.jobsdb.com/job/81234567/apply").as_deref(), Some("81234567"));
        assert_eq!(
            posting_id("https://hk.jobsdb.com/hk/search-jobs/AI?page=2&jobId=77").as_deref(),
            Some("77")
        );
        assert_eq!(posting_id("https://hk.jobsdb.com/companies/acme"), None);
        assert_eq!(posting_id("/job/1"), None);
    }

    #[test]
    fn falls_back_to_later_markup_variants() {
        let (s, cards) = card_session(
            r#"<article>
                <a title="Data Engineer" href="/job/42">Data Engineer</a>
                <span class="company">Acme</span>
            </article>"#,
        );
        let ex = FieldExtractor::new(LocatorTable::jobsdb_cards(), BASE);

        assert_eq!(ex.extract(&s, &cards[0], FieldName::JobTitle).as_deref(), Some("Data Engineer"));
        assert_eq!(
            ex.extract(&s, &cards[0], FieldName::JobUrl).as_deref(),
            Some("https://hk.jobsdb.com/job/42")
        );
        assert_eq!(ex.extract(&s, &cards[0], FieldName::CompanyName).as_deref(), Some("Acme"));
    }

    #[test]
    fn empty_text_does_not_win() {
        let (s, cards) = card_session(
            r#"<article>
                <span data-automation="jobCompany">   </span>
                <span class="company">Beta Ltd</span>
            </article>"#,
        );
        let ex = FieldExtractor::new(LocatorTable::jobsdb_cards(), BASE);
        assert_eq!(ex.extract(&s, &cards[0], FieldName::CompanyName).as_deref(), Some("Beta Ltd"));
    }

    #[test]
    fn missing_field_is_none_and_the_rest_still_fill() {
        let (s, cards) = card_session(
            r#"<article>
                <a data-automation="jobTitle" href="/job/1">ML Engineer</a>
                <span data-automation="jobCompany">Gamma</span>
                <span data-automation="jobListingDate">Posted 2d ago</span>
            </article>"#,
        );
        let table = LocatorTable::jobsdb_cards()
            .with(FieldName::WorkType, vec![Locator::text("[[broken"), Locator::text(".nope")]);
        let ex = FieldExtractor::new(table, BASE);
        let target = CrawlTarget::new("ML", Some("Hong Kong".into()));
        let today = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();

        let listing = ex.read_listing(&s, &cards[0], &target, "https://hk.jobsdb.com/job/1".into(), today);
        assert_eq!(listing.work_type, None);
        assert_eq!(listing.job_title.as_deref(), Some("ML Engineer"));
        assert_eq!(listing.company_name.as_deref(), Some("Gamma"));
        assert_eq!(listing.location.as_deref(), Some("Hong Kong"));
        assert_eq!(listing.posted_raw_text.as_deref(), Some("Posted 2d ago"));
        assert_eq!(listing.posted_date, NaiveDate::from_ymd_opt(2024, 1, 18));
    }

    #[test]
    fn posted_phrase_is_cut_out_of_surrounding_text() {
        let (s, cards) = card_session(
            r#"<article><div><span>Full time</span><span>Posted 14d ago · More jobs</span></div></article>"#,
        );
        let table = LocatorTable::new().with(FieldName::PostedRawText, vec![Locator::posted_phrase("span")]);
        let ex = FieldExtractor::new(table, BASE);
        assert_eq!(
            ex.extract(&s, &cards[0], FieldName::PostedRawText).as_deref(),
            Some("Posted 14d ago")
        );
    }
}

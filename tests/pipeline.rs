use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use job_crawler_lib::config::{CrawlConfig, ExtractionMode, MaxPages};
use job_crawler_lib::controller::CrawlController;
use job_crawler_lib::dedup::DedupStore;
use job_crawler_lib::document_session::{DocumentSession, StaticPages};
use job_crawler_lib::listing::{CrawlTarget, JobListing};
use job_crawler_lib::navigator::NavigationMode;
use job_crawler_lib::retry::Sleeper;
use job_crawler_lib::sink::{CsvSink, RecordSink};
use job_crawler_lib::CrawlSummary;

const SEARCH: &str = "https://hk.jobsdb.com/hk/search-jobs/Data%20Engineer";

struct NoWait;

impl Sleeper for NoWait {
    fn sleep(&self, _d: Duration) {}
}

fn card(id: u32) -> String {
    format!(
        r#"<article data-automation="job-card">
             <a data-automation="jobTitle" href="/job/{id}">Data Engineer {id}</a>
             <span data-automation="jobCompany">Company {id}</span>
             <a href="/companies/c{id}">profile</a>
             <span data-automation="jobLocation">Kwun Tong</span>
             <span data-automation="jobClassification">Information Technology</span>
             <span data-automation="jobListingDate">Posted {id}d ago</span>
           </article>"#
    )
}

fn results(ids: impl Iterator<Item = u32>, next: Option<&str>) -> String {
    let cards: String = ids.map(card).collect();
    let next = next
        .map(|href| format!(r#"<a rel="next" href="{}">Next</a>"#, href))
        .unwrap_or_default();
    format!(r#"<html><body><div data-automation="job-card-list">{}</div>{}</body></html>"#, cards, next)
}

fn config(output: &Path) -> CrawlConfig {
    CrawlConfig {
        keywords: vec!["Data Engineer".into()],
        output: output.to_path_buf(),
        ..CrawlConfig::default()
    }
}

fn crawl(config: &CrawlConfig, pages: &Arc<StaticPages>, max_pages: MaxPages) -> (CrawlSummary, Vec<JobListing>) {
    let dedup = DedupStore::load(&config.output).unwrap();
    let sink = CsvSink::open(&config.output).unwrap();
    let source = pages.clone();
    let factory = move || Ok(DocumentSession::new(source.clone()));

    let mut controller = CrawlController::from_config(config, factory, sink, dedup)
        .unwrap()
        .with_sleeper(Box::new(NoWait))
        .with_today(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap());
    let summary = controller.run(&config.targets(), max_pages).unwrap();
    (summary, controller.records().to_vec())
}

fn saved(path: &Path) -> Vec<JobListing> {
    csv::Reader::from_path(path)
        .unwrap()
        .deserialize()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn only_unseen_listings_are_appended() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");

    let mut seed = CsvSink::open(&output).unwrap();
    for id in 1..=10 {
        seed.append(&JobListing {
            search_keyword: "Data Engineer".into(),
            job_url: format!("https://hk.jobsdb.com/job/{}", id),
            ..Default::default()
        })
        .unwrap();
    }
    drop(seed);

    let pages = Arc::new(StaticPages::new().with_page(SEARCH, results(1..=15, None)));
    let (summary, records) = crawl(&config(&output), &pages, MaxPages::Bounded(1));

    assert_eq!(summary.records_written, 5);
    assert_eq!(summary.duplicates_skipped, 10);
    assert_eq!(records.len(), 5);

    let rows = saved(&output);
    assert_eq!(rows.len(), 15);
    let unique: HashSet<_> = rows.iter().map(|r| r.job_url.as_str()).collect();
    assert_eq!(unique.len(), 15);

    let eleventh = &rows[10];
    assert_eq!(eleventh.job_url, "https://hk.jobsdb.com/job/11");
    assert_eq!(eleventh.company_profile_url.as_deref(), Some("https://hk.jobsdb.com/companies/c11"));
    assert_eq!(eleventh.industry.as_deref(), Some("Information Technology"));
    assert_eq!(eleventh.posted_date, NaiveDate::from_ymd_opt(2024, 1, 9));
}

#[test]
fn an_empty_page_ends_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let pages = Arc::new(
        StaticPages::new()
            .with_page(SEARCH, results(1..=3, None))
            .with_page(&format!("{}?page=2", SEARCH), results(4..=5, None))
            .with_page(&format!("{}?page=3", SEARCH), "<p>No matching search results</p>"),
    );

    let (summary, _) = crawl(&config(&output), &pages, MaxPages::Bounded(10));

    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.records_written, 5);
    let requested = pages.requests();
    assert_eq!(requested.last().map(String::as_str), Some(&*format!("{}?page=3", SEARCH)));
    assert!(!requested.iter().any(|u| u.ends_with("page=4")));
}

#[test]
fn unbounded_crawl_follows_next_links_until_they_stop() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let page2 = format!("{}?page=2", SEARCH);
    let pages = Arc::new(
        StaticPages::new()
            .with_page(SEARCH, results(1..=2, Some("/hk/search-jobs/Data%20Engineer?page=2")))
            .with_page(&page2, results(3..=4, None)),
    );

    let (summary, _) = crawl(&config(&output), &pages, MaxPages::Unbounded);

    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.records_written, 4);
    assert_eq!(pages.requests().len(), 2);
}

#[test]
fn a_second_run_over_the_same_pages_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let pages = Arc::new(StaticPages::new().with_page(SEARCH, results(1..=4, None)));

    let (first, _) = crawl(&config(&output), &pages, MaxPages::Bounded(1));
    let (second, _) = crawl(&config(&output), &pages, MaxPages::Bounded(1));

    assert_eq!(first.records_written, 4);
    assert_eq!(second.records_written, 0);
    assert_eq!(saved(&output).len(), 4);
}

#[test]
fn missing_fields_are_left_empty() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let bare = r#"<div data-automation="job-card-list">
                    <article data-automation="job-card"><a title="Analyst" href="/job/77">Analyst</a></article>
                  </div>"#;
    let pages = Arc::new(StaticPages::new().with_page(SEARCH, bare));

    crawl(&config(&output), &pages, MaxPages::Bounded(1));

    let rows = saved(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_title.as_deref(), Some("Analyst"));
    assert_eq!(rows[0].company_name, None);
    assert_eq!(rows[0].posted_raw_text, None);
    assert_eq!(rows[0].posted_date, None);
}

#[test]
fn transient_failures_are_retried_and_dead_targets_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let pages = Arc::new(
        StaticPages::new()
            .with_page(SEARCH, results(1..=2, None))
            .failing(SEARCH, 2)
            .failing("https://hk.jobsdb.com/hk/search-jobs/Gone", 10),
    );
    let cfg = CrawlConfig {
        keywords: vec!["Gone".into(), "Data Engineer".into()],
        ..config(&output)
    };

    let (summary, _) = crawl(&cfg, &pages, MaxPages::Bounded(1));

    assert_eq!(summary.targets_failed, 1);
    assert_eq!(summary.records_written, 2);
    assert_eq!(pages.requests().iter().filter(|u| u.as_str() == SEARCH).count(), 3);
}

#[test]
fn form_navigation_with_detail_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let home = r#"<form action="/jobs">
                    <input id="keywords-input" name="keywords">
                    <input id="SearchBar__Where" name="where">
                    <button data-automation="searchButton">Seek</button>
                  </form>"#;
    let detail = r#"<html><head><link rel="canonical" href="https://hk.jobsdb.com/job/5"></head><body>
                      <h1 data-automation="job-detail-title">Senior Data Engineer</h1>
                      <span data-automation="advertiser-name">Harbour Analytics</span>
                      <span data-automation="job-detail-location">Central</span>
                      <span data-automation="job-detail-work-type">Contract</span>
                      <span>Posted 3h ago</span>
                      <div data-automation="jobAdDetails">Own the pipelines.</div>
                    </body></html>"#;
    let pages = Arc::new(
        StaticPages::new()
            .with_page("https://hk.jobsdb.com/", home)
            .with_page(
                "https://hk.jobsdb.com/jobs?keywords=Data+Engineer&where=Hong+Kong",
                results(5..=5, None),
            )
            .with_page("https://hk.jobsdb.com/job/5", detail),
    );
    let cfg = CrawlConfig {
        locations: vec!["Hong Kong".into()],
        navigation: NavigationMode::Form,
        extraction: ExtractionMode::Detail,
        ..config(&output)
    };
    assert_eq!(cfg.targets(), vec![CrawlTarget::new("Data Engineer", Some("Hong Kong".into()))]);

    let (summary, records) = crawl(&cfg, &pages, MaxPages::Bounded(3));

    assert_eq!(summary.records_written, 1);
    let rec = &records[0];
    assert_eq!(rec.job_url, "https://hk.jobsdb.com/job/5");
    assert_eq!(rec.job_title.as_deref(), Some("Senior Data Engineer"));
    assert_eq!(rec.location.as_deref(), Some("Central"));
    assert_eq!(rec.work_type.as_deref(), Some("Contract"));
    assert_eq!(rec.posted_raw_text.as_deref(), Some("Posted 3h ago"));
    assert_eq!(rec.posted_date, NaiveDate::from_ymd_opt(2024, 1, 20));
    assert_eq!(rec.job_description.as_deref(), Some("Own the pipelines."));
}

#[test]
fn a_card_found_by_two_keywords_is_saved_once() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let pages = Arc::new(
        StaticPages::new()
            .with_page(SEARCH, results(1..=1, None))
            .with_page("https://hk.jobsdb.com/hk/search-jobs/ETL", results(1..=1, None)),
    );
    let cfg = CrawlConfig {
        keywords: vec!["Data Engineer".into(), "ETL".into()],
        ..config(&output)
    };

    let (summary, records) = crawl(&cfg, &pages, MaxPages::Bounded(1));

    assert_eq!(summary.records_written, 1);
    assert_eq!(summary.duplicates_skipped, 1);
    assert_eq!(records[0].search_keyword, "Data Engineer");
    assert_eq!(saved(&output).len(), 1);
}

#[test]
fn detail_reruns_key_on_the_card_link() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let detail = r#"<html><body><div data-automation="jobDetailsPage">
                      <h1 data-automation="job-detail-title">Data Engineer 1</h1>
                      <a data-automation="job-detail-apply" href="/job/1/apply">Quick apply</a>
                    </div></body></html>"#;
    let pages = Arc::new(
        StaticPages::new()
            .with_page(SEARCH, results(1..=1, None))
            .with_page("https://hk.jobsdb.com/job/1", detail),
    );
    let cfg = CrawlConfig {
        extraction: ExtractionMode::Detail,
        ..config(&output)
    };

    let (first, records) = crawl(&cfg, &pages, MaxPages::Bounded(1));
    let (second, _) = crawl(&cfg, &pages, MaxPages::Bounded(1));

    assert_eq!(first.records_written, 1);
    assert_eq!(records[0].job_url, "https://hk.jobsdb.com/job/1");
    assert_eq!(second.records_written, 0);
    assert_eq!(second.duplicates_skipped, 1);
    let opened = pages.requests().iter().filter(|u| u.ends_with("/job/1")).count();
    assert_eq!(opened, 1);
    assert_eq!(saved(&output).len(), 1);
}

#[test]
fn switching_extraction_mode_does_not_duplicate_rows() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("jobs.csv");
    let pages = Arc::new(StaticPages::new().with_page(SEARCH, results(1..=2, None)));

    let (cards, _) = crawl(&config(&output), &pages, MaxPages::Bounded(1));
    let detail = CrawlConfig {
        extraction: ExtractionMode::Detail,
        ..config(&output)
    };
    let (details, _) = crawl(&detail, &pages, MaxPages::Bounded(1));

    assert_eq!(cards.records_written, 2);
    assert_eq!(details.records_written, 0);
    assert_eq!(details.duplicates_skipped, 2);
    assert_eq!(saved(&output).len(), 2);
}

use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn relative_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:posted\s+)?(\d+)\s*([dhm])\s+ago$").expect("static regex")
    })
}

/// Turns "Posted 14d ago" style text into a calendar date.
///
/// Only day, hour and minute offsets are understood. Hours and minutes
/// collapse to `today`, so a posting from 3h ago and one from 20m ago both
/// land on the same date as anything posted earlier today.
pub fn resolve(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = relative_regex().captures(raw.trim())?;
    let amount: i64 = caps[1].parse().ok()?;

    match caps[2].to_ascii_lowercase().as_str() {
        "d" => today.checked_sub_signed(Duration::days(amount)),
        "h" | "m" => Some(today),
        _ => None,
    }
}

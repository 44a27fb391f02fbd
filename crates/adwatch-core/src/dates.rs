//! Resolution of relative and partial date phrases into calendar dates.
//!
//! Listing sites print posting dates the way a person would ("Heute, 14:02",
//! "Gestern", "vor 3 Tagen") or as plain numeric dates. Everything is resolved
//! against a caller-supplied reference date before it reaches the catalog.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;

const TODAY_WORDS: &[&str] = &["heute", "today"];
const YESTERDAY_WORDS: &[&str] = &["gestern", "yesterday"];

static DAYS_AGO_DE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"vor\s+(\d+)\s+tag").expect("valid days-ago regex"));
static DAYS_AGO_EN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+days?\s+ago").expect("valid days-ago regex"));

const ABSOLUTE_FORMATS: &[&str] = &["%d.%m.%Y", "%Y-%m-%d"];

/// Resolve `text` against `reference`.
///
/// First match wins: a leading "today" word, a leading "yesterday" word,
/// "N days ago", then an exact `DD.MM.YYYY` or `YYYY-MM-DD`. Anything else
/// yields `None`, which callers store as an absent date.
pub fn resolve_relative_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    if TODAY_WORDS.iter().any(|w| normalized.starts_with(w)) {
        return Some(reference);
    }
    if YESTERDAY_WORDS.iter().any(|w| normalized.starts_with(w)) {
        return reference.checked_sub_signed(Duration::days(1));
    }

    let days_ago = DAYS_AGO_DE
        .captures(&normalized)
        .or_else(|| DAYS_AGO_EN.captures(&normalized))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok());
    if let Some(days) = days_ago {
        return Duration::try_days(days).and_then(|d| reference.checked_sub_signed(d));
    }

    ABSOLUTE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&normalized, fmt).ok())
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn resolve(text: &str) -> Option<String> {
        resolve_relative_date(text, reference()).map(format_iso_date)
    }

    #[test]
    fn german_relative_phrases() {
        assert_eq!(resolve("Heute").as_deref(), Some("2024-03-10"));
        assert_eq!(resolve("Gestern").as_deref(), Some("2024-03-09"));
        assert_eq!(resolve("vor 3 Tagen").as_deref(), Some("2024-03-07"));
        assert_eq!(resolve("vor 1 Tag").as_deref(), Some("2024-03-09"));
    }

    #[test]
    fn leading_word_wins_over_trailing_time() {
        assert_eq!(resolve("  Heute, 14:02 ").as_deref(), Some("2024-03-10"));
        assert_eq!(resolve("GESTERN, 09:15").as_deref(), Some("2024-03-09"));
    }

    #[test]
    fn english_equivalents() {
        assert_eq!(resolve("today").as_deref(), Some("2024-03-10"));
        assert_eq!(resolve("Yesterday").as_deref(), Some("2024-03-09"));
        assert_eq!(resolve("posted 10 days ago").as_deref(), Some("2024-02-29"));
    }

    #[test]
    fn absolute_dates_are_normalized() {
        assert_eq!(resolve("01.02.2023").as_deref(), Some("2023-02-01"));
        assert_eq!(resolve("2023-12-24").as_deref(), Some("2023-12-24"));
    }

    #[test]
    fn unresolvable_text_is_absent() {
        assert_eq!(resolve("not a date"), None);
        assert_eq!(resolve(""), None);
        assert_eq!(resolve("31.02.2023"), None);
        assert_eq!(resolve("01.02.2023 12:00"), None);
    }

    #[test]
    fn resolution_is_deterministic() {
        assert_eq!(resolve("vor 5 Tagen"), resolve("vor 5 Tagen"));
        assert_eq!(parse_iso_date("2024-03-05"), resolve_relative_date("vor 5 Tagen", reference()));
    }
}

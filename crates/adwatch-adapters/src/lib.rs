//! Feed and detail-page adapters: the ports the sync pipeline consumes plus
//! their HTTP/RSS/HTML implementations.

use adwatch_core::{
    extract_listing_id, parse_euro_price, resolve_relative_date, EnrichmentPatch, IdentityError,
    ListingCandidate,
};
use adwatch_storage::FetchError;
use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod detail;
mod feed;

pub use detail::{HtmlFieldExtractor, HttpDetailFetcher};
pub use feed::{parse_feed, HttpFeedFetcher};

pub const CRATE_NAME: &str = "adwatch-adapters";

/// One entry as it appears in a polled feed, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFeedEntry {
    pub link: String,
    pub title: String,
    /// Possibly HTML-bearing teaser text.
    pub summary: String,
    pub published: Option<String>,
    pub image: Option<String>,
}

/// Best-effort raw text pulled out of a detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDetailFields {
    pub description: Option<String>,
    pub price_text: Option<String>,
    pub location: Option<String>,
    pub date_text: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed feed: {0}")]
    Feed(String),
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawFeedEntry>, AdapterError>;
}

#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch_detail(&self, url: &str) -> Result<String, AdapterError>;
}

pub trait FieldExtractor: Send + Sync {
    fn extract(&self, page: &str) -> RawDetailFields;
}

/// Builds the catalog candidate for one feed entry.
///
/// Fails only when the link carries no identity; every other field degrades
/// to absent.
pub fn candidate_from_entry(
    entry: &RawFeedEntry,
    today: NaiveDate,
) -> Result<ListingCandidate, IdentityError> {
    let id = extract_listing_id(&entry.link)?.to_string();

    let summary = Html::parse_fragment(&entry.summary);
    let text = joined_text(summary.root_element().text());
    let location = Selector::parse(".location")
        .ok()
        .and_then(|sel| summary.select(&sel).next())
        .and_then(|el| non_empty(el.text().map(str::trim).collect::<String>()));

    Ok(ListingCandidate {
        id,
        title: entry.title.trim().to_string(),
        price: parse_euro_price(&text),
        location,
        date_posted: entry
            .published
            .as_deref()
            .and_then(|p| resolve_relative_date(p, today)),
        link: entry.link.trim().to_string(),
        image: entry.image.clone().and_then(non_empty),
    })
}

/// Turns extracted detail text into a fill-or-replace patch.
pub fn patch_from_fields(fields: &RawDetailFields, today: NaiveDate) -> EnrichmentPatch {
    EnrichmentPatch {
        price: fields.price_text.as_deref().and_then(parse_euro_price),
        location: fields.location.clone().and_then(non_empty),
        date_posted: fields
            .date_text
            .as_deref()
            .and_then(|d| resolve_relative_date(d, today)),
        image: fields.image.clone().and_then(non_empty),
        body_text: fields.description.clone().and_then(non_empty),
    }
}

/// Trimmed text fragments joined by single spaces.
pub(crate) fn joined_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn entry(link: &str) -> RawFeedEntry {
        RawFeedEntry {
            link: link.to_string(),
            title: "  Damenrad 28 Zoll ".to_string(),
            summary: r#"<p>Gut erhalten. <b>1.250 €</b> VB</p><span class="location"> 10115 Berlin </span>"#
                .to_string(),
            published: Some("Gestern, 18:20".to_string()),
            image: Some("https://img.example/rad.jpg".to_string()),
        }
    }

    #[test]
    fn candidate_takes_id_price_location_and_date() {
        let candidate =
            candidate_from_entry(&entry("https://example.com/s-anzeige/rad/2567890123?ref=rss"), today())
                .unwrap();
        assert_eq!(candidate.id, "2567890123");
        assert_eq!(candidate.title, "Damenrad 28 Zoll");
        assert_eq!(candidate.price, Some(1250));
        assert_eq!(candidate.location.as_deref(), Some("10115 Berlin"));
        assert_eq!(candidate.date_posted, NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(candidate.image.as_deref(), Some("https://img.example/rad.jpg"));
    }

    #[test]
    fn candidate_without_identity_is_rejected() {
        let err = candidate_from_entry(&entry("https://example.com/s-anzeige/rad/"), today())
            .unwrap_err();
        assert_eq!(err.link, "https://example.com/s-anzeige/rad/");
    }

    #[test]
    fn unparseable_fields_degrade_to_absent() {
        let mut raw = entry("https://example.com/a/7");
        raw.summary = "Zu verschenken".to_string();
        raw.published = Some("irgendwann".to_string());
        raw.image = Some("  ".to_string());
        let candidate = candidate_from_entry(&raw, today()).unwrap();
        assert_eq!(candidate.price, None);
        assert_eq!(candidate.location, None);
        assert_eq!(candidate.date_posted, None);
        assert_eq!(candidate.image, None);
    }

    #[test]
    fn patch_omits_blank_and_unparseable_fields() {
        let fields = RawDetailFields {
            description: Some("  ".to_string()),
            price_text: Some("VB".to_string()),
            location: Some("Hamburg".to_string()),
            date_text: Some("vor 2 Tagen".to_string()),
            image: None,
        };
        let patch = patch_from_fields(&fields, today());
        assert_eq!(
            patch,
            EnrichmentPatch {
                price: None,
                location: Some("Hamburg".to_string()),
                date_posted: NaiveDate::from_ymd_opt(2024, 3, 8),
                image: None,
                body_text: None,
            }
        );
    }
}

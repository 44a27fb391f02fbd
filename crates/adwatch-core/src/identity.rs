//! Stable listing identity derived from the canonical link.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot extract listing id from link: {link}")]
pub struct IdentityError {
    pub link: String,
}

/// Returns the all-digit path segment that ends the link, ignoring any
/// query string.
///
/// `https://host/s-anzeige/rad/2567890123?ref=rss` yields `2567890123`; a
/// segment that merely ends in digits (`k0l3331`, `rad-217-3331`) is not an
/// identity.
pub fn extract_listing_id(link: &str) -> Result<&str, IdentityError> {
    let trimmed = link.trim();
    let path = trimmed.split_once('?').map_or(trimmed, |(path, _)| path);
    match path.rsplit_once('/').map(|(_, segment)| segment) {
        Some(id) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => Ok(id),
        _ => Err(IdentityError {
            link: link.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_digits_are_the_identity() {
        assert_eq!(
            extract_listing_id("https://www.kleinanzeigen.de/s-anzeige/rad/2567890123").unwrap(),
            "2567890123"
        );
    }

    #[test]
    fn query_string_is_ignored() {
        assert_eq!(
            extract_listing_id("https://example.com/ad/42?utm=7&x=9").unwrap(),
            "42"
        );
    }

    #[test]
    fn digits_must_fill_the_whole_segment() {
        assert!(extract_listing_id("https://example.com/2024/ad-77-1234").is_err());
        assert!(extract_listing_id(
            "https://www.kleinanzeigen.de/s-anzeige/rad-28/2567890123-217-3331"
        )
        .is_err());
    }

    #[test]
    fn search_links_are_not_listings() {
        let err = extract_listing_id("https://www.kleinanzeigen.de/s-berlin/fahrrad/k0l3331")
            .unwrap_err();
        assert_eq!(err.link, "https://www.kleinanzeigen.de/s-berlin/fahrrad/k0l3331");
        assert!(extract_listing_id("2567890123").is_err());
    }

    #[test]
    fn links_without_trailing_digits_fail() {
        let err = extract_listing_id("https://example.com/ad/42/").unwrap_err();
        assert_eq!(err.link, "https://example.com/ad/42/");
        assert!(extract_listing_id("https://example.com/about?id=5").is_err());
        assert!(extract_listing_id("").is_err());
    }
}

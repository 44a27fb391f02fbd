//! Core domain model for adwatch: catalog entries, listing candidates,
//! enrichment patches, and the epoch clock that drives liveness sweeps.

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

pub mod dates;
pub mod identity;
pub mod price;

pub use dates::{format_iso_date, parse_iso_date, resolve_relative_date};
pub use identity::{extract_listing_id, IdentityError};
pub use price::parse_euro_price;

pub const CRATE_NAME: &str = "adwatch-core";

/// Fixed-width RFC 3339 layout used for every persisted timestamp.
///
/// Microsecond precision and a literal `Z` keep lexicographic order equal to
/// chronological order, which the liveness sweep relies on.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Persisted record for one listing, keyed by its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub price: Option<u32>,
    pub location: Option<String>,
    pub date_posted: Option<NaiveDate>,
    pub link: String,
    pub image: Option<String>,
    pub body_text: Option<String>,
    pub first_seen: Epoch,
    pub last_seen: Epoch,
    pub is_active: bool,
}

/// A freshly observed listing, assembled from one feed entry before it is
/// merged into the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCandidate {
    pub id: String,
    pub title: String,
    pub price: Option<u32>,
    pub location: Option<String>,
    pub date_posted: Option<NaiveDate>,
    pub link: String,
    pub image: Option<String>,
}

/// Partial field update obtained from a detail fetch.
///
/// `None` means "not observed" and never clears a stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentPatch {
    pub price: Option<u32>,
    pub location: Option<String>,
    pub date_posted: Option<NaiveDate>,
    pub image: Option<String>,
    pub body_text: Option<String>,
}

impl EnrichmentPatch {
    pub fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.location.is_none()
            && self.date_posted.is_none()
            && self.image.is_none()
            && self.body_text.is_none()
    }
}

/// Timestamp captured once per poll cycle and stamped on every entry the
/// cycle observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Epoch(DateTime<Utc>);

impl Epoch {
    /// Truncates to the persisted precision so an epoch survives a round trip
    /// through the store unchanged.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(6))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_db_string(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn parse(text: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_db_string())
    }
}

/// Hands out strictly increasing epochs, each at least one microsecond past
/// the last, even when the wall clock repeats or steps backwards.
#[derive(Debug, Clone, Default)]
pub struct EpochClock {
    last: Option<Epoch>,
}

impl EpochClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the newest `last_seen` already in the catalog.
    pub fn resume_after(last: Option<Epoch>) -> Self {
        Self { last }
    }

    pub fn last(&self) -> Option<Epoch> {
        self.last
    }

    pub fn next(&mut self) -> Epoch {
        self.next_at(Utc::now())
    }

    pub fn next_at(&mut self, now: DateTime<Utc>) -> Epoch {
        let candidate = Epoch::from_datetime(now);
        let epoch = match self.last {
            Some(prev) if candidate <= prev => Epoch(prev.0 + Duration::microseconds(1)),
            _ => candidate,
        };
        self.last = Some(epoch);
        epoch
    }
}

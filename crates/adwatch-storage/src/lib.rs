//! Ad catalog persistence + HTTP fetch utilities for adwatch.

mod catalog;
mod http;

pub use catalog::{ActiveFilter, Catalog, CatalogError, DEFAULT_DATABASE_FILE};
pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RetryPolicy};

pub const CRATE_NAME: &str = "adwatch-storage";

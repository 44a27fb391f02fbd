//! Listing detail pages: retrieval and field extraction.

use adwatch_storage::HttpFetcher;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::{joined_text, non_empty, AdapterError, DetailFetcher, FieldExtractor, RawDetailFields};

pub struct HttpDetailFetcher {
    http: HttpFetcher,
}

impl HttpDetailFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DetailFetcher for HttpDetailFetcher {
    async fn fetch_detail(&self, url: &str) -> Result<String, AdapterError> {
        Ok(self.http.fetch(url).await?.text())
    }
}

const DESCRIPTION_SELECTOR: &str = "#viewad-description-text";
const PRICE_SELECTOR: &str = "[itemprop='price'], #viewad-price, .price";
const LOCATION_SELECTOR: &str = "[itemprop='address'], .location, #viewad-locality";
const DATE_SELECTOR: &str = "time, .date";
const IMAGE_SELECTOR: &str = "img[itemprop='image'], #viewad-image img";

/// Selector-driven extractor for classified-ad detail pages.
#[derive(Debug, Clone)]
pub struct HtmlFieldExtractor {
    description: Selector,
    price: Selector,
    location: Selector,
    date: Selector,
    image: Selector,
}

impl HtmlFieldExtractor {
    pub fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            description: compile(DESCRIPTION_SELECTOR)?,
            price: compile(PRICE_SELECTOR)?,
            location: compile(LOCATION_SELECTOR)?,
            date: compile(DATE_SELECTOR)?,
            image: compile(IMAGE_SELECTOR)?,
        })
    }
}

fn compile(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el: ElementRef<'_>| joined_text(el.text()))
        .and_then(non_empty)
}

impl FieldExtractor for HtmlFieldExtractor {
    fn extract(&self, page: &str) -> RawDetailFields {
        let document = Html::parse_document(page);
        RawDetailFields {
            description: first_text(&document, &self.description),
            price_text: first_text(&document, &self.price),
            location: first_text(&document, &self.location),
            date_text: first_text(&document, &self.date),
            image: document
                .select(&self.image)
                .next()
                .and_then(|el| el.value().attr("src"))
                .and_then(|src| non_empty(src.to_string())),
        }
    }
}

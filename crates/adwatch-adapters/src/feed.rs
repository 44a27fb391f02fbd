//! RSS 2.0 / Atom feed retrieval and parsing.

use adwatch_storage::HttpFetcher;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::{non_empty, AdapterError, FeedFetcher, RawFeedEntry};

pub struct HttpFeedFetcher {
    http: HttpFetcher,
}

impl HttpFeedFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawFeedEntry>, AdapterError> {
        let response = self.http.fetch(url).await?;
        let entries = parse_feed(&response.text())?;
        debug!(url, entries = entries.len(), "feed parsed");
        Ok(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Title,
    Link,
    Summary,
    Content,
    Published,
    Updated,
}

impl TextField {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Self::Title),
            b"link" => Some(Self::Link),
            b"description" | b"summary" => Some(Self::Summary),
            b"content" | b"content:encoded" => Some(Self::Content),
            b"pubDate" | b"published" | b"dc:date" => Some(Self::Published),
            b"updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct EntryBuilder {
    link: String,
    title: String,
    summary: String,
    content: String,
    published: String,
    updated: String,
    image: Option<String>,
}

impl EntryBuilder {
    fn push_text(&mut self, field: TextField, text: &str) {
        let target = match field {
            TextField::Title => &mut self.title,
            TextField::Link => &mut self.link,
            TextField::Summary => &mut self.summary,
            TextField::Content => &mut self.content,
            TextField::Published => &mut self.published,
            TextField::Updated => &mut self.updated,
        };
        target.push_str(text);
    }

    /// Picks up link/image URLs carried in attributes.
    fn absorb_attributes(&mut self, element: &BytesStart<'_>) {
        match element.name().as_ref() {
            b"link" => {
                let rel = attribute(element, "rel");
                let is_alternate = rel.as_deref().map_or(true, |r| r == "alternate");
                if let (true, Some(href)) = (is_alternate, attribute(element, "href")) {
                    if self.link.trim().is_empty() {
                        self.link = href;
                    }
                }
            }
            b"media:content" | b"media:thumbnail" => {
                if self.image.is_none() {
                    self.image = attribute(element, "url");
                }
            }
            b"enclosure" => {
                let is_image = attribute(element, "type")
                    .map_or(false, |t| t.starts_with("image/"));
                if is_image && self.image.is_none() {
                    self.image = attribute(element, "url");
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> RawFeedEntry {
        let summary = if self.summary.trim().is_empty() {
            self.content
        } else {
            self.summary
        };
        RawFeedEntry {
            link: self.link.trim().to_string(),
            title: self.title.trim().to_string(),
            summary: summary.trim().to_string(),
            published: non_empty(self.published).or_else(|| non_empty(self.updated)),
            image: self.image.and_then(non_empty),
        }
    }
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn is_entry_tag(name: &[u8]) -> bool {
    matches!(name, b"item" | b"entry")
}

/// Parses RSS `<item>` and Atom `<entry>` elements in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<RawFeedEntry>, AdapterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<EntryBuilder> = None;
    let mut field: Option<TextField> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(AdapterError::Feed(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        };
        match event {
            Event::Start(e) => {
                if is_entry_tag(e.name().as_ref()) {
                    current = Some(EntryBuilder::default());
                    field = None;
                } else if let Some(builder) = current.as_mut() {
                    builder.absorb_attributes(&e);
                    field = TextField::from_tag(e.name().as_ref());
                }
            }
            Event::Empty(e) => {
                if let Some(builder) = current.as_mut() {
                    builder.absorb_attributes(&e);
                }
            }
            Event::Text(t) => {
                if let (Some(builder), Some(f)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| AdapterError::Feed(e.to_string()))?;
                    builder.push_text(f, &text);
                }
            }
            Event::CData(c) => {
                if let (Some(builder), Some(f)) = (current.as_mut(), field) {
                    builder.push_text(f, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                if is_entry_tag(e.name().as_ref()) {
                    if let Some(builder) = current.take() {
                        entries.push(builder.finish());
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

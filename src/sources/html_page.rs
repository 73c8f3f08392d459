//! Single-page HTML feed with configurable selectors.
//!
//! The page is fetched once and every element matching the `item` selector
//! becomes one record. Within an item, `content` is required; `author`,
//! `timestamp` and `link` are optional. Relative links are resolved against
//! the page URL, for example `/2025/05/06/article-slug` on
//! `https://lite.example.com` becomes
//! `https://lite.example.com/2025/05/06/article-slug`.

use super::{CooperativeSource, RecordSink};
use crate::error::ScrapeError;
use crate::models::Record;
use crate::progress::ProgressExt;
use crate::utils::collapse_whitespace;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_PLATFORM: &str = "ArticleFeed";

/// CSS selectors describing one page layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageSelectors {
    /// One match per item on the page.
    pub item: String,
    /// Text of the item, relative to `item`.
    pub content: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Element holding the date; its `datetime` attribute wins over its text.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Element whose `href` is the item's link. Defaults to the item itself.
    #[serde(default)]
    pub link: Option<String>,
}

struct CompiledSelectors {
    item: Selector,
    content: Selector,
    author: Option<Selector>,
    timestamp: Option<Selector>,
    link: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::selector(selector, e))
}

fn compile_optional(selector: Option<&str>) -> Result<Option<Selector>, ScrapeError> {
    selector.map(compile).transpose()
}

impl PageSelectors {
    fn compile(&self) -> Result<CompiledSelectors, ScrapeError> {
        Ok(CompiledSelectors {
            item: compile(&self.item)?,
            content: compile(&self.content)?,
            author: compile_optional(self.author.as_deref())?,
            timestamp: compile_optional(self.timestamp.as_deref())?,
            link: compile_optional(self.link.as_deref())?,
        })
    }
}

#[derive(Debug)]
pub struct HtmlPageSource {
    url: String,
    platform: String,
    selectors: PageSelectors,
    max_results: usize,
    timeout: Duration,
}

impl HtmlPageSource {
    pub fn new(
        url: impl Into<String>,
        selectors: PageSelectors,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            platform: DEFAULT_PLATFORM.to_string(),
            selectors,
            max_results,
            timeout,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn first_text(item: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    item.select(selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn timestamp_of(item: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let element = item.select(selector?).next()?;
    element
        .value()
        .attr("datetime")
        .map(str::to_string)
        .or_else(|| Some(text_of(element)))
        .filter(|t| !t.is_empty())
}

fn link_of(item: ElementRef<'_>, selector: Option<&Selector>, base: &Url) -> Option<String> {
    let href = match selector {
        Some(selector) => item.select(selector).next()?.value().attr("href")?,
        None => item.value().attr("href")?,
    };
    base.join(href).ok().map(|u| u.to_string())
}

/// Parse a page and emit up to `max_results` records into `sink`.
///
/// Runs without suspending; the parsed document never outlives this call.
/// Returns the number of item elements examined.
pub(crate) fn emit_page(
    body: &str,
    page_url: &str,
    platform: &str,
    selectors: &PageSelectors,
    max_results: usize,
    sink: &mut RecordSink,
) -> Result<u64, ScrapeError> {
    let base = Url::parse(page_url)?;
    let compiled = selectors.compile()?;
    let document = Html::parse_document(body);

    if max_results == 0 {
        return Ok(0);
    }
    let reporter = sink.progress(None);
    let mut items = document.select(&compiled.item).tracked(reporter);
    for (position, item) in items.by_ref().enumerate() {
        let Some(content) = first_text(item, Some(&compiled.content)) else {
            warn!(position, url = page_url, "Item has no content element; skipping");
            continue;
        };
        let mut record = Record::new(platform, content)
            .with_timestamp(timestamp_of(item, compiled.timestamp.as_ref()));
        if let Some(author) = first_text(item, compiled.author.as_ref()) {
            record = record.with_author(author);
        }
        if let Some(link) = link_of(item, compiled.link.as_ref(), &base) {
            record = record.with_link_or_tags(link);
        }
        sink.emit(record)?;
        if sink.emitted() >= max_results {
            break;
        }
    }
    Ok(items.finish().count())
}

#[async_trait(?Send)]
impl CooperativeSource for HtmlPageSource {
    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        if self.max_results == 0 {
            return Ok(());
        }
        let client = Client::builder().timeout(self.timeout).build()?;
        let body = client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(bytes = body.len(), "Fetched page");

        let examined = emit_page(
            &body,
            &self.url,
            &self.platform,
            &self.selectors,
            self.max_results,
            sink,
        )?;
        info!(count = sink.emitted(), examined, "Parsed page items");
        Ok(())
    }
}

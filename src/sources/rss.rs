//! RSS 2.0 feed source.

use super::{CooperativeSource, RecordSink};
use crate::error::ScrapeError;
use crate::models::Record;
use crate::progress::ProgressExt;
use crate::utils::{collapse_whitespace, strip_tags};
use async_trait::async_trait;
use quick_xml::de::from_str;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_PLATFORM: &str = "ArticleFeed";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    author: Option<String>,
    #[serde(rename = "creator", alias = "dc:creator")]
    creator: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Entities commonly found in feeds that XML itself does not define.
fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| collapse_whitespace(&s)).filter(|s| !s.is_empty())
}

fn item_to_record(item: Item, platform: &str) -> Option<Record> {
    let title = non_empty(item.title);
    let description = non_empty(item.description.map(|d| strip_tags(&d)));
    let content = match (title, description) {
        (Some(t), Some(d)) if t != d => format!("{t}. {d}"),
        (Some(t), _) => t,
        (None, Some(d)) => d,
        (None, None) => return None,
    };
    let author = non_empty(item.author).or(non_empty(item.creator));
    Some(
        Record::new(platform, content)
            .with_author(author.unwrap_or_default())
            .with_id(non_empty(item.guid).unwrap_or_default())
            .with_timestamp(non_empty(item.pub_date))
            .with_link_or_tags(non_empty(item.link).unwrap_or_default()),
    )
}

/// Decode a feed document and emit up to `max_results` records into `sink`.
pub(crate) fn emit_feed(
    body: &str,
    platform: &str,
    max_results: usize,
    sink: &mut RecordSink,
) -> Result<(), ScrapeError> {
    let rss: Rss = from_str(&scrub_html_entities(body))?;
    let total = rss.channel.items.len();
    if max_results == 0 {
        return Ok(());
    }
    let reporter = sink.progress(Some(total as u64));
    let mut items = rss.channel.items.into_iter().tracked(reporter);
    for (position, item) in items.by_ref().enumerate() {
        match item_to_record(item, platform) {
            Some(record) => sink.emit(record)?,
            None => {
                warn!(position, "Feed item has no title or description; skipping");
                continue;
            }
        }
        if sink.emitted() >= max_results {
            break;
        }
    }
    items.finish();
    Ok(())
}

#[derive(Debug)]
pub struct RssFeedSource {
    url: String,
    platform: String,
    max_results: usize,
    timeout: Duration,
}

impl RssFeedSource {
    pub fn new(url: impl Into<String>, max_results: usize, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            platform: DEFAULT_PLATFORM.to_string(),
            max_results,
            timeout,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

#[async_trait(?Send)]
impl CooperativeSource for RssFeedSource {
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
        debug!(bytes = body.len(), "Fetched feed");

        emit_feed(&body, &self.platform, self.max_results, sink)?;
        info!(count = sink.emitted(), "Parsed feed items");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::captured_records;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <item>
      <title>Model release&nbsp;announced</title>
      <link>https://news.example.com/a</link>
      <description>&lt;p&gt;A new &lt;b&gt;model&lt;/b&gt; was released.&lt;/p&gt;</description>
      <author>Ada</author>
      <guid>a-1</guid>
      <pubDate>Sat, 01 Apr 2023 12:00:00 GMT</pubDate>
    </item>
    <item>
      <link>https://news.example.com/empty</link>
    </item>
    <item>
      <title>Only a title</title>
      <author>bob@example.com</author>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_emit_feed_maps_items() {
        let (mut sink, mut rx) = RecordSink::capture("feed");
        emit_feed(FEED, DEFAULT_PLATFORM, 10, &mut sink).unwrap();
        let records = captured_records(&mut rx);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].fields(),
            [
                "ArticleFeed",
                "Ada",
                "a-1",
                "Model release announced. A new model was released.",
                "Sat, 01 Apr 2023 12:00:00 GMT",
                "https://news.example.com/a"
            ]
        );
        assert_eq!(records[1].content(), "Only a title");
        assert_eq!(records[1].author(), "bob@example.com");
        assert_eq!(records[1].link_or_tags(), "");
    }

    #[test]
    fn test_emit_feed_respects_limit() {
        let (mut sink, mut rx) = RecordSink::capture("feed");
        emit_feed(FEED, "Blog", 1, &mut sink).unwrap();
        let records = captured_records(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].platform(), "Blog");
    }

    #[test]
    fn test_empty_channel_is_ok() {
        let (mut sink, mut rx) = RecordSink::capture("feed");
        emit_feed(
            "<rss><channel><title>none</title></channel></rss>",
            DEFAULT_PLATFORM,
            5,
            &mut sink,
        )
        .unwrap();
        assert!(captured_records(&mut rx).is_empty());
    }

    #[test]
    fn test_items_interleaved_with_channel_elements() {
        let feed = r#"<rss version="2.0"><channel>
            <item><title>A</title></item>
            <link>https://news.example.com</link>
            <item><title>B</title></item>
            <description>channel text</description>
            <item><title>C</title></item>
        </channel></rss>"#;
        let (mut sink, mut rx) = RecordSink::capture("feed");
        emit_feed(feed, DEFAULT_PLATFORM, 10, &mut sink).unwrap();
        let titles: Vec<String> = captured_records(&mut rx)
            .iter()
            .map(|r| r.content().to_string())
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_non_feed_document_is_error() {
        let (mut sink, _rx) = RecordSink::capture("feed");
        assert!(emit_feed("<html><body>oops</body></html>", DEFAULT_PLATFORM, 5, &mut sink).is_err());
    }
}

//! Keyword tweet search, run as a blocking source.
//!
//! The search endpoint is only reachable through a synchronous client, so
//! this source runs on its own worker thread. Results are paginated:
//!
//! ```text
//! GET {endpoint}?q={query}[&cursor={cursor}]
//! {"tweets": [{"id": "1", "username": "...", "content": "...", "date": "..."}],
//!  "next_cursor": "abc"}
//! ```
//!
//! Pages are requested lazily, one at a time, so once `max_results` tweets
//! have been emitted no further page is requested.

use super::{BlockingSource, RecordSink};
use crate::error::ScrapeError;
use crate::models::Record;
use crate::progress::ProgressExt;
use crate::utils::{extract_hashtags, tags_to_field, truncate_for_log};
use reqwest::blocking::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const PLATFORM: &str = "Twitter";

/// One page of search results.
///
/// Tweets that do not decode are logged and dropped one by one; they never
/// fail the page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default, deserialize_with = "lenient_tweets")]
    pub tweets: Vec<Tweet>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tweet {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// Accepts a string, a number or `null` (stored as empty).
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Text(s)) => s,
        Some(Id::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

fn lenient_tweets<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Tweet>, D::Error> {
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(position, value)| match serde_json::from_value::<Tweet>(value) {
            Ok(tweet) => Some(tweet),
            Err(e) => {
                warn!(position, error = %e, "Malformed tweet; skipping");
                None
            }
        })
        .collect())
}

/// Where search pages come from.
pub trait SearchBackend: Send {
    /// Fetch the page after `cursor` (the first page when `None`).
    fn page(&mut self, query: &str, cursor: Option<&str>) -> Result<SearchPage, ScrapeError>;
}

/// Search pages fetched over HTTP with a blocking client.
///
/// The client is built on the first request, which happens on the worker
/// thread that runs the source.
#[derive(Debug)]
pub struct HttpSearchBackend {
    endpoint: String,
    timeout: Duration,
    client: Option<Client>,
}

impl HttpSearchBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            client: None,
        }
    }

    /// The endpoint with `q` (and `cursor`) appended to any query it already has.
    fn page_url(&self, query: &str, cursor: Option<&str>) -> Result<Url, ScrapeError> {
        let mut url = Url::parse(&self.endpoint)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }
}

impl SearchBackend for HttpSearchBackend {
    #[instrument(level = "debug", skip(self), fields(endpoint = %self.endpoint))]
    fn page(&mut self, query: &str, cursor: Option<&str>) -> Result<SearchPage, ScrapeError> {
        let url = self.page_url(query, cursor)?;
        let client = match self.client.take() {
            Some(client) => client,
            None => Client::builder().timeout(self.timeout).build()?,
        };
        let response = client.get(url).send().and_then(|r| r.error_for_status());
        self.client = Some(client);
        let body = response?.text()?;
        debug!(bytes = body.len(), "Fetched search page");
        Ok(serde_json::from_str(&body)?)
    }
}

/// Lazily walks search pages, yielding tweets in upstream order.
///
/// After an error the iterator is exhausted.
struct SearchPages<'a, B: SearchBackend> {
    backend: &'a mut B,
    query: &'a str,
    buffer: VecDeque<Tweet>,
    cursor: Option<String>,
    pages: usize,
    done: bool,
}

impl<'a, B: SearchBackend> SearchPages<'a, B> {
    fn new(backend: &'a mut B, query: &'a str) -> Self {
        Self {
            backend,
            query,
            buffer: VecDeque::new(),
            cursor: None,
            pages: 0,
            done: false,
        }
    }
}

impl<B: SearchBackend> Iterator for SearchPages<'_, B> {
    /// The page number the item came from, and the item.
    type Item = (usize, Result<Tweet, ScrapeError>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tweet) = self.buffer.pop_front() {
                return Some((self.pages, Ok(tweet)));
            }
            if self.done {
                return None;
            }
            let page = match self.backend.page(self.query, self.cursor.as_deref()) {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some((self.pages + 1, Err(e)));
                }
            };
            self.pages += 1;
            self.cursor = page.next_cursor.filter(|c| !c.is_empty());
            self.done = self.cursor.is_none() || page.tweets.is_empty();
            self.buffer.extend(page.tweets);
        }
    }
}

/// Search tweets for a query and emit up to `max_results` of them.
#[derive(Debug)]
pub struct TweetSearchSource<B: SearchBackend = HttpSearchBackend> {
    query: String,
    max_results: usize,
    backend: B,
}

impl TweetSearchSource<HttpSearchBackend> {
    pub fn new(
        endpoint: impl Into<String>,
        query: impl Into<String>,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self::with_backend(HttpSearchBackend::new(endpoint, timeout), query, max_results)
    }
}

impl<B: SearchBackend> TweetSearchSource<B> {
    pub fn with_backend(backend: B, query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
            backend,
        }
    }
}

/// Build a record from one tweet, or `None` if it has no content.
pub fn tweet_to_record(tweet: Tweet) -> Option<Record> {
    if tweet.content.trim().is_empty() {
        return None;
    }
    let hashtags = extract_hashtags(&tweet.content);
    Some(
        Record::new(PLATFORM, tweet.content)
            .with_author(tweet.username)
            .with_id(tweet.id)
            .with_timestamp(tweet.date)
            .with_link_or_tags(tags_to_field(&hashtags)),
    )
}

impl<B: SearchBackend> BlockingSource for TweetSearchSource<B> {
    #[instrument(level = "info", skip_all, fields(query = %self.query, max = self.max_results))]
    fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        if self.max_results == 0 {
            return Ok(());
        }
        let reporter = sink.progress(Some(self.max_results as u64));
        let mut tweets = SearchPages::new(&mut self.backend, &self.query).tracked(reporter);

        for (page, item) in tweets.by_ref() {
            let tweet = match item {
                Ok(tweet) => tweet,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!(page, error = %e, "Search page failed; keeping earlier results");
                    break;
                }
            };
            let id = tweet.id.clone();
            match tweet_to_record(tweet) {
                Some(record) => sink.emit(record)?,
                None => {
                    warn!(page, id = %truncate_for_log(&id, 40), "Tweet has no content; skipping");
                    continue;
                }
            }
            if sink.emitted() >= self.max_results {
                break;
            }
        }

        let reporter = tweets.finish();
        info!(
            count = sink.emitted(),
            seen = reporter.count(),
            "Fetched tweets"
        );
        Ok(())
    }
}

//! Newest posts from a list of subreddits.
//!
//! Each subreddit is one request to its `/new/.json` listing. Subreddits are
//! fetched in list order, so records keep that order. A failed subreddit is
//! logged and skipped; the source only fails when every subreddit failed.

use super::{CooperativeSource, RecordSink};
use crate::error::ScrapeError;
use crate::models::Record;
use crate::progress::ProgressExt;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const PLATFORM: &str = "Reddit";
pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
const USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    url: String,
    created_utc: f64,
}

#[derive(Debug)]
pub struct SubredditSource {
    base_url: String,
    subreddits: Vec<String>,
    max_per_subreddit: usize,
    timeout: Duration,
}

impl SubredditSource {
    pub fn new(subreddits: Vec<String>, max_per_subreddit: usize, timeout: Duration) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            subreddits,
            max_per_subreddit,
            timeout,
        }
    }

    /// Point the source at another host (a mirror or a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn listing_url(&self, subreddit: &str) -> String {
        format!(
            "{}/r/{}/new/.json?limit={}",
            self.base_url.trim_end_matches('/'),
            subreddit,
            self.max_per_subreddit
        )
    }
}

/// Format a Reddit `created_utc` value as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_created_utc(created_utc: f64) -> Option<String> {
    DateTime::from_timestamp(created_utc.trunc() as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Turn one listing body into at most `limit` records, skipping malformed posts.
pub fn parse_listing(body: &str, subreddit: &str, limit: usize) -> Result<Vec<Record>, ScrapeError> {
    let listing: Listing = serde_json::from_str(body)?;
    let mut records = Vec::new();
    for (position, child) in listing.data.children.into_iter().enumerate() {
        if records.len() >= limit {
            break;
        }
        let post = match serde_json::from_value::<Child>(child) {
            Ok(child) => child.data,
            Err(e) => {
                warn!(subreddit, position, error = %e, "Malformed post; skipping");
                continue;
            }
        };
        if post.title.trim().is_empty() {
            warn!(subreddit, position, "Post has no title; skipping");
            continue;
        }
        records.push(
            Record::new(PLATFORM, post.title)
                .with_author(subreddit)
                .with_timestamp(format_created_utc(post.created_utc))
                .with_link_or_tags(post.url),
        );
    }
    Ok(records)
}

async fn fetch_listing(client: &Client, url: &str) -> Result<String, ScrapeError> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

#[async_trait(?Send)]
impl CooperativeSource for SubredditSource {
    #[instrument(level = "info", skip_all, fields(subreddits = self.subreddits.len()))]
    async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        if self.max_per_subreddit == 0 || self.subreddits.is_empty() {
            return Ok(());
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()?;

        let reporter = sink.progress(Some(self.subreddits.len() as u64));
        let mut subreddits = self.subreddits.iter().tracked(reporter);
        let mut failed = 0usize;
        let mut last_error = None;

        for subreddit in subreddits.by_ref() {
            let url = self.listing_url(subreddit);
            let records = match fetch_listing(&client, &url).await {
                Ok(body) => parse_listing(&body, subreddit, self.max_per_subreddit),
                Err(e) => Err(e),
            };
            match records {
                Ok(records) => {
                    debug!(subreddit = %subreddit, count = records.len(), "Parsed subreddit listing");
                    for record in records {
                        sink.emit(record)?;
                    }
                }
                Err(e) => {
                    warn!(subreddit = %subreddit, %url, error = %e, "Subreddit fetch failed; skipping");
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }
        let reporter = subreddits.finish();

        if let Some(last) = last_error {
            if failed == self.subreddits.len() {
                return Err(ScrapeError::AllRequestsFailed {
                    attempted: failed,
                    last: last.to_string(),
                });
            }
        }
        info!(
            count = sink.emitted(),
            subreddits = reporter.count(),
            failed,
            "Fetched subreddit posts"
        );
        Ok(())
    }
}

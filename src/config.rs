//! Run configuration.
//!
//! A run is described by a YAML file listing the sources to register, or by
//! the built-in default that mirrors the original newsletter run:
//!
//! ```yaml
//! progress_interval_ms: 1000
//! heartbeat_secs: 10
//! keep_partial_on_failure: false
//! request_timeout_secs: 30
//! sources:
//!   - name: twitter
//!     kind: tweet_search
//!     endpoint: https://search.example/api
//!     query: '"machine learning" lang:en'
//!     max_results: 10
//!   - name: reddit
//!     kind: subreddits
//!     subreddits: [ChatGPT, machinelearning]
//!     max_per_subreddit: 5
//! ```

use crate::error::{ConfigError, OrchestratorError};
use crate::orchestrator::Orchestrator;
use crate::sources::{
    HtmlPageSource, PageSelectors, RssFeedSource, Source, SubredditSource, TweetSearchSource,
    html_page, reddit,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_TWEET_QUERY: &str = r#"("artificial intelligence" OR "AI" OR "GPT" OR "GPT-4" OR "OpenAI" OR "machine learning") lang:en"#;
pub const DEFAULT_SUBREDDITS: [&str; 7] = [
    "ChatGPT",
    "machinelearning",
    "artificial",
    "stablediffusion",
    "deepdream",
    "futurology",
    "singularity",
];

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_results() -> usize {
    10
}

fn default_max_per_subreddit() -> usize {
    5
}

fn default_reddit_base_url() -> String {
    reddit::DEFAULT_BASE_URL.to_string()
}

fn default_feed_platform() -> String {
    html_page::DEFAULT_PLATFORM.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default)]
    pub keep_partial_on_failure: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// Source parameters, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    TweetSearch {
        endpoint: String,
        query: String,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
    Subreddits {
        #[serde(default = "default_reddit_base_url")]
        base_url: String,
        subreddits: Vec<String>,
        #[serde(default = "default_max_per_subreddit")]
        max_per_subreddit: usize,
    },
    HtmlPage {
        url: String,
        #[serde(default = "default_feed_platform")]
        platform: String,
        selectors: PageSelectors,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
    RssFeed {
        url: String,
        #[serde(default = "default_feed_platform")]
        platform: String,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
}

impl SourceKind {
    /// Build the tagged source this configuration describes.
    pub fn build(&self, timeout: Duration) -> Source {
        match self {
            SourceKind::TweetSearch {
                endpoint,
                query,
                max_results,
            } => Source::blocking(TweetSearchSource::new(
                endpoint.as_str(),
                query.as_str(),
                *max_results,
                timeout,
            )),
            SourceKind::Subreddits {
                base_url,
                subreddits,
                max_per_subreddit,
            } => Source::cooperative(
                SubredditSource::new(subreddits.clone(), *max_per_subreddit, timeout)
                    .with_base_url(base_url.as_str()),
            ),
            SourceKind::HtmlPage {
                url,
                platform,
                selectors,
                max_results,
            } => Source::cooperative(
                HtmlPageSource::new(url.as_str(), selectors.clone(), *max_results, timeout)
                    .with_platform(platform.as_str()),
            ),
            SourceKind::RssFeed {
                url,
                platform,
                max_results,
            } => Source::cooperative(
                RssFeedSource::new(url.as_str(), *max_results, timeout)
                    .with_platform(platform.as_str()),
            ),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            keep_partial_on_failure: false,
            request_timeout_secs: default_request_timeout_secs(),
            sources: Vec::new(),
        }
    }
}

impl ScrapeConfig {
    /// Load and validate a YAML configuration file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        info!(sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// The default run: the AI subreddits, plus the AI keyword tweet search
    /// when a search endpoint is available.
    pub fn builtin(tweet_search_endpoint: Option<&str>, tweet_query: Option<&str>) -> Self {
        let mut sources = Vec::new();
        if let Some(endpoint) = tweet_search_endpoint {
            sources.push(SourceConfig {
                name: "twitter".to_string(),
                kind: SourceKind::TweetSearch {
                    endpoint: endpoint.to_string(),
                    query: tweet_query.unwrap_or(DEFAULT_TWEET_QUERY).to_string(),
                    max_results: default_max_results(),
                },
            });
        }
        sources.push(SourceConfig {
            name: "reddit".to_string(),
            kind: SourceKind::Subreddits {
                base_url: default_reddit_base_url(),
                subreddits: DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
                max_per_subreddit: default_max_per_subreddit(),
            },
        });
        Self {
            sources,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (position, source) in self.sources.iter().enumerate() {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source #{} has an empty name",
                    position + 1
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Register every configured source on a new orchestrator.
    pub fn orchestrator(&self) -> Result<Orchestrator, OrchestratorError> {
        let mut orchestrator = Orchestrator::new()
            .with_heartbeat(Duration::from_secs(self.heartbeat_secs))
            .with_progress_interval(Duration::from_millis(self.progress_interval_ms))
            .keep_partial_on_failure(self.keep_partial_on_failure);
        let timeout = self.request_timeout();
        for source in &self.sources {
            orchestrator.register(source.name.as_str(), source.kind.build(timeout))?;
        }
        Ok(orchestrator)
    }
}

//! Error types for each layer of a scrape run.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`ScrapeError`]: a source-level failure. It is captured by the
//!   orchestrator into the run's failure map and never aborts sibling sources.
//! - [`OrchestratorError`]: setup failures that abort the run before any
//!   source starts.
//! - [`SnapshotError`] and [`ConfigError`]: file-boundary failures surfaced
//!   by the CLI.
//!
//! Item-level problems (one malformed post, one failed page) have no type of
//! their own: sources log them and move on.

use std::any::Any;
use std::io;

/// A failure that ended one source's `fetch`.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// HTTP transport or status failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream returned JSON that does not match the expected shape.
    #[error("malformed json response: {0}")]
    Json(#[from] serde_json::Error),

    /// The upstream returned an XML document that could not be decoded.
    #[error("malformed xml response: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// A configured URL could not be parsed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// A configured CSS selector could not be parsed.
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },

    /// Every upstream request the source issued failed.
    #[error("all {attempted} upstream requests failed; last error: {last}")]
    AllRequestsFailed { attempted: usize, last: String },

    /// The orchestrator stopped receiving records.
    #[error("record channel closed")]
    ChannelClosed,

    /// The source's worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// The source panicked inside `fetch`.
    #[error("source panicked: {0}")]
    Panicked(String),
}

impl ScrapeError {
    pub(crate) fn selector(selector: &str, message: impl ToString) -> Self {
        ScrapeError::Selector {
            selector: selector.to_string(),
            message: message.to_string(),
        }
    }

    /// Convert a `catch_unwind` payload into a failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ScrapeError::Panicked(message)
    }
}

/// A failure that aborts a run before any source starts.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("a source named `{0}` is already registered")]
    DuplicateSource(String),

    #[error("source names must not be empty")]
    EmptySourceName,

    #[error("failed to build cooperative scheduler: {0}")]
    Scheduler(#[source] io::Error),
}

/// Writing, reading or locating a snapshot file failed.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Loading the run configuration failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

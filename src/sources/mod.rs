//! Record sources and the two execution models they run under.
//!
//! Every source implements exactly one of two traits:
//!
//! - [`BlockingSource`]: its fetch blocks the calling thread, so the
//!   orchestrator gives it a dedicated worker thread.
//! - [`CooperativeSource`]: its fetch only waits on async I/O, so all such
//!   sources share one single-threaded scheduler.
//!
//! [`Source`] tags a boxed implementation with its execution model once, at
//! registration time. Sources never return their records directly; they push
//! them through a [`RecordSink`] as soon as each item is parsed.
//!
//! # Supported Sources
//!
//! | Kind | Module | Model | Notes |
//! |------|--------|-------|-------|
//! | Tweet search | [`tweets`] | Blocking | Paginated JSON search, hashtags in the last column |
//! | Subreddits | [`reddit`] | Cooperative | `/new/.json` listing per subreddit |
//! | HTML page | [`html_page`] | Cooperative | One page, configurable selectors |
//! | RSS feed | [`rss`] | Cooperative | RSS 2.0 channel items |

use crate::error::ScrapeError;
use crate::models::Record;
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub mod html_page;
pub mod reddit;
pub mod rss;
pub mod tweets;

pub use html_page::{HtmlPageSource, PageSelectors};
pub use reddit::SubredditSource;
pub use rss::RssFeedSource;
pub use tweets::{HttpSearchBackend, SearchBackend, TweetSearchSource};

/// A source whose fetch blocks the calling thread until it is done.
pub trait BlockingSource: Send {
    /// Fetch records, pushing each one into `sink` as it is produced.
    fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError>;
}

/// A source built on non-blocking I/O.
///
/// Futures returned by `fetch` run on a single-threaded scheduler, so they
/// need not be `Send`.
#[async_trait(?Send)]
pub trait CooperativeSource {
    /// Fetch records, pushing each one into `sink` as it is produced.
    async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError>;
}

/// Execution model of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    Blocking,
    Cooperative,
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionModel::Blocking => f.write_str("blocking"),
            ExecutionModel::Cooperative => f.write_str("cooperative"),
        }
    }
}

/// A source implementation tagged with its execution model.
pub enum Source {
    Blocking(Box<dyn BlockingSource>),
    Cooperative(Box<dyn CooperativeSource>),
}

impl Source {
    pub fn blocking<S: BlockingSource + 'static>(source: S) -> Self {
        Source::Blocking(Box::new(source))
    }

    pub fn cooperative<S: CooperativeSource + 'static>(source: S) -> Self {
        Source::Cooperative(Box::new(source))
    }

    pub fn model(&self) -> ExecutionModel {
        match self {
            Source::Blocking(_) => ExecutionModel::Blocking,
            Source::Cooperative(_) => ExecutionModel::Cooperative,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.model()).finish()
    }
}

/// One record on its way from a source to the orchestrator, tagged with the
/// source's registration index.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) source: usize,
    pub(crate) record: Record,
}

/// A source's handle onto the shared record channel.
///
/// The underlying sender is thread-safe, so sinks for blocking and
/// cooperative sources feed the same channel concurrently.
#[derive(Debug)]
pub struct RecordSink {
    index: usize,
    name: Arc<str>,
    tx: UnboundedSender<Envelope>,
    emitted: usize,
    progress_interval: Duration,
}

impl RecordSink {
    pub(crate) fn new(
        index: usize,
        name: Arc<str>,
        tx: UnboundedSender<Envelope>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            index,
            name,
            tx,
            emitted: 0,
            progress_interval,
        }
    }

    /// Push one record to the orchestrator.
    pub fn emit(&mut self, record: Record) -> Result<(), ScrapeError> {
        self.tx
            .send(Envelope {
                source: self.index,
                record,
            })
            .map_err(|_| ScrapeError::ChannelClosed)?;
        self.emitted += 1;
        Ok(())
    }

    /// Records emitted through this sink so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Name the source was registered under.
    pub fn source_name(&self) -> &str {
        &self.name
    }

    /// A fresh progress reporter for one fetch of this source.
    pub fn progress(&self, total: Option<u64>) -> ProgressReporter {
        ProgressReporter::new(self.name.as_ref(), total).with_min_interval(self.progress_interval)
    }

    /// A sink wired to a private channel, for exercising one source alone.
    #[cfg(test)]
    pub(crate) fn capture(name: &str) -> (Self, UnboundedReceiver<Envelope>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self::new(0, Arc::from(name), tx, crate::progress::DEFAULT_MIN_INTERVAL),
            rx,
        )
    }
}

/// Drain everything currently buffered in a receiver.
pub(crate) fn drain(rx: &mut UnboundedReceiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

#[cfg(test)]
pub(crate) fn captured_records(rx: &mut UnboundedReceiver<Envelope>) -> Vec<Record> {
    drain(rx).into_iter().map(|e| e.record).collect()
}

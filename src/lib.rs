//! # Newsletter Scraper
//!
//! Collects short text records (tweets, subreddit posts, article headlines)
//! from several independent sources concurrently and merges them into one
//! CSV snapshot for the newsletter pipeline.
//!
//! ## Features
//!
//! - Two execution lanes: blocking sources get their own worker threads,
//!   async sources share one single-threaded scheduler
//! - One failing source never aborts the run; failures are reported by name
//! - Deterministic merge order regardless of completion timing
//! - Throttled progress reporting and a heartbeat for long-running sources
//! - Timestamped CSV snapshots with a fixed six-column schema
//!
//! ## Architecture
//!
//! 1. **Configuration**: [`config::ScrapeConfig`] lists the sources to run
//! 2. **Registration**: each source is tagged with its execution model and
//!    registered on an [`orchestrator::Orchestrator`]
//! 3. **Run**: both lanes drain into one record channel
//! 4. **Output**: [`outputs::CsvSnapshotWriter`] persists the merged records

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod outputs;
pub mod progress;
pub mod sources;
pub mod utils;

pub use config::{ScrapeConfig, SourceConfig, SourceKind};
pub use error::{ConfigError, OrchestratorError, ScrapeError, SnapshotError};
pub use models::Record;
pub use orchestrator::{Orchestrator, RunReport, SourceSummary};
pub use outputs::{CsvSnapshotWriter, SnapshotNaming, SnapshotWriter};
pub use sources::{BlockingSource, CooperativeSource, ExecutionModel, RecordSink, Source};

//! Runs every registered source once and merges their records.
//!
//! Sources run in two lanes that share one record channel:
//!
//! 1. **Blocking lane**: each [`BlockingSource`] gets its own named worker
//!    thread. The thread wrapper catches errors and panics and hands them back
//!    through the join handle.
//! 2. **Cooperative lane**: every [`CooperativeSource`] is driven on one
//!    current-thread `tokio` runtime with `join_all`, so they all settle
//!    before the lane returns and none is cancelled by a sibling's failure.
//!
//! From the moment the worker threads start until the last one is joined,
//! the names of blocking sources still running are logged once per heartbeat.
//!
//! Records travel through the channel tagged with their source's
//! registration index, which lets the merge step rebuild a reproducible
//! order: cooperative sources first, then blocking sources, each group in
//! registration order, each source in its own emission order.
//!
//! A failing source never fails the run. Only setup problems (duplicate
//! names, a scheduler that cannot be built) are returned as errors.

use crate::error::{OrchestratorError, ScrapeError};
use crate::models::Record;
use crate::progress::DEFAULT_MIN_INTERVAL;
use crate::sources::{
    BlockingSource, CooperativeSource, Envelope, ExecutionModel, RecordSink, Source, drain,
};
use futures::FutureExt;
use futures::future::join_all;
use itertools::{Either, Itertools};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);
const JOIN_POLL: Duration = Duration::from_millis(25);

/// A registered source: its unique name and tagged implementation.
#[derive(Debug)]
pub struct SourceDescriptor {
    name: String,
    source: Source,
}

impl SourceDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> ExecutionModel {
        self.source.model()
    }
}

/// Per-source line of the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub name: String,
    pub model: ExecutionModel,
    /// Records this source contributed to the merged collection.
    pub records: usize,
    /// Failure message, if the source failed.
    pub error: Option<String>,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Merged records in lane and registration order.
    pub records: Vec<Record>,
    /// One entry per source, in merge order.
    pub summaries: Vec<SourceSummary>,
    /// Failed sources by name.
    pub failures: BTreeMap<String, ScrapeError>,
}

impl RunReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.summaries.iter().filter(|s| s.error.is_none()).count()
    }

    /// Log one line per source and a total line.
    pub fn log_summary(&self) {
        for summary in &self.summaries {
            match &summary.error {
                None => info!(
                    source = %summary.name,
                    model = %summary.model,
                    records = summary.records,
                    "Source finished"
                ),
                Some(e) => warn!(
                    source = %summary.name,
                    model = %summary.model,
                    records = summary.records,
                    error = %e,
                    "Source failed"
                ),
            }
        }
        let failed = self.failures.keys().join(", ");
        info!(
            total_records = self.records.len(),
            sources = self.summaries.len(),
            succeeded = self.succeeded(),
            failed = %failed,
            "Run summary"
        );
    }
}

/// Settled outcome of one source, before merging.
struct Settled {
    index: usize,
    name: Arc<str>,
    model: ExecutionModel,
    result: Result<(), ScrapeError>,
}

struct CooperativeLane {
    index: usize,
    name: Arc<str>,
    source: Box<dyn CooperativeSource>,
}

struct BlockingLane {
    index: usize,
    name: Arc<str>,
    source: Box<dyn BlockingSource>,
}

/// A blocking source running on its worker thread.
struct BlockingHandle {
    index: usize,
    name: Arc<str>,
    thread: Result<JoinHandle<Result<(), ScrapeError>>, ScrapeError>,
}

impl BlockingHandle {
    fn is_finished(&self) -> bool {
        match &self.thread {
            Ok(handle) => handle.is_finished(),
            Err(_) => true,
        }
    }

    /// Wait for the thread and take its result.
    fn join(self) -> Settled {
        let result = match self.thread {
            Ok(handle) => handle.join().unwrap_or_else(|p| Err(ScrapeError::from_panic(p))),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(source = %self.name, error = %e, "Blocking source failed");
        }
        Settled {
            index: self.index,
            name: self.name,
            model: ExecutionModel::Blocking,
            result,
        }
    }
}

/// Owns the registered sources and runs them once.
#[derive(Debug)]
pub struct Orchestrator {
    sources: Vec<SourceDescriptor>,
    heartbeat: Duration,
    progress_interval: Duration,
    keep_partial_on_failure: bool,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            heartbeat: DEFAULT_HEARTBEAT,
            progress_interval: DEFAULT_MIN_INTERVAL,
            keep_partial_on_failure: false,
        }
    }

    /// How often to log which blocking sources are still running.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Minimum interval between progress events of each source.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Keep records a source emitted before it failed.
    pub fn keep_partial_on_failure(mut self, keep: bool) -> Self {
        self.keep_partial_on_failure = keep;
        self
    }

    /// Register a source under a unique, non-empty name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        source: Source,
    ) -> Result<&mut Self, OrchestratorError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(OrchestratorError::EmptySourceName);
        }
        if self.sources.iter().any(|d| d.name == name) {
            return Err(OrchestratorError::DuplicateSource(name));
        }
        self.sources.push(SourceDescriptor { name, source });
        Ok(self)
    }

    pub fn register_blocking<S: BlockingSource + 'static>(
        &mut self,
        name: impl Into<String>,
        source: S,
    ) -> Result<&mut Self, OrchestratorError> {
        self.register(name, Source::blocking(source))
    }

    pub fn register_cooperative<S: CooperativeSource + 'static>(
        &mut self,
        name: impl Into<String>,
        source: S,
    ) -> Result<&mut Self, OrchestratorError> {
        self.register(name, Source::cooperative(source))
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Run every source to completion and merge the results.
    ///
    /// Must be called outside of any async runtime: the cooperative lane owns
    /// its own scheduler.
    #[instrument(level = "info", skip_all, fields(sources = self.sources.len()))]
    pub fn run(self) -> Result<RunReport, OrchestratorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(OrchestratorError::Scheduler)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let started = Instant::now();
        let source_count = self.sources.len();

        let (cooperative, blocking): (Vec<_>, Vec<_>) = self
            .sources
            .into_iter()
            .enumerate()
            .partition_map(|(index, descriptor)| {
                let name: Arc<str> = Arc::from(descriptor.name);
                match descriptor.source {
                    Source::Cooperative(source) => Either::Left(CooperativeLane {
                        index,
                        name,
                        source,
                    }),
                    Source::Blocking(source) => Either::Right(BlockingLane {
                        index,
                        name,
                        source,
                    }),
                }
            });
        info!(
            cooperative = cooperative.len(),
            blocking = blocking.len(),
            "Starting sources"
        );

        let handles: Vec<BlockingHandle> = blocking
            .into_iter()
            .map(|lane| spawn_blocking_source(lane, &tx, self.progress_interval))
            .collect();

        let heartbeat = self.heartbeat;
        let (cooperative_settled, _) = runtime.block_on(drive_with_heartbeat(
            drive_cooperative(cooperative, &tx, self.progress_interval),
            &handles,
            heartbeat,
        ));
        drop(tx);

        let blocking_settled = join_blocking(handles, heartbeat);

        let mut buckets: Vec<Vec<Record>> = (0..source_count).map(|_| Vec::new()).collect();
        for envelope in drain(&mut rx) {
            buckets[envelope.source].push(envelope.record);
        }

        let report = merge(
            cooperative_settled.into_iter().chain(blocking_settled),
            buckets,
            self.keep_partial_on_failure,
        );
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            records = report.records.len(),
            failed = report.failures.len(),
            "All sources settled"
        );
        Ok(report)
    }
}

fn spawn_blocking_source(
    lane: BlockingLane,
    tx: &UnboundedSender<Envelope>,
    progress_interval: Duration,
) -> BlockingHandle {
    let BlockingLane {
        index,
        name,
        mut source,
    } = lane;
    let mut sink = RecordSink::new(index, Arc::clone(&name), tx.clone(), progress_interval);
    let thread_name = format!("source-{name}");
    let thread = thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            panic::catch_unwind(AssertUnwindSafe(|| source.fetch(&mut sink)))
                .unwrap_or_else(|p| Err(ScrapeError::from_panic(p)))
        })
        .map_err(ScrapeError::Spawn);
    if let Err(e) = &thread {
        error!(source = %name, error = %e, "Failed to start blocking source");
    }
    BlockingHandle {
        index,
        name,
        thread,
    }
}

async fn drive_cooperative(
    lanes: Vec<CooperativeLane>,
    tx: &UnboundedSender<Envelope>,
    progress_interval: Duration,
) -> Vec<Settled> {
    let runs = lanes.into_iter().map(|lane| {
        let CooperativeLane {
            index,
            name,
            mut source,
        } = lane;
        let mut sink = RecordSink::new(index, Arc::clone(&name), tx.clone(), progress_interval);
        async move {
            let result = AssertUnwindSafe(source.fetch(&mut sink))
                .catch_unwind()
                .await
                .unwrap_or_else(|p| Err(ScrapeError::from_panic(p)));
            if let Err(e) = &result {
                warn!(source = %name, error = %e, "Cooperative source failed");
            }
            Settled {
                index,
                name,
                model: ExecutionModel::Cooperative,
                result,
            }
        }
    });
    join_all(runs).await
}

/// Names of blocking sources whose threads are still running.
fn pending_names(handles: &[BlockingHandle]) -> Vec<&str> {
    handles
        .iter()
        .filter(|h| !h.is_finished())
        .map(|h| h.name.as_ref())
        .collect()
}

/// Log the still-running blocking sources. Returns whether any were pending.
fn beat(handles: &[BlockingHandle]) -> bool {
    let pending = pending_names(handles);
    if pending.is_empty() {
        return false;
    }
    info!(pending = %pending.join(", "), "Waiting on blocking sources");
    true
}

/// Drive `work` to completion, logging pending blocking sources once per
/// `heartbeat` meanwhile. Returns the output and the number of heartbeats
/// that named at least one source.
async fn drive_with_heartbeat<F: Future>(
    work: F,
    handles: &[BlockingHandle],
    heartbeat: Duration,
) -> (F::Output, usize) {
    let mut work = std::pin::pin!(work);
    let mut ticker = time::interval(heartbeat.max(JOIN_POLL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    let mut beats = 0;
    loop {
        tokio::select! {
            output = &mut work => return (output, beats),
            _ = ticker.tick() => {
                if beat(handles) {
                    beats += 1;
                }
            }
        }
    }
}

fn join_blocking(handles: Vec<BlockingHandle>, heartbeat: Duration) -> Vec<Settled> {
    let mut last_beat = Instant::now();
    while !pending_names(&handles).is_empty() {
        if last_beat.elapsed() >= heartbeat {
            beat(&handles);
            last_beat = Instant::now();
        }
        thread::sleep(JOIN_POLL);
    }
    handles.into_iter().map(BlockingHandle::join).collect()
}

fn merge(
    settled: impl Iterator<Item = Settled>,
    mut buckets: Vec<Vec<Record>>,
    keep_partial_on_failure: bool,
) -> RunReport {
    let mut report = RunReport::default();
    for Settled {
        index,
        name,
        model,
        result,
    } in settled
    {
        let records = std::mem::take(&mut buckets[index]);
        match result {
            Ok(()) => {
                report.summaries.push(SourceSummary {
                    name: name.to_string(),
                    model,
                    records: records.len(),
                    error: None,
                });
                report.records.extend(records);
            }
            Err(e) => {
                let kept = if keep_partial_on_failure {
                    records.len()
                } else {
                    if !records.is_empty() {
                        warn!(
                            source = %name,
                            discarded = records.len(),
                            "Discarding records from failed source"
                        );
                    }
                    0
                };
                report.summaries.push(SourceSummary {
                    name: name.to_string(),
                    model,
                    records: kept,
                    error: Some(e.to_string()),
                });
                if keep_partial_on_failure {
                    report.records.extend(records);
                }
                report.failures.insert(name.to_string(), e);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed {
        platform: &'static str,
        count: usize,
    }

    impl BlockingSource for Fixed {
        fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
            for i in 0..self.count {
                sink.emit(Record::new(self.platform, format!("{} {i}", self.platform)))?;
            }
            Ok(())
        }
    }

    struct FixedAsync {
        platform: &'static str,
        count: usize,
    }

    #[async_trait(?Send)]
    impl CooperativeSource for FixedAsync {
        async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
            for i in 0..self.count {
                tokio::task::yield_now().await;
                sink.emit(Record::new(self.platform, format!("{} {i}", self.platform)))?;
            }
            Ok(())
        }
    }

    struct FailsAfter(usize);

    #[async_trait(?Send)]
    impl CooperativeSource for FailsAfter {
        async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
            for i in 0..self.0 {
                sink.emit(Record::new("Partial", format!("partial {i}")))?;
            }
            Err(ScrapeError::AllRequestsFailed {
                attempted: 1,
                last: "connection refused".into(),
            })
        }
    }

    #[test]
    fn test_register_rejects_duplicates_and_empty_names() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .register_blocking("a", Fixed { platform: "A", count: 1 })
            .unwrap();
        let err = orchestrator
            .register_cooperative("a", FixedAsync { platform: "A", count: 1 })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateSource(ref n) if n == "a"));
        let err = orchestrator
            .register_blocking("  ", Fixed { platform: "A", count: 1 })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptySourceName));
        assert_eq!(orchestrator.len(), 1);
        assert_eq!(orchestrator.sources()[0].model(), ExecutionModel::Blocking);
    }

    #[test]
    fn test_empty_run_is_ok() {
        let report = Orchestrator::new().run().unwrap();
        assert!(report.is_empty());
        assert!(report.failures.is_empty());
        assert!(report.summaries.is_empty());
    }

    #[test]
    fn test_merge_order_cooperative_then_blocking() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .register_blocking("b1", Fixed { platform: "B1", count: 2 })
            .unwrap()
            .register_cooperative("c1", FixedAsync { platform: "C1", count: 2 })
            .unwrap()
            .register_blocking("b2", Fixed { platform: "B2", count: 1 })
            .unwrap()
            .register_cooperative("c2", FixedAsync { platform: "C2", count: 2 })
            .unwrap();
        let report = orchestrator.run().unwrap();
        let contents: Vec<&str> = report.records.iter().map(|r| r.content()).collect();
        assert_eq!(
            contents,
            vec!["C1 0", "C1 1", "C2 0", "C2 1", "B1 0", "B1 1", "B2 0"]
        );
        let names: Vec<&str> = report.summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c1", "c2", "b1", "b2"]);
    }

    #[test]
    fn test_failed_source_partials_are_discarded_by_default() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .register_cooperative("ok", FixedAsync { platform: "Ok", count: 2 })
            .unwrap()
            .register_cooperative("flaky", FailsAfter(3))
            .unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.records.len(), 2);
        assert!(report.failures.contains_key("flaky"));
        let flaky = &report.summaries[1];
        assert_eq!(flaky.records, 0);
        assert!(flaky.error.as_deref().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_keep_partial_on_failure() {
        let mut orchestrator = Orchestrator::new().keep_partial_on_failure(true);
        orchestrator
            .register_cooperative("flaky", FailsAfter(3))
            .unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.summaries[0].records, 3);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_names_blocking_sources_during_cooperative_lane() {
        let handles = vec![BlockingHandle {
            index: 0,
            name: Arc::from("slow-thread"),
            thread: Ok(thread::spawn(|| {
                thread::sleep(Duration::from_millis(400));
                Ok(())
            })),
        }];
        let (output, beats) = drive_with_heartbeat(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                7
            },
            &handles,
            Duration::from_millis(30),
        )
        .await;
        assert_eq!(output, 7);
        assert!(beats >= 1);
        let settled: Vec<Settled> = handles.into_iter().map(BlockingHandle::join).collect();
        assert!(settled[0].result.is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_is_silent_without_pending_threads() {
        let (output, beats) = drive_with_heartbeat(
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                "done"
            },
            &[],
            Duration::from_millis(30),
        )
        .await;
        assert_eq!(output, "done");
        assert_eq!(beats, 0);
    }

    #[test]
    fn test_heartbeat_does_not_block_completion() {
        struct Sleepy;
        impl BlockingSource for Sleepy {
            fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
                thread::sleep(Duration::from_millis(120));
                sink.emit(Record::new("Slow", "done"))
            }
        }
        let mut orchestrator = Orchestrator::new().with_heartbeat(Duration::from_millis(10));
        orchestrator.register_blocking("sleepy", Sleepy).unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.succeeded(), 1);
    }
}

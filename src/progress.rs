//! Throttled progress instrumentation for source iterations.
//!
//! A [`ProgressReporter`] counts consumed items and reports count, elapsed
//! time and rate through `tracing`. Reports are throttled to at most one per
//! `min_interval`; the first item and [`ProgressReporter::finish`] always
//! report. Reporters are cheap and owned by a single `fetch` call, so each
//! run starts from zero.
//!
//! [`ProgressExt::tracked`] wraps any iterator without changing what it
//! yields.

use std::time::{Duration, Instant};
use tracing::info;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct ProgressReporter {
    label: String,
    total: Option<u64>,
    count: u64,
    started: Instant,
    last_report: Option<Instant>,
    min_interval: Duration,
}

impl ProgressReporter {
    /// Create a reporter for `label`. `total` is the expected number of items, if known.
    pub fn new(label: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            label: label.into(),
            total,
            count: 0,
            started: Instant::now(),
            last_report: None,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Record one consumed item. Returns `true` when this tick emitted a report.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        let now = Instant::now();
        let due = match self.last_report {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        };
        if due {
            self.last_report = Some(now);
            self.report("progress");
        }
        due
    }

    /// Emit the final report for this iteration.
    pub fn finish(&self) {
        self.report("finished");
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Items per second since the reporter was created.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }

    fn report(&self, phase: &str) {
        let elapsed = self.elapsed();
        info!(
            source = %self.label,
            phase,
            count = self.count,
            total = ?self.total,
            elapsed_ms = elapsed.as_millis() as u64,
            rate = %format!("{:.2}/s", self.rate()),
            "Source progress"
        );
    }
}

/// An iterator that ticks a [`ProgressReporter`] for every item it yields.
#[derive(Debug)]
pub struct Tracked<I> {
    inner: I,
    reporter: ProgressReporter,
}

impl<I> Tracked<I> {
    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Stop iterating, emit the final report and hand back the reporter.
    pub fn finish(self) -> ProgressReporter {
        self.reporter.finish();
        self.reporter
    }
}

impl<I: Iterator> Iterator for Tracked<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        self.reporter.tick();
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub trait ProgressExt: Iterator + Sized {
    /// Instrument this iterator with `reporter`.
    fn tracked(self, reporter: ProgressReporter) -> Tracked<Self> {
        Tracked {
            inner: self,
            reporter,
        }
    }
}

impl<I: Iterator> ProgressExt for I {}

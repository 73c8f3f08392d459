use async_trait::async_trait;
use newsletter_scraper::outputs::{latest_snapshot, read_snapshot};
use newsletter_scraper::sources::tweets::{SearchPage, Tweet};
use newsletter_scraper::sources::{SearchBackend, SubredditSource, TweetSearchSource};
use newsletter_scraper::{
    BlockingSource, CooperativeSource, CsvSnapshotWriter, ExecutionModel, Orchestrator, Record,
    RecordSink, ScrapeError, SnapshotNaming, SnapshotWriter,
};
use std::time::Duration;

/// Emits `count` records, optionally capped at `max_results`.
struct Canned {
    platform: &'static str,
    count: usize,
    max_results: usize,
}

impl Canned {
    fn new(platform: &'static str, count: usize) -> Self {
        Self {
            platform,
            count,
            max_results: usize::MAX,
        }
    }
}

#[async_trait(?Send)]
impl CooperativeSource for Canned {
    async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        for i in 0..self.count {
            if sink.emitted() >= self.max_results {
                break;
            }
            tokio::task::yield_now().await;
            sink.emit(
                Record::new(self.platform, format!("{} item {i}", self.platform))
                    .with_author("someone")
                    .with_link_or_tags(format!("https://example.com/{i}")),
            )?;
        }
        Ok(())
    }
}

impl BlockingSource for Canned {
    fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        for i in 0..self.count.min(self.max_results) {
            sink.emit(Record::new(self.platform, format!("{} item {i}", self.platform)))?;
        }
        Ok(())
    }
}

struct PanicsAsync;

#[async_trait(?Send)]
impl CooperativeSource for PanicsAsync {
    async fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        sink.emit(Record::new("Broken", "before panic"))?;
        panic!("parser exploded");
    }
}

struct PanicsBlocking;

impl BlockingSource for PanicsBlocking {
    fn fetch(&mut self, _sink: &mut RecordSink) -> Result<(), ScrapeError> {
        panic!("worker exploded");
    }
}

/// Emits a few records from its worker thread, then gives up.
struct FailsMidway;

impl BlockingSource for FailsMidway {
    fn fetch(&mut self, sink: &mut RecordSink) -> Result<(), ScrapeError> {
        for i in 0..3 {
            sink.emit(Record::new("Midway", format!("partial {i}")))?;
        }
        Err(ScrapeError::AllRequestsFailed {
            attempted: 2,
            last: "503 Service Unavailable".into(),
        })
    }
}

/// Ten tweets, served four per page.
struct TenTweets;

impl SearchBackend for TenTweets {
    fn page(&mut self, _query: &str, cursor: Option<&str>) -> Result<SearchPage, ScrapeError> {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + 4).min(10);
        let tweets = (start..end)
            .map(|i| Tweet {
                id: format!("{}", 1000 + i),
                username: format!("user{i}"),
                content: format!("tweet number {i} #AI #rust"),
                date: Some(format!("2023-04-01 09:0{}:00+00:00", i % 10)),
            })
            .collect();
        let next_cursor = (end < 10).then(|| end.to_string());
        Ok(SearchPage {
            tweets,
            next_cursor,
        })
    }
}

fn quiet(orchestrator: Orchestrator) -> Orchestrator {
    orchestrator
        .with_heartbeat(Duration::from_millis(50))
        .with_progress_interval(Duration::from_millis(10))
}

#[test]
fn failing_cooperative_source_does_not_affect_sibling() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_cooperative("good", Canned::new("Good", 3))
        .unwrap()
        .register_cooperative(
            "unreachable",
            SubredditSource::new(vec!["ChatGPT".into()], 5, Duration::from_secs(2))
                .with_base_url("http://127.0.0.1:1"),
        )
        .unwrap();

    let report = orchestrator.run().unwrap();

    assert_eq!(report.records.len(), 3);
    assert!(report.records.iter().all(|r| r.platform() == "Good"));
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures.get("unreachable"),
        Some(ScrapeError::AllRequestsFailed { attempted: 1, .. })
    ));
    assert_eq!(report.succeeded(), 1);
}

#[test]
fn blocking_tweet_search_takes_first_items() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_blocking(
            "twitter",
            TweetSearchSource::with_backend(TenTweets, "AI lang:en", 2),
        )
        .unwrap();

    let report = orchestrator.run().unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.records.len(), 2);
    assert_eq!(
        report.records[0].fields(),
        [
            "Twitter",
            "user0",
            "1000",
            "tweet number 0 #AI #rust",
            "2023-04-01 09:00:00+00:00",
            r#"["AI","rust"]"#
        ]
    );
    assert_eq!(report.records[1].id(), "1001");
    assert_eq!(report.summaries[0].model, ExecutionModel::Blocking);
}

#[test]
fn capped_sources_never_exceed_limit() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_cooperative(
            "capped-async",
            Canned {
                platform: "A",
                count: 50,
                max_results: 5,
            },
        )
        .unwrap()
        .register_blocking(
            "capped-thread",
            TweetSearchSource::with_backend(TenTweets, "q", 5),
        )
        .unwrap();

    let report = orchestrator.run().unwrap();

    assert_eq!(report.summaries.len(), 2);
    for summary in &report.summaries {
        assert_eq!(summary.records, 5, "{}", summary.name);
    }
    assert_eq!(report.records.len(), 10);
}

#[test]
fn merge_is_concatenation_in_lane_order() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_blocking("b1", Canned::new("B1", 2))
        .unwrap()
        .register_cooperative("c1", Canned::new("C1", 4))
        .unwrap()
        .register_blocking("b2", Canned::new("B2", 3))
        .unwrap()
        .register_cooperative("c2", Canned::new("C2", 1))
        .unwrap();

    let report = orchestrator.run().unwrap();

    let platforms: Vec<&str> = report.records.iter().map(Record::platform).collect();
    assert_eq!(
        platforms,
        ["C1", "C1", "C1", "C1", "C2", "B1", "B1", "B2", "B2", "B2"]
    );
    let per_source: usize = report.summaries.iter().map(|s| s.records).sum();
    assert_eq!(per_source, report.records.len());
    let names: Vec<&str> = report.summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["c1", "c2", "b1", "b2"]);
}

#[test]
fn every_record_has_six_fields() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_cooperative("async", Canned::new("A", 2))
        .unwrap()
        .register_blocking("tweets", TweetSearchSource::with_backend(TenTweets, "q", 3))
        .unwrap();

    let report = orchestrator.run().unwrap();

    assert_eq!(report.records.len(), 5);
    for record in &report.records {
        let fields = record.fields();
        assert_eq!(fields.len(), Record::HEADER.len());
        assert!(!fields[0].is_empty());
        assert!(!fields[3].is_empty());
    }
}

#[test]
fn panicking_sources_are_captured_in_both_lanes() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_cooperative("async-panic", PanicsAsync)
        .unwrap()
        .register_blocking("thread-panic", PanicsBlocking)
        .unwrap()
        .register_cooperative("survivor", Canned::new("S", 2))
        .unwrap();

    let report = orchestrator.run().unwrap();

    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.platform() == "S"));
    assert!(matches!(
        report.failures.get("async-panic"),
        Some(ScrapeError::Panicked(msg)) if msg.contains("parser exploded")
    ));
    assert!(matches!(
        report.failures.get("thread-panic"),
        Some(ScrapeError::Panicked(msg)) if msg.contains("worker exploded")
    ));
}

#[test]
fn failing_blocking_source_discards_partial_records() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_blocking("midway", FailsMidway)
        .unwrap()
        .register_blocking("steady", Canned::new("Steady", 2))
        .unwrap();

    let report = orchestrator.run().unwrap();

    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.platform() == "Steady"));
    assert!(matches!(
        report.failures.get("midway"),
        Some(ScrapeError::AllRequestsFailed { attempted: 2, .. })
    ));
    let midway = &report.summaries[0];
    assert_eq!(midway.name, "midway");
    assert_eq!(midway.model, ExecutionModel::Blocking);
    assert_eq!(midway.records, 0);
    assert!(midway.error.as_deref().unwrap().contains("503"));
}

#[test]
fn failing_blocking_source_keeps_partials_when_asked() {
    let mut orchestrator = quiet(Orchestrator::new()).keep_partial_on_failure(true);
    orchestrator.register_blocking("midway", FailsMidway).unwrap();

    let report = orchestrator.run().unwrap();

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.summaries[0].records, 3);
}

#[test]
fn empty_run_writes_header_only_snapshot() {
    let report = quiet(Orchestrator::new()).run().unwrap();
    assert!(report.is_empty());

    let tmp = tempfile::tempdir().unwrap();
    let path = CsvSnapshotWriter
        .write(&report.records, &SnapshotNaming::now(tmp.path()))
        .unwrap();
    assert!(read_snapshot(&path).unwrap().is_empty());
    assert_eq!(latest_snapshot(tmp.path()).unwrap(), Some(path));
}

#[test]
fn snapshot_round_trip_of_merged_run() {
    let mut orchestrator = quiet(Orchestrator::new());
    orchestrator
        .register_cooperative("async", Canned::new("A", 3))
        .unwrap()
        .register_blocking("tweets", TweetSearchSource::with_backend(TenTweets, "q", 4))
        .unwrap();
    let report = orchestrator.run().unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let path = CsvSnapshotWriter
        .write(&report.records, &SnapshotNaming::now(tmp.path()))
        .unwrap();

    let file_name = path.file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with("scrape_results_"));
    assert!(file_name.ends_with(".csv"));
    assert_eq!(read_snapshot(&path).unwrap(), report.records);
}

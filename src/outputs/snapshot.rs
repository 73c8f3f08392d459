//! CSV snapshot files.
//!
//! One run produces one snapshot:
//!
//! ```text
//! output_dir/
//! ├── scrape_results_2023-04-01_09-15-00.csv
//! └── scrape_results_2023-04-01_21-15-00.csv
//! ```
//!
//! The header row is always written, so a run that collected nothing still
//! leaves a valid, empty table behind. Downstream stages pick the newest
//! file with [`latest_snapshot`].

use crate::error::SnapshotError;
use crate::models::Record;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument};

pub const SNAPSHOT_PREFIX: &str = "scrape_results_";
pub const SNAPSHOT_EXTENSION: &str = "csv";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Where a snapshot goes and which moment it is named after.
#[derive(Debug, Clone)]
pub struct SnapshotNaming {
    pub dir: PathBuf,
    pub taken_at: DateTime<Local>,
}

impl SnapshotNaming {
    pub fn new(dir: impl Into<PathBuf>, taken_at: DateTime<Local>) -> Self {
        Self {
            dir: dir.into(),
            taken_at,
        }
    }

    /// Name the snapshot after the current local time.
    pub fn now(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Local::now())
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}{}.{}",
            SNAPSHOT_PREFIX,
            self.taken_at.format(TIMESTAMP_FORMAT),
            SNAPSHOT_EXTENSION
        )
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(self.file_name())
    }
}

/// Persists a merged record collection.
pub trait SnapshotWriter {
    /// Write `records` in order and return the path of the new snapshot.
    fn write(&self, records: &[Record], naming: &SnapshotNaming) -> Result<PathBuf, SnapshotError>;
}

/// Writes snapshots as comma-separated UTF-8 with a header row.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvSnapshotWriter;

impl SnapshotWriter for CsvSnapshotWriter {
    #[instrument(level = "info", skip_all, fields(dir = %naming.dir.display(), count = records.len()))]
    fn write(&self, records: &[Record], naming: &SnapshotNaming) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&naming.dir)?;
        let path = naming.path();

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        writer.write_record(Record::HEADER)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        info!(path = %path.display(), rows = records.len(), "Wrote snapshot");
        Ok(path)
    }
}

/// Read a snapshot back into records.
pub fn read_snapshot(path: &Path) -> Result<Vec<Record>, SnapshotError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize::<Record>()
        .collect::<Result<Vec<_>, _>>()?;
    debug!(path = %path.display(), rows = records.len(), "Read snapshot");
    Ok(records)
}

fn is_snapshot(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX));
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SNAPSHOT_EXTENSION));
    name_matches && ext_matches && path.is_file()
}

/// The most recently modified snapshot in `dir`, if any.
#[instrument(level = "debug", skip_all, fields(dir = %dir.display()))]
pub fn latest_snapshot(dir: &Path) -> Result<Option<PathBuf>, SnapshotError> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_snapshot(&path) {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        // Equal mtimes fall back to the name, which sorts by timestamp.
        let is_newer = match &newest {
            None => true,
            Some((time, best)) => (modified, &path) > (*time, best),
        };
        if is_newer {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

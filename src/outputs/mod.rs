//! Output generation for a finished run.
//!
//! # Submodules
//!
//! - [`snapshot`]: Writes the merged records to a timestamped CSV file,
//!   reads snapshots back and finds the newest one
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── scrape_results_2023-04-01_09-15-00.csv
//! └── scrape_results_2023-04-02_09-15-00.csv
//! ```

pub mod snapshot;

pub use snapshot::{
    CsvSnapshotWriter, SnapshotNaming, SnapshotWriter, latest_snapshot, read_snapshot,
};

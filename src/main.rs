use clap::Parser;
use newsletter_scraper::cli::{Cli, Command};
use newsletter_scraper::outputs::{CsvSnapshotWriter, SnapshotNaming, SnapshotWriter, latest_snapshot};
use newsletter_scraper::utils::ensure_writable_dir;
use newsletter_scraper::ScrapeConfig;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

fn main() -> ExitCode {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let outcome = match &args.command {
        Some(Command::Latest { input_dir }) => print_latest(input_dir),
        None => scrape(&args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}

fn print_latest(input_dir: &Path) -> Result<(), Box<dyn Error>> {
    match latest_snapshot(input_dir)? {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => Err(format!("no snapshot found in {}", input_dir.display()).into()),
    }
}

fn scrape(args: &Cli) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    info!("newsletter_scraper starting up");

    // Early check: fail before any source runs if the snapshot cannot be written
    if let Err(e) = ensure_writable_dir(&args.output_dir) {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let config = match &args.config {
        Some(path) => ScrapeConfig::load(path)?,
        None => ScrapeConfig::builtin(
            args.tweet_search_endpoint.as_deref(),
            args.tweet_query.as_deref(),
        ),
    };
    if config.sources.is_empty() {
        info!("No sources configured; the snapshot will only hold a header");
    }

    let orchestrator = config.orchestrator()?;
    info!(sources = orchestrator.len(), "Registered sources");

    let report = orchestrator.run()?;
    report.log_summary();

    let path = CsvSnapshotWriter.write(&report.records, &SnapshotNaming::now(&args.output_dir))?;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        path = %path.display(),
        records = report.records.len(),
        failed = report.failures.len(),
        "Execution complete"
    );
    Ok(())
}

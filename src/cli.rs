//! Command-line interface definitions.
//!
//! All options can be provided via command-line flags; the tweet search
//! endpoint can also come from the environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for one scrape run.
///
/// # Examples
///
/// ```sh
/// # Built-in sources, snapshot into ./data
/// newsletter_scraper -o ./data
///
/// # Sources from a config file
/// newsletter_scraper -o ./data -c sources.yaml
///
/// # Print the newest snapshot in ./data
/// newsletter_scraper latest -i ./data
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output directory for the CSV snapshot
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Optional path to a sources YAML file; the built-in sources are used otherwise
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tweet search endpoint; enables the built-in tweet source
    #[arg(long, env = "TWEET_SEARCH_ENDPOINT")]
    pub tweet_search_endpoint: Option<String>,

    /// Override the built-in tweet search query
    #[arg(long)]
    pub tweet_query: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print the path of the most recent snapshot in a directory
    Latest {
        /// Directory holding snapshots
        #[arg(short, long, default_value = ".")]
        input_dir: PathBuf,
    },
}

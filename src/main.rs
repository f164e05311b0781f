use std::env::consts::{ARCH, FAMILY, OS};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::trace;

use crate::hashlist::logger::init_logging;
use crate::program::Program;

mod hashlist;
mod program;

/// Command-line arguments for hashlist-ingest
#[derive(Parser, Debug)]
#[command(name = "hashlist-ingest")]
#[command(about = "Harvests torrent hashlists from a Git-hosted feed into a local stream store")]
#[command(version)]
struct Args {
    /// Directory holding config.toml
    #[arg(long, default_value = "./config", env = "HASHLIST_CONFIG_DIR")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// One incremental pass followed by one backfill pass
    Run,

    /// Repeat runs until backfill completes or progress stops
    Full {
        #[arg(long)]
        max_iterations: Option<usize>,

        #[arg(long)]
        incremental_commits: Option<usize>,

        #[arg(long)]
        backfill_commits: Option<usize>,

        /// Clear cursors and processed blobs before starting
        #[arg(long)]
        reset_checkpoints: bool,
    },

    /// Print the crawl state and processed blob count
    Status,

    /// Clear cursors and processed blobs
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let program = Program::new(&args.config_dir).context("Failed to load configuration")?;
    let config = program.config();
    // Flushes the file writer when main returns
    let _log_guard = init_logging(&config.logging, Path::new(&config.paths.log_directory))
        .context("Failed to initialize logging")?;
    log_system_information();

    program.run(args.command).await
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}

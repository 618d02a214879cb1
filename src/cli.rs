//! Command-line interface built on clap.
//!
//! Defines [`Cli`] with the [`Command`] subcommands (serve, submit, status)
//! and the global flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Batch image recompression: intake tables of image links, recompress every
/// image, and report back with an output table.
#[derive(Debug, Parser)]
#[command(name = "batchpress", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to `batchpress.toml` in the working directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service.
    Serve {
        /// Overrides `listen_addr` from the configuration.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Process one table in the foreground and print its final status.
    Submit {
        /// CSV table with `name` and `images` columns.
        table: PathBuf,

        /// Callback address notified when the job finishes.
        #[arg(long)]
        callback: Option<String>,
    },

    /// Show the stored status of a job.
    Status {
        /// Job identifier returned at intake.
        job_id: String,
    },
}

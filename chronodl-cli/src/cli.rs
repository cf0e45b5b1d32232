//! CLI argument definitions using clap derive macros.
//!
//! Grounded on the teacher's `src/cli.rs` (`Args` struct shape, verbose/
//! quiet flags) and `downloader-cli/src/app/command_dispatcher.rs`'s
//! `Cli { command: Option<Command> }` routing pattern, generalised with a
//! `quota-status`/`reset-quota` subcommand pair (SPEC_FULL.md §E).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Harvest digitised works from heterogeneous digital-library providers
/// into canonical per-work folders with audit metadata.
#[derive(Parser, Debug)]
#[command(name = "chronodl")]
#[command(author, version, about)]
pub struct Cli {
    /// Input CSV table (entry_id, short_title, main_author, direct_link,
    /// retrievable). Defaults to `general.default_csv_path` from config.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Base output directory. Defaults to `general.default_output_dir`.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Search and rank candidates without downloading or writing state.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print pending-deferral counts and next reset times per provider.
    QuotaStatus,

    /// Manually reset a provider's quota (or every provider with --all).
    ResetQuota {
        /// Provider key to reset, e.g. `internet_archive`.
        provider: Option<String>,

        /// Reset every tracked provider instead of a single one.
        #[arg(long, conflicts_with = "provider")]
        all: bool,
    },
}

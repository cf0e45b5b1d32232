//! Binary entry point: argument parsing, subcommand dispatch, tracing
//! init, and exit-code determination (§6 "CLI exit codes: 0 success, 1
//! unexpected error, 130 user interrupt").
//!
//! Grounded on the teacher's `src/main.rs` (verbosity-to-log-level
//! selection) and `downloader-cli/src/app/exit_handler.rs`'s
//! `determine_exit_outcome` mapping, generalised with a distinct 130 case
//! for a Ctrl-C interrupt.

mod cli;
mod csv_io;
mod facade;
mod quota_status;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use cli::{Cli, Command};
use facade::Facade;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Partial,
    Failure,
    Interrupted,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            ProcessExit::Success | ProcessExit::Partial => 0,
            ProcessExit::Failure => 1,
            ProcessExit::Interrupted => 130,
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(error) => {
            error!(%error, "unexpected error, aborting");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<ProcessExit> {
    let config = chronodl_core::Config::load();
    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.default_output_dir));

    if let Some(command) = &cli.command {
        return dispatch_command(command, &output_dir);
    }

    let input_path = cli.input.clone().unwrap_or_else(|| PathBuf::from(&config.general.default_csv_path));
    if !input_path.exists() {
        warn!(path = %input_path.display(), "input CSV not found, nothing to do");
        return Ok(ProcessExit::Success);
    }

    let (input_table, rows) = csv_io::InputTable::load(&input_path)?;
    if rows.is_empty() {
        info!("input CSV has no rows, nothing to do");
        return Ok(ProcessExit::Success);
    }
    let input_table = Arc::new(input_table);

    let facade = Facade::build(output_dir.clone())?;

    if cli.dry_run {
        run_dry_run(&facade, &rows).await;
        return Ok(ProcessExit::Success);
    }

    let index_path = output_dir.join("index.csv");
    let sink = Arc::new(csv_io::CsvIndexSink::create(&index_path, Some(Arc::clone(&input_table)))?);

    let retry_handle = facade.spawn_retry_scheduler(Arc::clone(&sink));

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_signal.store(true, Ordering::SeqCst);
        }
    });

    let summary = facade.run(rows, Arc::clone(&sink), Arc::clone(&interrupted)).await;

    if let Some(handle) = retry_handle {
        handle.stop().await;
    }

    info!(
        total = summary.total,
        skipped = summary.skipped,
        submitted = summary.submitted,
        "run complete"
    );
    println!(
        "{} row(s) total, {} skipped (already retrievable), {} submitted for download.",
        summary.total, summary.skipped, summary.submitted
    );

    if summary.interrupted || interrupted.load(Ordering::SeqCst) {
        warn!("run interrupted, some rows were not processed; re-run to resume");
        return Ok(ProcessExit::Interrupted);
    }
    if summary.budget_stopped {
        warn!("run stopped early: download budget exhausted");
        return Ok(ProcessExit::Partial);
    }
    Ok(ProcessExit::Success)
}

async fn run_dry_run(facade: &Facade, rows: &[csv_io::InputRow]) {
    let previews = facade.run_dry_run(rows).await;
    if previews.is_empty() {
        println!("Dry run - no rows to process");
    } else {
        for preview in &previews {
            match &preview.chosen {
                Some(chosen) => println!("- [{}] {} -> {chosen}", preview.entry_id, preview.title),
                None => println!("- [{}] {} -> no eligible candidate", preview.entry_id, preview.title),
            }
        }
        println!("Dry run summary: {} row(s) previewed.", previews.len());
    }
    println!("Dry run - no files downloaded, no state written");
}

fn dispatch_command(command: &Command, output_dir: &Path) -> anyhow::Result<ProcessExit> {
    let config = chronodl_core::Config::load();
    std::fs::create_dir_all(output_dir)?;
    let state_path = output_dir.join(&config.deferred.state_file);
    let legacy_quota_path = output_dir.join("quota_state.json");
    let legacy_queue_path = output_dir.join("deferred_queue.json");
    let state = chronodl_core::StateStore::load(state_path, &legacy_quota_path, &legacy_queue_path)?;

    match command {
        Command::QuotaStatus => {
            quota_status::print_quota_status(&state);
            Ok(ProcessExit::Success)
        }
        Command::ResetQuota { provider, all } => {
            let tracker = chronodl_core::QuotaTracker::new(&state);
            if *all {
                tracker.reset_all()?;
                println!("Reset quota for every tracked provider.");
            } else if let Some(provider) = provider {
                if tracker.reset(provider)? {
                    println!("Reset quota for {provider}.");
                } else {
                    println!("No tracked quota state for {provider}.");
                }
            } else {
                anyhow::bail!("reset-quota requires a provider key or --all");
            }
            Ok(ProcessExit::Success)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== ProcessExit ====

    #[test]
    fn exit_codes_match_spec_contract() {
        assert_eq!(ProcessExit::Success.code(), 0);
        assert_eq!(ProcessExit::Partial.code(), 0);
        assert_eq!(ProcessExit::Failure.code(), 1);
        assert_eq!(ProcessExit::Interrupted.code(), 130);
    }
}

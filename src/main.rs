//! `starload` command-line entry point.
//!
//! ```bash
//! starload ingest --file sales.csv
//! starload transform --from-db --to-db
//! starload transform --input sales.csv --output-dir out --format parquet
//! starload run --file sales.csv
//! ```
//!
//! Exits non-zero when a command fails or a run ends in the `failed` state.

#![expect(clippy::print_stdout, clippy::print_stderr)] // CLI output goes to the terminal

mod cli;

use clap::Parser as _;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| cli::log_dir_from_config(&cli.command));
    let logging = starload::logging::init(log_dir.as_deref());
    if let Err(e) = &logging {
        eprintln!("warning: logging unavailable: {e:#}");
    }

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(cli::run_command(cli.command)));

    match result {
        Ok(code) => code,
        Err(e) => {
            if logging.is_ok() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

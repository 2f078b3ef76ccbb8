//! Quayside desk launcher.
//!
//! One-shot CLI over the contract ingestion and solve-gating core: scans,
//! manual ingest, review actions, solves, and durable-log maintenance.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quayside", about = "Contract desk: ingestion and solve gating", version)]
struct Cli {
    /// Verbose console logging
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the remote contracts folder (full listing or hash delta)
    Scan(cli::scan::ScanArgs),
    /// Ingest one local document, bypassing the scanner
    IngestFile(cli::ingest::IngestFileArgs),
    /// Review workflow actions
    Review(cli::review::ReviewArgs),
    /// Run a solve through the pipeline
    Solve(cli::solve::SolveArgs),
    /// List contracts in the store
    Contracts(cli::contracts::ContractsArgs),
    /// Inspect the clause and family registry
    Registry(cli::registry::RegistryArgs),
    /// Verify the durable log hash chain
    VerifyLog(cli::wal::VerifyLogArgs),
}

fn main() -> Result<()> {
    let args = Cli::parse();
    quayside_logging::init_logging("quayside", args.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        match args.command {
            Command::Scan(args) => cli::scan::run(args).await,
            Command::IngestFile(args) => cli::ingest::run(args).await,
            Command::Review(args) => cli::review::run(args).await,
            Command::Solve(args) => cli::solve::run(args).await,
            Command::Contracts(args) => cli::contracts::run(args).await,
            Command::Registry(args) => cli::registry::run(args).await,
            Command::VerifyLog(args) => cli::wal::run(args).await,
        }
    })
}

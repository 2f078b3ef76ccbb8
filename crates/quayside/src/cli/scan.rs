//! Scan command: full listing or hash-delta against the remote folder.

use super::context::DeskContext;
use anyhow::Result;
use clap::{Args, ValueEnum};
use quayside_ingest::ScanSummary;

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Product group this desk ingests into
    #[arg(long, default_value = "ammonia")]
    pub product_group: String,
    /// Scan mode
    #[arg(long, value_enum, default_value_t = ScanMode::Delta)]
    pub mode: ScanMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScanMode {
    /// List the whole folder and classify every file
    Full,
    /// Hash-diff known files without downloading
    Delta,
}

pub async fn run(args: ScanArgs) -> Result<()> {
    let ctx = DeskContext::build(&args.product_group).await?;
    let summary = match args.mode {
        ScanMode::Full => ctx.ingestor.full_scan().await?,
        ScanMode::Delta => ctx.ingestor.delta_scan().await?,
    };
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    println!("scanned:   {}", summary.scanned);
    println!("new:       {}", summary.ingested_new.len());
    println!("changed:   {}", summary.ingested_changed.len());
    println!("unchanged: {}", summary.unchanged);
    println!("missing:   {}", summary.missing);
    for id in summary.ingested_new.iter().chain(&summary.ingested_changed) {
        println!("  ingested {id}");
    }
    if !summary.errors.is_empty() {
        println!("errors:    {}", summary.errors.len());
        for error in &summary.errors {
            println!("  {}: {}", error.name, error.error);
        }
    }
}

//! Durable-log verification.

use super::context::wal_dir;
use anyhow::{Context, Result};
use clap::Args;
use quayside_protocol::DeskConfig;

#[derive(Debug, Args)]
pub struct VerifyLogArgs {}

pub async fn run(_args: VerifyLogArgs) -> Result<()> {
    let config = DeskConfig::from_env().context("reading QUAYSIDE_* environment")?;
    let dir = wal_dir(&config.data_dir);
    let report = quayside_persist::verify_all(&dir)
        .with_context(|| format!("verifying durable log under {}", dir.display()))?;
    println!(
        "hash chain intact: {} frame(s) across {} file(s)",
        report.frames, report.files
    );
    if let Some(manifest) = quayside_persist::read_manifest(&dir)? {
        println!(
            "last sealed: {} (final digest {})",
            manifest.last_sealed, manifest.final_digest
        );
    }
    Ok(())
}

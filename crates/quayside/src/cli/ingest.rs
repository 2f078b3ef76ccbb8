//! Manual ingest: one local document, bypassing the scanner.

use super::context::DeskContext;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use quayside_ingest::ManualIngest;
use quayside_parser::validate::{validate, ValidateOptions};
use quayside_protocol::CounterpartyType;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct IngestFileArgs {
    /// Document to ingest (pdf, docx, docm, txt)
    pub file: PathBuf,
    #[arg(long)]
    pub counterparty: String,
    #[arg(long, value_enum)]
    pub counterparty_type: CounterpartySide,
    #[arg(long, default_value = "ammonia")]
    pub product_group: String,
    #[arg(long)]
    pub contract_number: Option<String>,
    #[arg(long)]
    pub effective_date: Option<NaiveDate>,
    #[arg(long)]
    pub expiry_date: Option<NaiveDate>,
    #[arg(long)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CounterpartySide {
    Supplier,
    Customer,
}

impl From<CounterpartySide> for CounterpartyType {
    fn from(side: CounterpartySide) -> Self {
        match side {
            CounterpartySide::Supplier => CounterpartyType::Supplier,
            CounterpartySide::Customer => CounterpartyType::Customer,
        }
    }
}

pub async fn run(args: IngestFileArgs) -> Result<()> {
    let ctx = DeskContext::build(&args.product_group).await?;
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.display().to_string());

    let outcome = ctx
        .ingestor
        .ingest_manual(ManualIngest {
            counterparty: args.counterparty,
            counterparty_type: args.counterparty_type.into(),
            product_group: args.product_group,
            source_file_bytes: bytes,
            source_file_name: file_name,
            contract_number: args.contract_number,
            effective_date: args.effective_date,
            expiry_date: args.expiry_date,
            company: args.company,
        })
        .await?;

    if outcome.created {
        println!("ingested {} (version {})", outcome.id, outcome.version);
    } else {
        println!(
            "unchanged: {} already holds these bytes (version {})",
            outcome.id, outcome.version
        );
    }

    // Show the validation verdict right away so missing clauses are
    // visible before submission.
    let snapshot = ctx.store.snapshot();
    if let Some(contract) = snapshot.get(&outcome.id) {
        let report = validate(
            &ctx.registry.snapshot(),
            contract,
            ValidateOptions::default(),
        )?;
        println!(
            "required clauses: {}/{} ({:.0}% complete)",
            report.required_met, report.required_total, report.completeness_pct
        );
        for finding in &report.findings {
            println!("  [{:?}] {}", finding.kind, finding.message);
        }
        if report.blocks_submission {
            println!("submission blocked until required clauses are resolved");
        }
    }
    Ok(())
}

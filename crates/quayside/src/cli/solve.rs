//! Solve command: run one invocation through the pipeline.

use super::context::DeskContext;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use quayside_desk::{CancelFlag, SolveOptions, VariableSource};
use std::collections::BTreeMap;

#[derive(Debug, Args)]
pub struct SolveArgs {
    #[arg(long, default_value = "ammonia")]
    pub product_group: String,
    /// Run a monte-carlo sweep with this many scenarios instead of a
    /// plain solve
    #[arg(long)]
    pub monte_carlo: Option<u32>,
    /// Skip the contracts freshness check (the audit is marked stale)
    #[arg(long)]
    pub skip_contracts_check: bool,
    /// Refuse to solve when the readiness gate fails
    #[arg(long)]
    pub enforce_readiness: bool,
    /// Trader identity recorded on the audit
    #[arg(long)]
    pub trader: Option<String>,
    /// Variable override, `key=value`; repeatable
    #[arg(long = "var")]
    pub vars: Vec<String>,
    /// Variable source timestamp, `name=RFC3339`; repeatable
    #[arg(long = "source")]
    pub sources: Vec<String>,
}

pub async fn run(args: SolveArgs) -> Result<()> {
    let ctx = DeskContext::build(&args.product_group).await?;

    let mut variables = BTreeMap::new();
    for pair in &args.vars {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("--var expects key=value, got {pair}");
        };
        let value: f64 = raw
            .parse()
            .with_context(|| format!("--var {key} value {raw} is not a number"))?;
        variables.insert(key.to_string(), value);
    }

    let mut sources = Vec::new();
    for pair in &args.sources {
        let Some((name, raw)) = pair.split_once('=') else {
            bail!("--source expects name=RFC3339, got {pair}");
        };
        let updated_at: DateTime<Utc> = raw
            .parse()
            .with_context(|| format!("--source {name} timestamp {raw} is not RFC3339"))?;
        sources.push(VariableSource {
            source: name.to_string(),
            updated_at,
        });
    }
    if sources.is_empty() {
        // Trader-entered variables count as a fresh source.
        sources.push(VariableSource {
            source: "manual".to_string(),
            updated_at: Utc::now(),
        });
    }

    let record = ctx
        .pipeline
        .run(
            &args.product_group,
            variables,
            sources,
            SolveOptions {
                skip_contracts_check: args.skip_contracts_check,
                monte_carlo: args.monte_carlo,
                trader_id: args.trader,
                enforce_readiness: args.enforce_readiness,
            },
            &CancelFlag::new(),
        )
        .await?;

    println!("run:             {}", record.run_id);
    println!("status:          {}", record.result_status.as_str());
    if let Some(profit) = record.profit {
        println!("profit:          {profit:.2}");
    }
    if let Some(detail) = &record.result_detail {
        println!("detail:          {detail}");
    }
    println!("contracts used:  {}", record.contracts_used.len());
    println!(
        "contracts stale: {}{}",
        record.contracts_stale,
        record
            .stale_reason
            .as_deref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default()
    );
    if record.blocks_submission {
        println!("readiness issues:");
        for issue in &record.readiness_issues {
            println!("  {issue}");
        }
    }
    Ok(())
}

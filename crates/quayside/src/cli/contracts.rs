//! Contract listing.

use super::context::DeskContext;
use anyhow::Result;
use chrono::Utc;
use clap::Args;

#[derive(Debug, Args)]
pub struct ContractsArgs {
    #[arg(long, default_value = "ammonia")]
    pub product_group: String,
    /// Only the approved, unexpired, SAP-validated set with open positions
    #[arg(long)]
    pub active: bool,
}

pub async fn run(args: ContractsArgs) -> Result<()> {
    let ctx = DeskContext::build(&args.product_group).await?;
    let snapshot = ctx.store.snapshot();
    let today = Utc::now().date_naive();
    let contracts = if args.active {
        snapshot.list_active_set(&args.product_group, today)
    } else {
        snapshot.list_by_product_group(&args.product_group)
    };

    if contracts.is_empty() {
        println!("no contracts for product group {}", args.product_group);
        return Ok(());
    }
    for contract in contracts {
        println!(
            "{}  v{}  {:12}  {:12}  {}  {}",
            contract.id,
            contract.version,
            contract.status.as_str(),
            contract.verification_status.as_str(),
            &contract.file_hash[..contract.file_hash.len().min(12)],
            contract.counterparty,
        );
    }
    Ok(())
}

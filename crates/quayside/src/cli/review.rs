//! Review workflow commands.

use super::context::DeskContext;
use anyhow::Result;
use clap::{Args, Subcommand};
use quayside_protocol::ContractId;
use quayside_store::{Reviewer, ReviewError, Role};

#[derive(Debug, Args)]
pub struct ReviewArgs {
    /// Product group the contract belongs to
    #[arg(long, default_value = "ammonia")]
    pub product_group: String,
    #[command(subcommand)]
    pub action: ReviewAction,
}

#[derive(Debug, Subcommand)]
pub enum ReviewAction {
    /// Submit a draft for legal review (trader role)
    Submit {
        contract_id: String,
        #[arg(long)]
        trader: String,
    },
    /// Approve a pending contract (legal role)
    Approve {
        contract_id: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a pending contract (legal role; terminal)
    Reject {
        contract_id: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Record a SAP revalidation (operations role)
    Sap {
        contract_id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        validated: bool,
        #[arg(long)]
        open_position: Option<f64>,
        #[arg(long)]
        discrepancy: Vec<String>,
    },
}

pub async fn run(args: ReviewArgs) -> Result<()> {
    let ctx = DeskContext::build(&args.product_group).await?;
    let result = match args.action {
        ReviewAction::Submit { contract_id, trader } => {
            let id = ContractId::new(contract_id);
            let reviewer = Reviewer::new(trader, Role::Trader);
            ctx.workflow.submit(&id, &reviewer).await.map(|()| {
                println!("{id} submitted for review");
            })
        }
        ReviewAction::Approve {
            contract_id,
            reviewer,
            notes,
        } => {
            let id = ContractId::new(contract_id);
            let reviewer = Reviewer::new(reviewer, Role::Legal);
            ctx.workflow.approve(&id, &reviewer, notes).await.map(|()| {
                println!("{id} approved");
            })
        }
        ReviewAction::Reject {
            contract_id,
            reviewer,
            notes,
        } => {
            let id = ContractId::new(contract_id);
            let reviewer = Reviewer::new(reviewer, Role::Legal);
            ctx.workflow.reject(&id, &reviewer, notes).await.map(|()| {
                println!("{id} rejected");
            })
        }
        ReviewAction::Sap {
            contract_id,
            operator,
            validated,
            open_position,
            discrepancy,
        } => {
            let id = ContractId::new(contract_id);
            let reviewer = Reviewer::new(operator, Role::Operations);
            ctx.workflow
                .sap_revalidate(&id, &reviewer, validated, discrepancy, open_position)
                .await
                .map(|()| {
                    println!("{id} SAP data updated");
                })
        }
    };

    match result {
        Ok(()) => Ok(()),
        // Blocked submissions list what the user must resolve.
        Err(ReviewError::BlocksSubmission(missing)) => {
            println!("submission blocked; missing required clauses:");
            for clause in missing {
                println!("  {clause}");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

//! Registry inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use quayside_registry::TemplateRegistry;

#[derive(Debug, Args)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub what: RegistryQuery,
}

#[derive(Debug, Subcommand)]
pub enum RegistryQuery {
    /// Canonical clause inventory
    Clauses,
    /// Registered contract families
    Families,
}

pub async fn run(args: RegistryArgs) -> Result<()> {
    let snapshot = TemplateRegistry::seeded().snapshot();
    match args.what {
        RegistryQuery::Clauses => {
            for clause in snapshot.canonical_clauses() {
                println!("{:28} {:12} {}", clause.clause_id, clause.category, clause.description);
            }
        }
        RegistryQuery::Families => {
            for family in snapshot.family_signatures() {
                println!(
                    "{:22} {:8} {:9} {:10} [{}]",
                    family.family_id,
                    family.direction.as_str(),
                    family.term_type.as_str(),
                    family.transport.as_str(),
                    family
                        .default_incoterms
                        .iter()
                        .map(|i| i.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
        }
    }
    Ok(())
}

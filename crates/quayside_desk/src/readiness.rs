//! Readiness gate: four-level precondition for live solves.

use chrono::{DateTime, NaiveDate, Utc};
use quayside_parser::validate::{validate, ValidateOptions};
use quayside_protocol::{Contract, ReviewStatus};
use quayside_registry::TemplateRegistry;
use quayside_store::ContractStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One upstream variable source with its last update time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSource {
    pub source: String,
    pub updated_at: DateTime<Utc>,
}

/// Which gate level an issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckLevel {
    Extraction,
    Review,
    Activation,
    Freshness,
}

/// One failing check with a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessIssue {
    pub level: CheckLevel,
    pub message: String,
}

/// Counts behind the verdict, for dashboards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub product_group: String,
    pub approved_contracts: usize,
    pub active_contracts: usize,
    pub pending_review: usize,
    pub drafts: usize,
    pub extraction_failures: usize,
    pub activation_gaps: usize,
    pub stale_sources: usize,
}

/// Gate verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessOutcome {
    pub ready: bool,
    pub issues: Vec<ReadinessIssue>,
    pub report: ReadinessReport,
}

/// The gate. Reads are snapshot-based; the gate never mutates the store.
pub struct ReadinessGate {
    store: ContractStore,
    registry: Arc<TemplateRegistry>,
    /// Maximum age of an upstream variable source.
    staleness: chrono::Duration,
}

impl ReadinessGate {
    pub fn new(
        store: ContractStore,
        registry: Arc<TemplateRegistry>,
        staleness_secs: i64,
    ) -> Self {
        Self {
            store,
            registry,
            staleness: chrono::Duration::seconds(staleness_secs),
        }
    }

    /// Four-level check for one product group.
    pub fn check(
        &self,
        product_group: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
        sources: &[VariableSource],
    ) -> ReadinessOutcome {
        let snapshot = self.store.snapshot();
        let registry = self.registry.snapshot();
        let mut issues = Vec::new();
        let mut report = ReadinessReport {
            product_group: product_group.to_string(),
            ..Default::default()
        };

        // Heads of each version chain for the group.
        let heads: Vec<&Contract> = snapshot
            .list_by_product_group(product_group)
            .into_iter()
            .filter(|c| {
                snapshot
                    .latest_version(&c.canonical_key())
                    .map(|latest| latest.id == c.id)
                    .unwrap_or(false)
            })
            .collect();

        // Level 2 first in reporting order is harmless; issues carry their
        // level explicitly.
        report.pending_review = heads
            .iter()
            .filter(|c| c.status == ReviewStatus::PendingReview)
            .count();
        report.drafts = heads.iter().filter(|c| c.status == ReviewStatus::Draft).count();
        if report.pending_review > 0 {
            issues.push(ReadinessIssue {
                level: CheckLevel::Review,
                message: if report.pending_review == 1 {
                    "review: 1 contract pending".to_string()
                } else {
                    format!("review: {} contracts pending", report.pending_review)
                },
            });
        }
        if report.drafts > 0 {
            issues.push(ReadinessIssue {
                level: CheckLevel::Review,
                message: format!("review: {} contract(s) still in draft", report.drafts),
            });
        }

        let approved: Vec<&Contract> = heads
            .iter()
            .filter(|c| c.status == ReviewStatus::Approved)
            .copied()
            .collect();
        report.approved_contracts = approved.len();

        // Level 1: extraction completeness of the approved set.
        for contract in &approved {
            match validate(&registry, contract, ValidateOptions::default()) {
                Ok(validation) => {
                    let missing = validation.missing_required().len();
                    if missing > 0 {
                        report.extraction_failures += 1;
                        issues.push(ReadinessIssue {
                            level: CheckLevel::Extraction,
                            message: format!(
                                "extraction: {} is missing {missing} required clause(s)",
                                contract.id
                            ),
                        });
                    }
                }
                Err(e) => {
                    report.extraction_failures += 1;
                    issues.push(ReadinessIssue {
                        level: CheckLevel::Extraction,
                        message: format!("extraction: {}: {e}", contract.id),
                    });
                }
            }
        }

        // Level 3: activation.
        for contract in &approved {
            let mut gaps = Vec::new();
            if !contract.sap_validated {
                gaps.push("not SAP-validated");
            }
            if contract.open_position.is_none() {
                gaps.push("no open position");
            }
            match contract.expiry_date {
                None => gaps.push("no expiry date"),
                Some(expiry) if expiry <= today => gaps.push("expired"),
                Some(_) => {}
            }
            if !gaps.is_empty() {
                report.activation_gaps += 1;
                issues.push(ReadinessIssue {
                    level: CheckLevel::Activation,
                    message: format!("activation: {} {}", contract.id, gaps.join(", ")),
                });
            }
        }
        report.active_contracts = snapshot.list_active_set(product_group, today).len();

        // Level 4: data freshness of the upstream variable sources.
        for source in sources {
            let age = now - source.updated_at;
            if age > self.staleness {
                report.stale_sources += 1;
                issues.push(ReadinessIssue {
                    level: CheckLevel::Freshness,
                    message: format!(
                        "freshness: {} stale by {}s (threshold {}s)",
                        source.source,
                        age.num_seconds(),
                        self.staleness.num_seconds()
                    ),
                });
            }
        }

        ReadinessOutcome {
            ready: issues.is_empty(),
            issues,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_protocol::{
        BoundOperator, Clause, Confidence, ContractId, CounterpartyType, Incoterm, SourceFormat,
        TemplateType, TermType, VerificationStatus,
    };
    use quayside_store::ReviewTransition;

    fn complete_clauses() -> Vec<Clause> {
        let mut price = Clause::new("PRICE", "commercial", "t", "Section 5", Confidence::High);
        price.parameter = Some("buy_price_usd_ton".to_string());
        price.operator = Some(BoundOperator::Eq);
        price.value = Some(335.0);
        price.unit = Some("$/ton".to_string());
        let mut quantity =
            Clause::new("QUANTITY_TOLERANCE", "commercial", "t", "Section 2", Confidence::High);
        quantity.parameter = Some("min_volume_mt".to_string());
        quantity.operator = Some(BoundOperator::Eq);
        quantity.value = Some(40_000.0);
        quantity.unit = Some("mt".to_string());
        vec![
            Clause::new("INCOTERMS", "commercial", "t", "Section 3", Confidence::High),
            Clause::new("PRODUCT_AND_SPECS", "commercial", "t", "Section 1", Confidence::High),
            quantity,
            price,
            Clause::new("PAYMENT", "commercial", "t", "Section 6", Confidence::High),
            Clause::new("DELIVERY_PERIOD", "commercial", "t", "Section 4", Confidence::High),
        ]
    }

    fn contract(id: &str, counterparty: &str) -> Contract {
        Contract {
            id: ContractId::new(id),
            version: 1,
            template_type: TemplateType::Purchase,
            incoterm: Some(Incoterm::Fob),
            family_id: None,
            term_type: TermType::LongTerm,
            company: None,
            contract_number: None,
            effective_date: None,
            expiry_date: Some(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()),
            counterparty: counterparty.to_string(),
            counterparty_type: CounterpartyType::Supplier,
            product_group: "ammonia".to_string(),
            open_position: None,
            source_file_name: "c.docx".to_string(),
            source_format: SourceFormat::Docx,
            file_size_bytes: 1,
            file_hash: format!("hash-{id}"),
            previous_hash: String::new(),
            remote_item_id: None,
            remote_drive_id: None,
            last_verified_at: None,
            verification_status: VerificationStatus::Verified,
            status: quayside_protocol::ReviewStatus::Draft,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            sap_validated: false,
            sap_discrepancies: Vec::new(),
            clauses: complete_clauses(),
            llm_agreement: None,
            ingested_at: Utc::now(),
        }
    }

    async fn submit_and_approve(store: &ContractStore, id: &ContractId) {
        store
            .transition_review(ReviewTransition {
                id: id.clone(),
                to: ReviewStatus::PendingReview,
                reviewed_by: "trader-1".to_string(),
                notes: None,
            })
            .await
            .unwrap();
        store
            .transition_review(ReviewTransition {
                id: id.clone(),
                to: ReviewStatus::Approved,
                reviewed_by: "legal-1".to_string(),
                notes: None,
            })
            .await
            .unwrap();
    }

    fn gate(store: &ContractStore) -> ReadinessGate {
        ReadinessGate::new(store.clone(), Arc::new(TemplateRegistry::seeded()), 3_600)
    }

    fn fresh_source(now: DateTime<Utc>) -> VariableSource {
        VariableSource {
            source: "tampa_price_feed".to_string(),
            updated_at: now - chrono::Duration::seconds(60),
        }
    }

    #[tokio::test]
    async fn test_ready_when_everything_is_current() {
        let store = ContractStore::spawn(None);
        let now = Utc::now();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let outcome = store.ingest(contract("c1", "Koch Fertilizer")).await.unwrap();
        submit_and_approve(&store, &outcome.id).await;
        store
            .update_activation(outcome.id.clone(), true, Vec::new(), Some(25_000.0))
            .await
            .unwrap();

        let verdict = gate(&store).check("ammonia", today, now, &[fresh_source(now)]);
        assert!(verdict.ready, "issues: {:?}", verdict.issues);
        assert_eq!(verdict.report.active_contracts, 1);
    }

    #[tokio::test]
    async fn test_pending_review_blocks() {
        let store = ContractStore::spawn(None);
        let now = Utc::now();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let outcome = store.ingest(contract("c1", "Koch Fertilizer")).await.unwrap();
        store
            .transition_review(ReviewTransition {
                id: outcome.id,
                to: ReviewStatus::PendingReview,
                reviewed_by: "trader-1".to_string(),
                notes: None,
            })
            .await
            .unwrap();

        let verdict = gate(&store).check("ammonia", today, now, &[fresh_source(now)]);
        assert!(!verdict.ready);
        assert!(verdict
            .issues
            .iter()
            .any(|i| i.level == CheckLevel::Review && i.message == "review: 1 contract pending"));
    }

    #[tokio::test]
    async fn test_activation_gaps_reported() {
        let store = ContractStore::spawn(None);
        let now = Utc::now();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let outcome = store.ingest(contract("c1", "Koch Fertilizer")).await.unwrap();
        submit_and_approve(&store, &outcome.id).await;
        // Approved but never SAP-validated and without an open position.
        let verdict = gate(&store).check("ammonia", today, now, &[fresh_source(now)]);
        assert!(!verdict.ready);
        let activation = verdict
            .issues
            .iter()
            .find(|i| i.level == CheckLevel::Activation)
            .expect("activation issue");
        assert!(activation.message.contains("not SAP-validated"));
        assert!(activation.message.contains("no open position"));
    }

    #[tokio::test]
    async fn test_stale_source_blocks() {
        let store = ContractStore::spawn(None);
        let now = Utc::now();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let stale = VariableSource {
            source: "river_levels".to_string(),
            updated_at: now - chrono::Duration::hours(3),
        };
        let verdict = gate(&store).check("ammonia", today, now, &[stale]);
        assert!(!verdict.ready);
        assert!(verdict
            .issues
            .iter()
            .any(|i| i.level == CheckLevel::Freshness && i.message.contains("river_levels")));
    }

    #[tokio::test]
    async fn test_missing_required_extraction_blocks() {
        let store = ContractStore::spawn(None);
        let now = Utc::now();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let mut incomplete = contract("c1", "Koch Fertilizer");
        incomplete.clauses.retain(|c| c.clause_id != "PRICE");
        let outcome = store.ingest(incomplete).await.unwrap();
        // Force the contract through review at the store level (the
        // workflow layer would normally block submission).
        submit_and_approve(&store, &outcome.id).await;
        store
            .update_activation(outcome.id, true, Vec::new(), Some(10_000.0))
            .await
            .unwrap();
        let verdict = gate(&store).check("ammonia", today, now, &[fresh_source(now)]);
        assert!(!verdict.ready);
        assert!(verdict
            .issues
            .iter()
            .any(|i| i.level == CheckLevel::Extraction));
    }
}

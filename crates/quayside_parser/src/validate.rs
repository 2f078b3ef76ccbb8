//! Template validation: extraction completeness and sanity checks.

use quayside_protocol::{BoundOperator, Confidence, Contract};
use quayside_registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Validation finding categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingRequired,
    MissingExpected,
    LowConfidence,
    ValueSuspicious,
    Conflict,
}

/// One validation finding. Only `MissingRequired` blocks submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// Clause type or parameter the finding is about.
    pub subject: String,
    pub message: String,
}

/// Validator knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// When set, low-confidence clauses do not count toward requirement
    /// satisfaction.
    pub strict_confidence: bool,
}

/// Outcome of validating one contract against its template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub required_total: usize,
    pub required_met: usize,
    /// Percentage of required and expected requirements satisfied.
    pub completeness_pct: f64,
    pub blocks_submission: bool,
}

impl ValidationReport {
    pub fn missing_required(&self) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.kind == FindingKind::MissingRequired)
            .collect()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidateError {
    #[error("no template registered for ({contract_type}, {incoterm})")]
    TemplateUnknown {
        contract_type: String,
        incoterm: String,
    },
}

/// Suspicious-value multipliers: below 10% of the range minimum or above
/// 10x the maximum is flagged, never fatal.
const SUSPICIOUS_LOW_FACTOR: f64 = 0.1;
const SUSPICIOUS_HIGH_FACTOR: f64 = 10.0;

/// Validate `contract` against its `(template_type, incoterm)` template.
pub fn validate(
    snapshot: &RegistrySnapshot,
    contract: &Contract,
    options: ValidateOptions,
) -> Result<ValidationReport, ValidateError> {
    let template = snapshot
        .get_template(contract.template_type, contract.incoterm)
        .ok_or_else(|| ValidateError::TemplateUnknown {
            contract_type: contract.template_type.as_str().to_string(),
            incoterm: contract
                .incoterm
                .map(|i| i.as_str().to_string())
                .unwrap_or_else(|| "nil".to_string()),
        })?;

    let mut findings = Vec::new();
    let mut required_total = 0usize;
    let mut required_met = 0usize;
    let mut graded_total = 0usize;
    let mut graded_met = 0usize;

    for requirement in &template.requirements {
        let satisfied = contract.clauses.iter().any(|clause| {
            if clause.clause_id != requirement.clause_type {
                return false;
            }
            if options.strict_confidence && clause.confidence == Confidence::Low {
                return false;
            }
            match requirement.parameter_class.as_deref() {
                None => true,
                Some(class) => {
                    let members = snapshot.parameter_class_members(class);
                    clause
                        .parameter
                        .as_deref()
                        .map(|p| members.iter().any(|m| m == p))
                        .unwrap_or(false)
                }
            }
        });

        match requirement.level {
            quayside_protocol::RequirementLevel::Required => {
                required_total += 1;
                graded_total += 1;
                if satisfied {
                    required_met += 1;
                    graded_met += 1;
                } else {
                    findings.push(Finding {
                        kind: FindingKind::MissingRequired,
                        subject: requirement.clause_type.clone(),
                        message: format!(
                            "required clause {} not extracted ({})",
                            requirement.clause_type, requirement.description
                        ),
                    });
                }
            }
            quayside_protocol::RequirementLevel::Expected => {
                graded_total += 1;
                if satisfied {
                    graded_met += 1;
                } else {
                    findings.push(Finding {
                        kind: FindingKind::MissingExpected,
                        subject: requirement.clause_type.clone(),
                        message: format!(
                            "expected clause {} not extracted",
                            requirement.clause_type
                        ),
                    });
                }
            }
            quayside_protocol::RequirementLevel::Optional => {}
        }
    }

    for clause in &contract.clauses {
        if clause.confidence == Confidence::Low {
            findings.push(Finding {
                kind: FindingKind::LowConfidence,
                subject: clause.clause_id.clone(),
                message: format!(
                    "{} extracted at low confidence ({})",
                    clause.clause_id, clause.section_ref
                ),
            });
        }
    }

    check_value_sanity(snapshot, contract, &mut findings);
    check_conflicts(contract, &mut findings);

    let blocks_submission = findings
        .iter()
        .any(|f| f.kind == FindingKind::MissingRequired);
    let completeness_pct = if graded_total == 0 {
        100.0
    } else {
        graded_met as f64 / graded_total as f64 * 100.0
    };

    Ok(ValidationReport {
        findings,
        required_total,
        required_met,
        completeness_pct,
        blocks_submission,
    })
}

/// Values far outside the per-parameter plausibility range get flagged.
fn check_value_sanity(
    snapshot: &RegistrySnapshot,
    contract: &Contract,
    findings: &mut Vec<Finding>,
) {
    for clause in &contract.clauses {
        let (Some(parameter), Some(value)) = (clause.parameter.as_deref(), clause.value) else {
            continue;
        };
        let Some(range) = snapshot.sanity_range(parameter) else {
            continue;
        };
        if value < range.min * SUSPICIOUS_LOW_FACTOR || value > range.max * SUSPICIOUS_HIGH_FACTOR {
            findings.push(Finding {
                kind: FindingKind::ValueSuspicious,
                subject: parameter.to_string(),
                message: format!(
                    "{parameter} = {value} is far outside the plausible range [{}, {}] ({})",
                    range.min, range.max, clause.section_ref
                ),
            });
        }
    }
}

/// A parameter whose floors exceed its ceilings has no feasible value.
fn check_conflicts(contract: &Contract, findings: &mut Vec<Finding>) {
    let mut floors: BTreeMap<&str, f64> = BTreeMap::new();
    let mut ceilings: BTreeMap<&str, f64> = BTreeMap::new();
    for clause in &contract.clauses {
        let (Some(parameter), Some(op), Some(value)) =
            (clause.parameter.as_deref(), clause.operator, clause.value)
        else {
            continue;
        };
        match op {
            BoundOperator::Gte => {
                floors
                    .entry(parameter)
                    .and_modify(|f| *f = f.max(value))
                    .or_insert(value);
            }
            BoundOperator::Lte => {
                ceilings
                    .entry(parameter)
                    .and_modify(|c| *c = c.min(value))
                    .or_insert(value);
            }
            BoundOperator::Between => {
                floors
                    .entry(parameter)
                    .and_modify(|f| *f = f.max(value))
                    .or_insert(value);
                if let Some(upper) = clause.value_upper {
                    ceilings
                        .entry(parameter)
                        .and_modify(|c| *c = c.min(upper))
                        .or_insert(upper);
                }
            }
            BoundOperator::Eq => {}
        }
    }
    for (parameter, floor) in &floors {
        if let Some(ceiling) = ceilings.get(parameter) {
            if floor > ceiling {
                findings.push(Finding {
                    kind: FindingKind::Conflict,
                    subject: (*parameter).to_string(),
                    message: format!(
                        "{parameter} has conflicting bounds: >= {floor} but <= {ceiling}"
                    ),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quayside_protocol::{
        Clause, ContractId, CounterpartyType, Incoterm, ReviewStatus, SourceFormat, TemplateType,
        TermType, VerificationStatus,
    };
    use quayside_registry::TemplateRegistry;

    fn bound_clause(
        clause_id: &str,
        parameter: &str,
        op: BoundOperator,
        value: f64,
        confidence: Confidence,
    ) -> Clause {
        let mut clause = Clause::new(clause_id, "commercial", "text", "Section 1", confidence);
        clause.parameter = Some(parameter.to_string());
        clause.operator = Some(op);
        clause.value = Some(value);
        clause.unit = Some("mt".to_string());
        clause
    }

    fn plain_clause(clause_id: &str) -> Clause {
        Clause::new(clause_id, "commercial", "text", "Section 1", Confidence::High)
    }

    fn purchase_fob_contract(clauses: Vec<Clause>) -> Contract {
        Contract {
            id: ContractId::new("ctr-1"),
            version: 1,
            template_type: TemplateType::Purchase,
            incoterm: Some(Incoterm::Fob),
            family_id: None,
            term_type: TermType::LongTerm,
            company: None,
            contract_number: None,
            effective_date: None,
            expiry_date: None,
            counterparty: "Koch Fertilizer".to_string(),
            counterparty_type: CounterpartyType::Supplier,
            product_group: "ammonia".to_string(),
            open_position: None,
            source_file_name: "k.docx".to_string(),
            source_format: SourceFormat::Docx,
            file_size_bytes: 1,
            file_hash: "aa".to_string(),
            previous_hash: String::new(),
            remote_item_id: None,
            remote_drive_id: None,
            last_verified_at: None,
            verification_status: VerificationStatus::Unverified,
            status: ReviewStatus::Draft,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            sap_validated: false,
            sap_discrepancies: Vec::new(),
            clauses,
            llm_agreement: None,
            ingested_at: Utc::now(),
        }
    }

    fn full_required_clauses() -> Vec<Clause> {
        vec![
            plain_clause("INCOTERMS"),
            plain_clause("PRODUCT_AND_SPECS"),
            bound_clause("QUANTITY_TOLERANCE", "min_volume_mt", BoundOperator::Eq, 40_000.0, Confidence::High),
            bound_clause("PRICE", "buy_price_usd_ton", BoundOperator::Eq, 335.0, Confidence::High),
            plain_clause("PAYMENT"),
            plain_clause("DELIVERY_PERIOD"),
        ]
    }

    #[test]
    fn test_complete_contract_passes() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let contract = purchase_fob_contract(full_required_clauses());
        let report = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        assert_eq!(report.required_total, 6);
        assert_eq!(report.required_met, 6);
        assert!(!report.blocks_submission);
        assert!(report.missing_required().is_empty());
    }

    #[test]
    fn test_missing_required_blocks_submission() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let mut clauses = full_required_clauses();
        clauses.retain(|c| c.clause_id != "PRICE");
        let contract = purchase_fob_contract(clauses);
        let report = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        assert_eq!(report.required_met, 5);
        assert!(report.blocks_submission);
        assert_eq!(report.missing_required().len(), 1);
        assert_eq!(report.missing_required()[0].subject, "PRICE");
    }

    #[test]
    fn test_parameter_class_gating() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let mut clauses = full_required_clauses();
        // A PRICE clause whose parameter is not in the price class does not
        // satisfy the requirement.
        for clause in &mut clauses {
            if clause.clause_id == "PRICE" {
                clause.parameter = Some("laytime_hours".to_string());
            }
        }
        let contract = purchase_fob_contract(clauses);
        let report = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        assert!(report.blocks_submission);
    }

    #[test]
    fn test_low_confidence_counts_unless_strict() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let mut clauses = full_required_clauses();
        for clause in &mut clauses {
            if clause.clause_id == "PRICE" {
                clause.confidence = Confidence::Low;
            }
        }
        let contract = purchase_fob_contract(clauses);

        let relaxed = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        assert!(!relaxed.blocks_submission);
        assert!(relaxed
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::LowConfidence));

        let strict = validate(
            &snapshot,
            &contract,
            ValidateOptions { strict_confidence: true },
        )
        .unwrap();
        assert!(strict.blocks_submission);
    }

    #[test]
    fn test_suspicious_value_is_not_fatal() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let mut clauses = full_required_clauses();
        // Plausible range for buy price is [100, 1200]; 9 is below 10% of
        // the minimum.
        for clause in &mut clauses {
            if clause.clause_id == "PRICE" {
                clause.value = Some(9.0);
            }
        }
        let contract = purchase_fob_contract(clauses);
        let report = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::ValueSuspicious));
        assert!(!report.blocks_submission);
    }

    #[test]
    fn test_conflicting_bounds_flagged() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let mut clauses = full_required_clauses();
        clauses.push(bound_clause(
            "MINIMUM_INVENTORY",
            "inv_don",
            BoundOperator::Gte,
            5_000.0,
            Confidence::High,
        ));
        clauses.push(bound_clause(
            "MINIMUM_INVENTORY",
            "inv_don",
            BoundOperator::Lte,
            3_000.0,
            Confidence::High,
        ));
        let contract = purchase_fob_contract(clauses);
        let report = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        let conflict = report
            .findings
            .iter()
            .find(|f| f.kind == FindingKind::Conflict)
            .expect("conflict finding");
        assert_eq!(conflict.subject, "inv_don");
        assert!(!report.blocks_submission);
    }

    #[test]
    fn test_compatible_bounds_not_flagged() {
        let snapshot = TemplateRegistry::seeded().snapshot();
        let mut clauses = full_required_clauses();
        clauses.push(bound_clause(
            "MINIMUM_INVENTORY",
            "inv_don",
            BoundOperator::Gte,
            2_000.0,
            Confidence::High,
        ));
        clauses.push(bound_clause(
            "MINIMUM_INVENTORY",
            "inv_don",
            BoundOperator::Lte,
            8_000.0,
            Confidence::High,
        ));
        let contract = purchase_fob_contract(clauses);
        let report = validate(&snapshot, &contract, ValidateOptions::default()).unwrap();
        assert!(!report.findings.iter().any(|f| f.kind == FindingKind::Conflict));
    }
}

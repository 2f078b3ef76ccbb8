//! Constraint bridge: approved contracts -> solver bounds + penalty
//! schedule + open book.
//!
//! Bridge operations never mutate the store; every call recomputes from
//! the active set it is handed, so a bound disappears with the contract
//! that carried it.

use crate::frames::FrameSet;
use crate::readiness::ReadinessOutcome;
use quayside_protocol::{
    BoundOperator, Clause, Contract, ContractId, Direction, PenaltyScheduleEntry, PenaltyType,
};
use quayside_solver::SolverInput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Live bridging requires a passing readiness gate.
    #[error("not ready for live bridging: {issues:?}")]
    NotReady { issues: Vec<String> },
    #[error("no variable frame registered for product group {0}")]
    UnknownProductGroup(String),
}

/// Live bridging is gated on readiness; what-if mode is for exploration
/// and is excluded from live trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    Live,
    WhatIf,
}

/// One bound applied (or conflict-resolved) during projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedBound {
    pub parameter: String,
    pub operator: BoundOperator,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_upper: Option<f64>,
    pub contract_id: ContractId,
    /// Present when a conflict decision was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-direction open quantities across the active set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpenBook {
    pub total_purchase_obligation: f64,
    pub total_sale_obligation: f64,
    pub net_open_position: f64,
    pub total_penalty_exposure: f64,
}

/// Bridge output pair: bounds (feasible-region tightening) and the penalty
/// schedule (objective cost adjustments) stay separate artefacts.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOutput {
    /// Bound-tightened variable values.
    pub variables: BTreeMap<String, f64>,
    pub applied: Vec<AppliedBound>,
    pub penalty_schedule: Vec<PenaltyScheduleEntry>,
    pub open_book: OpenBook,
    /// Ordered solver input materialised from the frame.
    pub solver_input: SolverInput,
}

/// Clause ids never applied as bounds: penalties and schedule-shaped
/// provisions adjust the objective or the calendar, not the feasible
/// region.
const NEVER_BOUND: &[&str] = &[
    "PENALTY_VOLUME_SHORTFALL",
    "PENALTY_LATE_DELIVERY",
    "DEMURRAGE",
    "FORCE_MAJEURE",
    "DELIVERY_PERIOD",
];

pub struct ConstraintBridge {
    frames: Arc<FrameSet>,
}

impl ConstraintBridge {
    pub fn new(frames: Arc<FrameSet>) -> Self {
        Self { frames }
    }

    /// Project the active set onto solver inputs.
    ///
    /// `readiness` must be a passing outcome in live mode; what-if mode
    /// skips the gate entirely.
    pub fn apply(
        &self,
        product_group: &str,
        variables: &BTreeMap<String, f64>,
        active_set: &[Contract],
        mode: BridgeMode,
        readiness: Option<&ReadinessOutcome>,
    ) -> Result<BridgeOutput, BridgeError> {
        if mode == BridgeMode::Live {
            let ready = readiness.map(|r| r.ready).unwrap_or(false);
            if !ready {
                return Err(BridgeError::NotReady {
                    issues: readiness
                        .map(|r| r.issues.iter().map(|i| i.message.clone()).collect())
                        .unwrap_or_else(|| vec!["readiness was not checked".to_string()]),
                });
            }
        }
        let frame = self
            .frames
            .get(product_group)
            .ok_or_else(|| BridgeError::UnknownProductGroup(product_group.to_string()))?;

        let mut values = frame.resolve(variables);
        let mut applied = Vec::new();

        // Deterministic application order: ingest time, then version, then
        // id.
        let mut ordered: Vec<&Contract> = active_set.iter().collect();
        ordered.sort_by(|a, b| {
            a.ingested_at
                .cmp(&b.ingested_at)
                .then(a.version.cmp(&b.version))
                .then(a.id.cmp(&b.id))
        });

        for contract in &ordered {
            for clause in resolve_contract_bounds(contract, |p| frame.contains(p)) {
                apply_bound(&mut values, &clause, contract, &mut applied);
            }
        }

        let penalty_schedule = penalty_schedule(&ordered);
        let open_book = open_book(&ordered, &penalty_schedule);
        let solver_input = frame.solver_input(&values);

        Ok(BridgeOutput {
            variables: values,
            applied,
            penalty_schedule,
            open_book,
            solver_input,
        })
    }
}

/// A bound candidate surviving intra-contract conflict resolution.
struct ResolvedBound<'a> {
    clause: &'a Clause,
    note: Option<String>,
}

/// Applicability filter plus intra-contract conflict resolution: when one
/// contract carries both a floor and a ceiling that cannot hold together,
/// the bridge refuses to apply both and prefers the `=` clause, else the
/// one appearing later in the document.
fn resolve_contract_bounds<'a>(
    contract: &'a Contract,
    in_frame: impl Fn(&str) -> bool,
) -> Vec<ResolvedBound<'a>> {
    let mut by_parameter: BTreeMap<&str, Vec<&Clause>> = BTreeMap::new();
    for clause in &contract.clauses {
        if NEVER_BOUND.contains(&clause.clause_id.as_str()) {
            continue;
        }
        let (Some(parameter), Some(_), Some(_)) =
            (clause.parameter.as_deref(), clause.operator, clause.value)
        else {
            continue;
        };
        if !in_frame(parameter) {
            continue;
        }
        by_parameter.entry(parameter).or_default().push(clause);
    }

    let mut resolved = Vec::new();
    for (parameter, clauses) in by_parameter {
        if !has_internal_conflict(&clauses) {
            resolved.extend(clauses.into_iter().map(|clause| ResolvedBound {
                clause,
                note: None,
            }));
            continue;
        }
        let preferred = clauses
            .iter()
            .find(|c| c.operator == Some(BoundOperator::Eq))
            .copied()
            .unwrap_or_else(|| clauses[clauses.len() - 1]);
        tracing::warn!(
            contract = %contract.id,
            parameter,
            "conflicting bounds within one contract; applying only the preferred clause"
        );
        resolved.push(ResolvedBound {
            clause: preferred,
            note: Some(format!(
                "conflicting bounds on {parameter}: applied only {}",
                preferred.section_ref
            )),
        });
    }
    resolved
}

fn has_internal_conflict(clauses: &[&Clause]) -> bool {
    let mut floor = f64::NEG_INFINITY;
    let mut ceiling = f64::INFINITY;
    for clause in clauses {
        let Some(value) = clause.value else { continue };
        match clause.operator {
            Some(BoundOperator::Gte) => floor = floor.max(value),
            Some(BoundOperator::Lte) => ceiling = ceiling.min(value),
            Some(BoundOperator::Between) => {
                floor = floor.max(value);
                if let Some(upper) = clause.value_upper {
                    ceiling = ceiling.min(upper);
                }
            }
            _ => {}
        }
    }
    floor > ceiling
}

/// Tighten one variable. Bounds only ever tighten the input space.
fn apply_bound(
    values: &mut BTreeMap<String, f64>,
    bound: &ResolvedBound<'_>,
    contract: &Contract,
    applied: &mut Vec<AppliedBound>,
) {
    let clause = bound.clause;
    let (Some(parameter), Some(operator), Some(value)) =
        (clause.parameter.as_deref(), clause.operator, clause.value)
    else {
        return;
    };
    let current = values.entry(parameter.to_string()).or_insert(0.0);
    match operator {
        BoundOperator::Gte => *current = current.max(value),
        BoundOperator::Lte => *current = current.min(value),
        BoundOperator::Eq => *current = value,
        BoundOperator::Between => {
            let upper = clause.value_upper.unwrap_or(value);
            *current = current.clamp(value.min(upper), value.max(upper));
        }
    }
    applied.push(AppliedBound {
        parameter: parameter.to_string(),
        operator,
        value,
        value_upper: clause.value_upper,
        contract_id: contract.id.clone(),
        note: bound.note.clone(),
    });
}

/// Penalty rates from the named clauses, scaled by the open position.
fn penalty_schedule(active: &[&Contract]) -> Vec<PenaltyScheduleEntry> {
    let mut schedule = Vec::new();
    for contract in active {
        let Some(open_qty) = contract.open_position else {
            continue;
        };
        let direction = contract.template_type.direction();
        for (clause_id, penalty_type) in [
            ("PENALTY_VOLUME_SHORTFALL", PenaltyType::VolumeShortfall),
            ("PENALTY_LATE_DELIVERY", PenaltyType::LateDelivery),
            ("DEMURRAGE", PenaltyType::Demurrage),
        ] {
            let Some(clause) = contract.find_clause(clause_id) else {
                continue;
            };
            let Some(rate) = clause.penalty_per_unit.or(clause.value) else {
                continue;
            };
            let mut max_exposure = rate * open_qty;
            if let Some(cap) = clause.penalty_cap {
                max_exposure = max_exposure.min(cap);
            }
            schedule.push(PenaltyScheduleEntry {
                counterparty: contract.counterparty.clone(),
                penalty_type,
                rate_per_ton: rate,
                open_qty,
                max_exposure,
                incoterm: contract.incoterm,
                direction,
            });
        }
    }
    schedule
}

fn open_book(active: &[&Contract], schedule: &[PenaltyScheduleEntry]) -> OpenBook {
    let mut book = OpenBook::default();
    for contract in active {
        let Some(open) = contract.open_position else {
            continue;
        };
        match contract.template_type.direction() {
            Direction::Purchase => book.total_purchase_obligation += open,
            Direction::Sale => book.total_sale_obligation += open,
        }
    }
    book.net_open_position = book.total_purchase_obligation - book.total_sale_obligation;
    book.total_penalty_exposure = schedule.iter().map(|entry| entry.max_exposure).sum();
    book
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameSet;
    use chrono::{NaiveDate, TimeZone, Utc};
    use quayside_protocol::{
        Confidence, CounterpartyType, Incoterm, ReviewStatus, SourceFormat, TemplateType,
        TermType, VerificationStatus,
    };

    fn bridge() -> ConstraintBridge {
        ConstraintBridge::new(Arc::new(FrameSet::standard()))
    }

    fn bound_clause(
        clause_id: &str,
        parameter: &str,
        operator: BoundOperator,
        value: f64,
    ) -> Clause {
        let mut clause = Clause::new(clause_id, "commercial", "t", "Section 1", Confidence::High);
        clause.parameter = Some(parameter.to_string());
        clause.operator = Some(operator);
        clause.value = Some(value);
        clause.unit = Some("mt".to_string());
        clause
    }

    fn contract(id: &str, ingested_minute: u32, clauses: Vec<Clause>) -> Contract {
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
            counterparty: format!("Counterparty {id}"),
            counterparty_type: CounterpartyType::Supplier,
            product_group: "ammonia".to_string(),
            open_position: Some(20_000.0),
            source_file_name: "c.docx".to_string(),
            source_format: SourceFormat::Docx,
            file_size_bytes: 1,
            file_hash: format!("hash-{id}"),
            previous_hash: String::new(),
            remote_item_id: None,
            remote_drive_id: None,
            last_verified_at: None,
            verification_status: VerificationStatus::Verified,
            status: ReviewStatus::Approved,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            sap_validated: true,
            sap_discrepancies: Vec::new(),
            clauses,
            llm_agreement: None,
            ingested_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, ingested_minute, 0).unwrap(),
        }
    }

    fn what_if(
        active: &[Contract],
        variables: &BTreeMap<String, f64>,
    ) -> BridgeOutput {
        bridge()
            .apply("ammonia", variables, active, BridgeMode::WhatIf, None)
            .unwrap()
    }

    #[test]
    fn test_bounds_only_tighten() {
        let mut variables = BTreeMap::new();
        variables.insert("inv_don".to_string(), 2_000.0);
        variables.insert("max_volume_mt".to_string(), 100_000.0);
        let active = vec![contract(
            "a",
            0,
            vec![
                bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Gte, 5_000.0),
                bound_clause("QUANTITY_TOLERANCE", "max_volume_mt", BoundOperator::Lte, 60_000.0),
            ],
        )];
        let output = what_if(&active, &variables);
        assert_eq!(output.variables["inv_don"], 5_000.0, "floor raised the value");
        assert_eq!(output.variables["max_volume_mt"], 60_000.0, "ceiling lowered it");
        assert_eq!(output.applied.len(), 2);

        // A floor below the current value never loosens it.
        let mut variables = BTreeMap::new();
        variables.insert("inv_don".to_string(), 8_000.0);
        let output = what_if(&active, &variables);
        assert_eq!(output.variables["inv_don"], 8_000.0);
    }

    #[test]
    fn test_eq_pins_and_between_clamps() {
        let mut between = bound_clause(
            "QUANTITY_TOLERANCE",
            "monthly_volume_mt",
            BoundOperator::Between,
            8_000.0,
        );
        between.value_upper = Some(12_000.0);
        let active = vec![contract(
            "a",
            0,
            vec![
                bound_clause("PRICE", "buy_price_usd_ton", BoundOperator::Eq, 335.0),
                between,
            ],
        )];
        let mut variables = BTreeMap::new();
        variables.insert("monthly_volume_mt".to_string(), 20_000.0);
        let output = what_if(&active, &variables);
        assert_eq!(output.variables["buy_price_usd_ton"], 335.0);
        assert_eq!(output.variables["monthly_volume_mt"], 12_000.0);
    }

    #[test]
    fn test_penalty_and_window_clauses_never_bound() {
        let mut demurrage = bound_clause("DEMURRAGE", "demurrage_usd_day", BoundOperator::Eq, 18_000.0);
        demurrage.penalty_per_unit = Some(18_000.0);
        let mut shortfall =
            bound_clause("PENALTY_VOLUME_SHORTFALL", "shortfall_penalty_usd_ton", BoundOperator::Eq, 25.0);
        shortfall.penalty_per_unit = Some(25.0);
        let active = vec![contract("a", 0, vec![demurrage, shortfall])];
        let output = what_if(&active, &BTreeMap::new());
        assert!(output.applied.is_empty(), "no bounds from penalty clauses");
        // They do feed the penalty schedule.
        assert_eq!(output.penalty_schedule.len(), 2);
    }

    #[test]
    fn test_cross_contract_bounds_apply_in_ingest_order() {
        // Scenario: contract A floors inv_don at 5000, later contract B
        // caps it at 3000. Both bounds are applied and recorded; the
        // infeasibility is the solver's verdict.
        let a = contract(
            "a",
            0,
            vec![bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Gte, 5_000.0)],
        );
        let b = contract(
            "b",
            5,
            vec![bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Lte, 3_000.0)],
        );
        let output = what_if(&[a, b], &BTreeMap::new());
        assert_eq!(output.applied.len(), 2);
        assert_eq!(output.applied[0].contract_id, ContractId::new("a"));
        assert_eq!(output.applied[1].contract_id, ContractId::new("b"));
        assert_eq!(output.variables["inv_don"], 3_000.0);
    }

    #[test]
    fn test_intra_contract_conflict_applies_only_preferred() {
        let active = vec![contract(
            "a",
            0,
            vec![
                bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Gte, 5_000.0),
                bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Lte, 3_000.0),
            ],
        )];
        let output = what_if(&active, &BTreeMap::new());
        assert_eq!(output.applied.len(), 1, "refuses to apply both");
        let decision = &output.applied[0];
        assert_eq!(decision.operator, BoundOperator::Lte, "later clause preferred");
        assert!(decision.note.as_deref().unwrap_or("").contains("conflicting bounds"));
    }

    #[test]
    fn test_intra_contract_conflict_prefers_eq() {
        let active = vec![contract(
            "a",
            0,
            vec![
                bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Gte, 5_000.0),
                bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Lte, 3_000.0),
                bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Eq, 4_000.0),
            ],
        )];
        let output = what_if(&active, &BTreeMap::new());
        assert_eq!(output.applied.len(), 1);
        assert_eq!(output.applied[0].operator, BoundOperator::Eq);
        assert_eq!(output.variables["inv_don"], 4_000.0);
    }

    #[test]
    fn test_penalty_schedule_exposure_and_cap() {
        let mut shortfall =
            bound_clause("PENALTY_VOLUME_SHORTFALL", "shortfall_penalty_usd_ton", BoundOperator::Eq, 25.0);
        shortfall.penalty_per_unit = Some(25.0);
        shortfall.penalty_cap = Some(300_000.0);
        let active = vec![contract("a", 0, vec![shortfall])];
        let output = what_if(&active, &BTreeMap::new());
        let entry = &output.penalty_schedule[0];
        assert_eq!(entry.penalty_type, PenaltyType::VolumeShortfall);
        assert_eq!(entry.rate_per_ton, 25.0);
        assert_eq!(entry.open_qty, 20_000.0);
        // 25 * 20_000 = 500_000, capped at 300_000.
        assert_eq!(entry.max_exposure, 300_000.0);
        assert_eq!(entry.direction, Direction::Purchase);
    }

    #[test]
    fn test_open_book_aggregation() {
        let mut sale = contract("s", 0, Vec::new());
        sale.template_type = TemplateType::Sale;
        sale.open_position = Some(12_000.0);
        let buy = contract("b", 1, Vec::new());
        let output = what_if(&[buy, sale], &BTreeMap::new());
        assert_eq!(output.open_book.total_purchase_obligation, 20_000.0);
        assert_eq!(output.open_book.total_sale_obligation, 12_000.0);
        assert_eq!(output.open_book.net_open_position, 8_000.0);
    }

    #[test]
    fn test_live_mode_requires_passing_readiness() {
        let err = bridge()
            .apply("ammonia", &BTreeMap::new(), &[], BridgeMode::Live, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotReady { .. }));
    }

    #[test]
    fn test_unknown_product_group() {
        let err = bridge()
            .apply("potash", &BTreeMap::new(), &[], BridgeMode::WhatIf, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownProductGroup(_)));
    }

    #[test]
    fn test_superseded_bound_reverts_to_default() {
        // With the bounding contract gone from the active set, the value
        // reverts to the frame default on the next projection.
        let active = vec![contract(
            "a",
            0,
            vec![bound_clause("MINIMUM_INVENTORY", "inv_don", BoundOperator::Gte, 5_000.0)],
        )];
        let bounded = what_if(&active, &BTreeMap::new());
        assert_eq!(bounded.variables["inv_don"], 5_000.0);
        let unbounded = what_if(&[], &BTreeMap::new());
        assert_eq!(unbounded.variables["inv_don"], 0.0);
    }
}

//! Immutable solve audit.
//!
//! Records are appended once and never updated or deleted. Four index
//! dimensions: contract id, trader id, time range, product group.

use crate::readiness::VariableSource;
use chrono::{DateTime, Utc};
use quayside_protocol::{Contract, ContractId, RunId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Snapshot of one contract as used by a solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSnapshotRef {
    pub id: ContractId,
    pub version: u32,
    pub counterparty: String,
    pub file_hash: String,
}

impl ContractSnapshotRef {
    pub fn of(contract: &Contract) -> Self {
        Self {
            id: contract.id.clone(),
            version: contract.version,
            counterparty: contract.counterparty.clone(),
            file_hash: contract.file_hash.clone(),
        }
    }
}

/// Final status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Optimal,
    Infeasible,
    Error,
    Cancelled,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Optimal => "optimal",
            ResultStatus::Infeasible => "infeasible",
            ResultStatus::Error => "error",
            ResultStatus::Cancelled => "cancelled",
        }
    }
}

/// One immutable solve record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRecord {
    pub run_id: RunId,
    pub product_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trader_id: Option<String>,
    /// `solve` or `monte_carlo`.
    pub mode: String,
    pub contracts_used: Vec<ContractSnapshotRef>,
    /// Post-bridge variable values handed to the engine.
    pub variables: BTreeMap<String, f64>,
    pub variable_sources: Vec<VariableSource>,
    pub contracts_stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_reason: Option<String>,
    pub blocks_submission: bool,
    pub readiness_issues: Vec<String>,
    pub result_status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_detail: Option<String>,

    // Phase timestamps; completed_at >= solve_started_at >=
    // ingestion_completed_at >= contracts_checked_at >= started_at.
    pub started_at: DateTime<Utc>,
    pub contracts_checked_at: DateTime<Utc>,
    pub ingestion_completed_at: DateTime<Utc>,
    pub solve_started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Default)]
struct AuditState {
    /// Ordered by `completed_at` (monotone: records are appended as solves
    /// finish).
    records: Vec<SolveRecord>,
    by_contract: HashMap<ContractId, Vec<usize>>,
    by_trader: HashMap<String, Vec<usize>>,
    by_product_group: HashMap<String, Vec<usize>>,
}

/// The audit log. One writer (the pipeline); readers get clones.
pub struct AuditLog {
    state: Mutex<AuditState>,
    /// Optional forward channel toward the persist adapter.
    persist_tx: Option<mpsc::Sender<SolveRecord>>,
}

impl AuditLog {
    pub fn new(persist_tx: Option<mpsc::Sender<SolveRecord>>) -> Self {
        Self {
            state: Mutex::new(AuditState::default()),
            persist_tx,
        }
    }

    /// Append one record. Durability is awaited before the record becomes
    /// visible to readers.
    pub async fn record(&self, record: SolveRecord) {
        if let Some(tx) = &self.persist_tx {
            if tx.send(record.clone()).await.is_err() {
                tracing::warn!("persist adapter is gone; audit record kept in memory only");
            }
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let index = state.records.len();
        for snapshot in &record.contracts_used {
            state
                .by_contract
                .entry(snapshot.id.clone())
                .or_default()
                .push(index);
        }
        if let Some(trader) = &record.trader_id {
            state.by_trader.entry(trader.clone()).or_default().push(index);
        }
        state
            .by_product_group
            .entry(record.product_group.clone())
            .or_default()
            .push(index);
        state.records.push(record);
    }

    /// All solves that used a contract.
    pub fn by_contract(&self, id: &ContractId) -> Vec<SolveRecord> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .by_contract
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| state.records[i].clone())
            .collect()
    }

    pub fn by_trader(&self, trader_id: &str) -> Vec<SolveRecord> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .by_trader
            .get(trader_id)
            .into_iter()
            .flatten()
            .map(|&i| state.records[i].clone())
            .collect()
    }

    pub fn by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<SolveRecord> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .records
            .iter()
            .filter(|r| r.completed_at >= from && r.completed_at <= to)
            .cloned()
            .collect()
    }

    pub fn by_product_group(&self, product_group: &str) -> Vec<SolveRecord> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .by_product_group
            .get(product_group)
            .into_iter()
            .flatten()
            .map(|&i| state.records[i].clone())
            .collect()
    }

    pub fn get(&self, run_id: &RunId) -> Option<SolveRecord> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.records.iter().find(|r| &r.run_id == run_id).cloned()
    }

    /// One trader's solves in completion order.
    pub fn trader_decision_chain(&self, trader_id: &str) -> Vec<SolveRecord> {
        self.by_trader(trader_id)
    }

    /// Completion-ordered history for one product group.
    pub fn product_group_timeline(&self, product_group: &str) -> Vec<SolveRecord> {
        self.by_product_group(product_group)
    }

    /// Fraction of variables where the auto and trader runs agree (and the
    /// two runs reached the same result status).
    pub fn compare_paths(&self, auto_run: &RunId, trader_run: &RunId) -> Option<f64> {
        let auto = self.get(auto_run)?;
        let trader = self.get(trader_run)?;
        let keys: std::collections::BTreeSet<&String> =
            auto.variables.keys().chain(trader.variables.keys()).collect();
        if keys.is_empty() {
            return Some(if auto.result_status == trader.result_status { 1.0 } else { 0.0 });
        }
        let matching = keys
            .iter()
            .filter(|key| {
                match (auto.variables.get(**key), trader.variables.get(**key)) {
                    (Some(a), Some(b)) => (a - b).abs() < 1e-9,
                    _ => false,
                }
            })
            .count();
        let mut score = matching as f64 / keys.len() as f64;
        if auto.result_status != trader.result_status {
            score *= 0.5;
        }
        Some(score)
    }
}

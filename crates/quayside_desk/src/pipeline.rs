//! Solve pipeline: freshness check -> conditional ingest -> solve -> audit.

use crate::audit::{AuditLog, ContractSnapshotRef, ResultStatus, SolveRecord};
use crate::bridge::{BridgeError, BridgeMode, ConstraintBridge};
use crate::readiness::{ReadinessGate, VariableSource};
use chrono::Utc;
use quayside_ingest::Ingestor;
use quayside_protocol::RunId;
use quayside_solver::{SolveMode, SolverPort, SolverResponse};
use quayside_store::{ContractStore, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

/// Cooperative cancellation flag. Checked before the solve phase starts;
/// an in-flight ingest or solve is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline progress events for loose subscribers (UI).
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started { run_id: RunId, product_group: String },
    Ingesting { run_id: RunId },
    IngestDone { run_id: RunId, changed: usize },
    ContractsStale { run_id: RunId, reason: String },
    SolveDone { run_id: RunId, contracts_stale: bool, status: ResultStatus },
    PipelineError { run_id: RunId, phase: String, error: String },
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Skip the contracts freshness check (marks the audit stale).
    pub skip_contracts_check: bool,
    /// Monte-carlo scenario count; `None` runs a plain solve.
    pub monte_carlo: Option<u32>,
    pub trader_id: Option<String>,
    /// Refuse to solve when the readiness gate fails, instead of solving
    /// and recording the issues.
    pub enforce_readiness: bool,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Readiness enforcement rejected the solve.
    #[error("not ready: {issues:?}")]
    NotReady { issues: Vec<String> },
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The solve pipeline. At most one solve per product group at a time;
/// later requests for the same group queue.
pub struct SolvePipeline {
    store: ContractStore,
    ingestor: Option<Ingestor>,
    bridge: ConstraintBridge,
    gate: ReadinessGate,
    solver: Arc<SolverPort>,
    audit: Arc<AuditLog>,
    events: broadcast::Sender<PipelineEvent>,
    group_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SolvePipeline {
    pub fn new(
        store: ContractStore,
        ingestor: Option<Ingestor>,
        bridge: ConstraintBridge,
        gate: ReadinessGate,
        solver: Arc<SolverPort>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            ingestor,
            bridge,
            gate,
            solver,
            audit,
            events,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one solve invocation end to end.
    pub async fn run(
        &self,
        product_group: &str,
        variables: BTreeMap<String, f64>,
        sources: Vec<VariableSource>,
        options: SolveOptions,
        cancel: &CancelFlag,
    ) -> Result<SolveRecord, PipelineError> {
        // Phase ordering is strictly sequential; one solve per group.
        let lock = self.group_lock(product_group);
        let _guard = lock.lock().await;

        let run_id = RunId::new(format!("run-{}", uuid::Uuid::new_v4().simple()));
        let started_at = Utc::now();
        self.emit(PipelineEvent::Started {
            run_id: run_id.clone(),
            product_group: product_group.to_string(),
        });

        // Contracts freshness check, with conditional re-ingest.
        let mut contracts_stale = false;
        let mut stale_reason = None;
        if options.skip_contracts_check {
            contracts_stale = true;
            stale_reason = Some("contracts check skipped by caller".to_string());
            self.emit(PipelineEvent::ContractsStale {
                run_id: run_id.clone(),
                reason: "skipped by caller".to_string(),
            });
        } else {
            match &self.ingestor {
                Some(ingestor) if ingestor.has_scanner() => {
                    self.emit(PipelineEvent::Ingesting { run_id: run_id.clone() });
                    match ingestor.delta_scan().await {
                        Ok(summary) => {
                            self.emit(PipelineEvent::IngestDone {
                                run_id: run_id.clone(),
                                changed: summary.changed_count(),
                            });
                        }
                        Err(e) => {
                            contracts_stale = true;
                            stale_reason = Some(e.to_string());
                            self.emit(PipelineEvent::ContractsStale {
                                run_id: run_id.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                _ => {
                    contracts_stale = true;
                    stale_reason = Some("scanner unavailable".to_string());
                    self.emit(PipelineEvent::ContractsStale {
                        run_id: run_id.clone(),
                        reason: "scanner unavailable".to_string(),
                    });
                }
            }
        }
        let contracts_checked_at = Utc::now();
        let ingestion_completed_at = Utc::now();

        // Readiness gate.
        let now = Utc::now();
        let today = now.date_naive();
        let readiness = self.gate.check(product_group, today, now, &sources);
        let blocks_submission = !readiness.ready;
        if options.enforce_readiness && !readiness.ready {
            let issues: Vec<String> =
                readiness.issues.iter().map(|i| i.message.clone()).collect();
            self.emit(PipelineEvent::PipelineError {
                run_id: run_id.clone(),
                phase: "readiness".to_string(),
                error: format!("not ready: {}", issues.join("; ")),
            });
            return Err(PipelineError::NotReady { issues });
        }

        // Constraint bridge over the (live or trader-edited) variables.
        let snapshot = self.store.snapshot();
        let active_set: Vec<_> = snapshot
            .list_active_set(product_group, today)
            .into_iter()
            .cloned()
            .collect();
        let mode = if readiness.ready {
            BridgeMode::Live
        } else {
            // Not ready but not enforced: solve anyway, flagged in the
            // audit for the desk to see.
            BridgeMode::WhatIf
        };
        let bridged = self.bridge.apply(
            product_group,
            &variables,
            &active_set,
            mode,
            Some(&readiness),
        )?;
        let contracts_used: Vec<ContractSnapshotRef> =
            active_set.iter().map(ContractSnapshotRef::of).collect();

        // Cancellation is honoured up to here; never mid-solve.
        let solve_started_at = Utc::now();
        let (result_status, profit, result_detail) = if cancel.is_cancelled() {
            self.emit(PipelineEvent::PipelineError {
                run_id: run_id.clone(),
                phase: "solve".to_string(),
                error: "cancelled before solve".to_string(),
            });
            (ResultStatus::Cancelled, None, Some("cancelled before solve".to_string()))
        } else {
            let solve_mode = match options.monte_carlo {
                Some(n_scenarios) => SolveMode::MonteCarlo { n_scenarios },
                None => SolveMode::Solve,
            };
            match self
                .solver
                .invoke(product_group, solve_mode, bridged.solver_input.clone())
                .await
            {
                Ok(SolverResponse::Optimal(result)) => {
                    (ResultStatus::Optimal, Some(result.profit), None)
                }
                Ok(SolverResponse::MonteCarlo(result)) => {
                    (ResultStatus::Optimal, Some(result.mean), None)
                }
                Ok(SolverResponse::Infeasible) => (ResultStatus::Infeasible, None, None),
                Err(e) => {
                    self.emit(PipelineEvent::PipelineError {
                        run_id: run_id.clone(),
                        phase: "solve".to_string(),
                        error: e.to_string(),
                    });
                    (ResultStatus::Error, None, Some(e.to_string()))
                }
            }
        };
        let completed_at = Utc::now();

        let record = SolveRecord {
            run_id: run_id.clone(),
            product_group: product_group.to_string(),
            trader_id: options.trader_id.clone(),
            mode: match options.monte_carlo {
                Some(_) => "monte_carlo".to_string(),
                None => "solve".to_string(),
            },
            contracts_used,
            variables: bridged.variables.clone(),
            variable_sources: sources,
            contracts_stale,
            stale_reason,
            blocks_submission,
            readiness_issues: readiness.issues.iter().map(|i| i.message.clone()).collect(),
            result_status,
            profit,
            result_detail,
            started_at,
            contracts_checked_at,
            ingestion_completed_at,
            solve_started_at,
            completed_at,
        };
        self.audit.record(record.clone()).await;
        self.emit(PipelineEvent::SolveDone {
            run_id,
            contracts_stale,
            status: result_status,
        });
        Ok(record)
    }

    fn group_lock(&self, product_group: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.group_locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(product_group.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}

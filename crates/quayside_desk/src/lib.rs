//! Solve-gating core: constraint bridge, readiness gate, solve pipeline,
//! and the immutable solve audit.
//!
//! The bridge projects the approved active set onto solver variable bounds
//! and a penalty schedule; the readiness gate blocks live solves until all
//! inputs are current; the pipeline sequences freshness check, conditional
//! re-ingest, solve dispatch, and audit; the audit log records every solve
//! immutably with contract and variable snapshots.

pub mod audit;
pub mod bridge;
pub mod frames;
pub mod pipeline;
pub mod readiness;

pub use audit::{AuditLog, ContractSnapshotRef, ResultStatus, SolveRecord};
pub use bridge::{
    AppliedBound, BridgeError, BridgeMode, BridgeOutput, ConstraintBridge, OpenBook,
};
pub use frames::{FrameSet, VariableFrame, VariableSpec};
pub use pipeline::{
    CancelFlag, PipelineError, PipelineEvent, SolveOptions, SolvePipeline,
};
pub use readiness::{
    CheckLevel, ReadinessGate, ReadinessIssue, ReadinessOutcome, ReadinessReport, VariableSource,
};

//! Change feed events emitted by the store writer.

use chrono::{DateTime, Utc};
use quayside_protocol::ContractId;
use serde::{Deserialize, Serialize};

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Ingested,
    VerificationUpdated,
    ReviewUpdated,
    Superseded,
}

/// One mutation observed by the writer, broadcast to loose subscribers
/// (UI, readiness) in mutation order. The persist adapter gets its own
/// bounded channel instead; it must never skip events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Topic key, the product group of the affected contract.
    pub topic: String,
    pub contract_id: ContractId,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

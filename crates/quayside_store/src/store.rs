//! Single-writer contract store with snapshot reads.

use crate::events::{ChangeEvent, ChangeKind};
use chrono::{DateTime, NaiveDate, Utc};
use quayside_protocol::{
    defaults, CanonicalKey, Contract, ContractId, ReviewStatus, VerificationStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Errors surfaced by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("contract not found: {0}")]
    NotFound(ContractId),
    #[error("invalid review transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("store invariant violated: {0}")]
    InvariantViolated(String),
    #[error("store writer is gone")]
    WriterGone,
}

/// One committed mutation, in the exact shape the persist log replays.
/// The full contract is carried so replay is insert-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMutation {
    pub kind: ChangeKind,
    pub contract: Contract,
}

/// Result of an ingest command.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub id: ContractId,
    pub version: u32,
    /// False when the file hash was already ingested for the same canonical
    /// key (verification refreshed, no new version).
    pub created: bool,
    /// Predecessor that moved to `superseded` during this ingest, if any.
    pub superseded_previous: Option<ContractId>,
}

/// Verification metadata patch applied after a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPatch {
    pub status: VerificationStatus,
    pub last_verified_at: DateTime<Utc>,
}

/// A review state-machine transition, already role-checked by the
/// workflow layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTransition {
    pub id: ContractId,
    pub to: ReviewStatus,
    pub reviewed_by: String,
    pub notes: Option<String>,
}

/// Immutable view of the store. Published after every mutation.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    contracts: HashMap<ContractId, Contract>,
    /// Canonical key -> version ids, ascending version order.
    by_key: HashMap<CanonicalKey, Vec<ContractId>>,
    by_product: HashMap<String, Vec<ContractId>>,
    /// Remote item id -> latest contract id for that item.
    by_remote_item: HashMap<String, ContractId>,
    by_hash: HashMap<String, ContractId>,
}

impl StoreSnapshot {
    pub fn get(&self, id: &ContractId) -> Option<&Contract> {
        self.contracts.get(id)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn list_by_product_group(&self, product_group: &str) -> Vec<&Contract> {
        let mut out: Vec<&Contract> = self
            .by_product
            .get(product_group)
            .into_iter()
            .flatten()
            .filter_map(|id| self.contracts.get(id))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Approved, unexpired, SAP-validated contracts with an open position.
    pub fn list_active_set(&self, product_group: &str, today: NaiveDate) -> Vec<&Contract> {
        self.list_by_product_group(product_group)
            .into_iter()
            .filter(|c| c.is_active(today))
            .collect()
    }

    pub fn find_by_remote_item(&self, remote_item_id: &str) -> Option<&Contract> {
        self.by_remote_item
            .get(remote_item_id)
            .and_then(|id| self.contracts.get(id))
    }

    pub fn find_by_hash(&self, file_hash: &str) -> Option<&Contract> {
        self.by_hash.get(file_hash).and_then(|id| self.contracts.get(id))
    }

    /// Latest version for a canonical key, if any.
    pub fn latest_version(&self, key: &CanonicalKey) -> Option<&Contract> {
        self.by_key
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| self.contracts.get(id))
    }

    /// The single approved contract for a canonical key, if any.
    pub fn approved_version(&self, key: &CanonicalKey) -> Option<&Contract> {
        self.by_key
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.contracts.get(id))
            .find(|c| c.status == ReviewStatus::Approved)
    }

    fn insert(&mut self, contract: Contract) {
        let id = contract.id.clone();
        let key = contract.canonical_key();
        let existing = self.contracts.insert(id.clone(), contract);
        if existing.is_none() {
            self.by_key.entry(key).or_default().push(id.clone());
        }
        self.reindex(&id);
    }

    fn reindex(&mut self, id: &ContractId) {
        let Some(contract) = self.contracts.get(id) else {
            return;
        };
        let product_ids = self.by_product.entry(contract.product_group.clone()).or_default();
        if !product_ids.contains(id) {
            product_ids.push(id.clone());
        }
        if let Some(item_id) = &contract.remote_item_id {
            self.by_remote_item.insert(item_id.clone(), id.clone());
        }
        self.by_hash.insert(contract.file_hash.clone(), id.clone());
    }

    /// Single-active and chain invariants; checked before every commit.
    fn check_invariants(&self) -> Result<(), String> {
        for (key, ids) in &self.by_key {
            let approved = ids
                .iter()
                .filter_map(|id| self.contracts.get(id))
                .filter(|c| c.status == ReviewStatus::Approved)
                .count();
            if approved > 1 {
                return Err(format!("{approved} approved contracts for canonical key {key}"));
            }
            let mut prev_hash = String::new();
            for (index, id) in ids.iter().enumerate() {
                let Some(contract) = self.contracts.get(id) else {
                    return Err(format!("dangling version id {id} for key {key}"));
                };
                if contract.version != index as u32 + 1 {
                    return Err(format!(
                        "version gap for key {key}: expected {} found {}",
                        index + 1,
                        contract.version
                    ));
                }
                if contract.previous_hash != prev_hash {
                    return Err(format!(
                        "broken hash chain for key {key} at version {}",
                        contract.version
                    ));
                }
                prev_hash = contract.file_hash.clone();
            }
        }
        Ok(())
    }
}

enum Command {
    Ingest {
        contract: Box<Contract>,
        reply: oneshot::Sender<Result<IngestOutcome, StoreError>>,
    },
    UpdateVerification {
        id: ContractId,
        patch: VerificationPatch,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Review {
        transition: ReviewTransition,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    UpdateActivation {
        id: ContractId,
        sap_validated: bool,
        sap_discrepancies: Vec<String>,
        open_position: Option<f64>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Handle to the store. Cheap to clone; all clones talk to the same
/// writer.
#[derive(Clone)]
pub struct ContractStore {
    tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Arc<StoreSnapshot>>,
    events_tx: broadcast::Sender<ChangeEvent>,
}

impl ContractStore {
    /// Spawn the writer with an empty store.
    pub fn spawn(persist_tx: Option<mpsc::Sender<StoreMutation>>) -> Self {
        Self::spawn_with_state(StoreSnapshot::default(), persist_tx)
    }

    /// Spawn the writer seeded from replayed mutations (log restore).
    pub fn restore(
        mutations: Vec<StoreMutation>,
        persist_tx: Option<mpsc::Sender<StoreMutation>>,
    ) -> Self {
        let mut state = StoreSnapshot::default();
        for mutation in mutations {
            state.insert(mutation.contract);
        }
        Self::spawn_with_state(state, persist_tx)
    }

    fn spawn_with_state(
        state: StoreSnapshot,
        persist_tx: Option<mpsc::Sender<StoreMutation>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(state.clone()));
        let (events_tx, _) = broadcast::channel(defaults::CHANGE_FEED_CAPACITY);
        let writer = Writer {
            state,
            snapshot_tx,
            events_tx: events_tx.clone(),
            persist_tx,
        };
        tokio::spawn(supervise(writer, rx));
        Self {
            tx,
            snapshot_rx,
            events_tx,
        }
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to the loosely-ordered change feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events_tx.subscribe()
    }

    pub async fn ingest(&self, contract: Contract) -> Result<IngestOutcome, StoreError> {
        self.send(|reply| Command::Ingest {
            contract: Box::new(contract),
            reply,
        })
        .await
    }

    pub async fn update_verification(
        &self,
        id: ContractId,
        patch: VerificationPatch,
    ) -> Result<(), StoreError> {
        self.send(|reply| Command::UpdateVerification { id, patch, reply }).await
    }

    pub async fn transition_review(&self, transition: ReviewTransition) -> Result<(), StoreError> {
        self.send(|reply| Command::Review { transition, reply }).await
    }

    pub async fn update_activation(
        &self,
        id: ContractId,
        sap_validated: bool,
        sap_discrepancies: Vec<String>,
        open_position: Option<f64>,
    ) -> Result<(), StoreError> {
        self.send(|reply| Command::UpdateActivation {
            id,
            sap_validated,
            sap_discrepancies,
            open_position,
            reply,
        })
        .await
    }

    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, StoreError>>) -> Command,
    ) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::WriterGone)?;
        reply_rx.await.map_err(|_| StoreError::WriterGone)?
    }
}

struct Writer {
    state: StoreSnapshot,
    snapshot_tx: watch::Sender<Arc<StoreSnapshot>>,
    events_tx: broadcast::Sender<ChangeEvent>,
    persist_tx: Option<mpsc::Sender<StoreMutation>>,
}

/// Restart delay after an invariant violation terminates the writer loop.
const WRITER_RESTART_DELAY: Duration = Duration::from_millis(100);

/// The writer runs until the command channel closes. An invariant
/// violation terminates the current run; the supervisor reloads the last
/// published snapshot and restarts.
async fn supervise(mut writer: Writer, mut rx: mpsc::Receiver<Command>) {
    loop {
        let violated = writer.run(&mut rx).await;
        if !violated {
            return;
        }
        tracing::error!("store writer terminated on invariant violation; restarting from last snapshot");
        writer.state = (*writer.snapshot_tx.borrow().clone()).clone();
        tokio::time::sleep(WRITER_RESTART_DELAY).await;
    }
}

impl Writer {
    /// Process commands; returns `true` if terminated by an invariant
    /// violation, `false` when the channel closed.
    async fn run(&mut self, rx: &mut mpsc::Receiver<Command>) -> bool {
        while let Some(command) = rx.recv().await {
            let violated = match command {
                Command::Ingest { contract, reply } => {
                    let result = self.apply_ingest(*contract).await;
                    let violated = matches!(result, Err(StoreError::InvariantViolated(_)));
                    let _ = reply.send(result);
                    violated
                }
                Command::UpdateVerification { id, patch, reply } => {
                    let result = self.apply_verification(id, patch).await;
                    let violated = matches!(result, Err(StoreError::InvariantViolated(_)));
                    let _ = reply.send(result);
                    violated
                }
                Command::Review { transition, reply } => {
                    let result = self.apply_review(transition).await;
                    let violated = matches!(result, Err(StoreError::InvariantViolated(_)));
                    let _ = reply.send(result);
                    violated
                }
                Command::UpdateActivation {
                    id,
                    sap_validated,
                    sap_discrepancies,
                    open_position,
                    reply,
                } => {
                    let result = self
                        .apply_activation(id, sap_validated, sap_discrepancies, open_position)
                        .await;
                    let violated = matches!(result, Err(StoreError::InvariantViolated(_)));
                    let _ = reply.send(result);
                    violated
                }
            };
            if violated {
                return true;
            }
        }
        false
    }

    /// Commit a scratch state: invariant check, persist (durability before
    /// visibility), publish, broadcast.
    async fn commit(
        &mut self,
        scratch: StoreSnapshot,
        mutations: Vec<StoreMutation>,
    ) -> Result<(), StoreError> {
        scratch
            .check_invariants()
            .map_err(StoreError::InvariantViolated)?;
        if let Some(persist_tx) = &self.persist_tx {
            for mutation in &mutations {
                // Blocking on a full channel is deliberate back-pressure.
                if persist_tx.send(mutation.clone()).await.is_err() {
                    tracing::warn!("persist adapter is gone; continuing without durability");
                }
            }
        }
        self.state = scratch;
        let _ = self.snapshot_tx.send(Arc::new(self.state.clone()));
        for mutation in mutations {
            let _ = self.events_tx.send(ChangeEvent {
                topic: mutation.contract.product_group.clone(),
                contract_id: mutation.contract.id.clone(),
                kind: mutation.kind,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn apply_ingest(&mut self, mut contract: Contract) -> Result<IngestOutcome, StoreError> {
        let key = contract.canonical_key();

        // Identical bytes for the same key: refresh verification, no new
        // version.
        if let Some(existing) = self.state.find_by_hash(&contract.file_hash) {
            if existing.canonical_key() == key {
                let id = existing.id.clone();
                let version = existing.version;
                let mut scratch = self.state.clone();
                let held = scratch
                    .contracts
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                held.verification_status = VerificationStatus::Verified;
                held.last_verified_at = Some(Utc::now());
                let mutation = StoreMutation {
                    kind: ChangeKind::VerificationUpdated,
                    contract: held.clone(),
                };
                self.commit(scratch, vec![mutation]).await?;
                return Ok(IngestOutcome {
                    id,
                    version,
                    created: false,
                    superseded_previous: None,
                });
            }
        }

        let mut scratch = self.state.clone();
        let mut mutations = Vec::new();
        let mut superseded_previous = None;

        match scratch.latest_version(&key) {
            None => {
                contract.version = 1;
                contract.previous_hash = String::new();
            }
            Some(predecessor) => {
                contract.version = predecessor.version + 1;
                contract.previous_hash = predecessor.file_hash.clone();
                let predecessor_id = predecessor.id.clone();
                let predecessor_status = predecessor.status;
                // An approved predecessor keeps serving the solver until the
                // replacement is itself approved; anything still in review
                // is superseded immediately.
                if matches!(
                    predecessor_status,
                    ReviewStatus::Draft | ReviewStatus::PendingReview
                ) {
                    if let Some(held) = scratch.contracts.get_mut(&predecessor_id) {
                        held.status = ReviewStatus::Superseded;
                        mutations.push(StoreMutation {
                            kind: ChangeKind::Superseded,
                            contract: held.clone(),
                        });
                    }
                    superseded_previous = Some(predecessor_id);
                }
            }
        }
        contract.status = ReviewStatus::Draft;
        contract.reviewed_by = None;
        contract.reviewed_at = None;

        let outcome = IngestOutcome {
            id: contract.id.clone(),
            version: contract.version,
            created: true,
            superseded_previous,
        };
        mutations.push(StoreMutation {
            kind: ChangeKind::Ingested,
            contract: contract.clone(),
        });
        scratch.insert(contract);
        self.commit(scratch, mutations).await?;
        Ok(outcome)
    }

    async fn apply_verification(
        &mut self,
        id: ContractId,
        patch: VerificationPatch,
    ) -> Result<(), StoreError> {
        let mut scratch = self.state.clone();
        let held = scratch
            .contracts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        held.verification_status = patch.status;
        held.last_verified_at = Some(patch.last_verified_at);
        let mutation = StoreMutation {
            kind: ChangeKind::VerificationUpdated,
            contract: held.clone(),
        };
        self.commit(scratch, vec![mutation]).await
    }

    async fn apply_review(&mut self, transition: ReviewTransition) -> Result<(), StoreError> {
        let mut scratch = self.state.clone();
        let current = scratch
            .contracts
            .get(&transition.id)
            .ok_or_else(|| StoreError::NotFound(transition.id.clone()))?;
        if !current.status.can_transition_to(transition.to) {
            return Err(StoreError::InvalidTransition {
                from: current.status.as_str().to_string(),
                to: transition.to.as_str().to_string(),
            });
        }
        let key = current.canonical_key();
        let mut mutations = Vec::new();

        // Approval supersedes the currently-approved sibling in the same
        // committed operation.
        if transition.to == ReviewStatus::Approved {
            let sibling = scratch
                .approved_version(&key)
                .filter(|c| c.id != transition.id)
                .map(|c| c.id.clone());
            if let Some(sibling_id) = sibling {
                if let Some(held) = scratch.contracts.get_mut(&sibling_id) {
                    held.status = ReviewStatus::Superseded;
                    mutations.push(StoreMutation {
                        kind: ChangeKind::Superseded,
                        contract: held.clone(),
                    });
                }
            }
        }

        let held = scratch
            .contracts
            .get_mut(&transition.id)
            .ok_or_else(|| StoreError::NotFound(transition.id.clone()))?;
        held.status = transition.to;
        held.reviewed_by = Some(transition.reviewed_by);
        held.reviewed_at = Some(Utc::now());
        if transition.notes.is_some() {
            held.review_notes = transition.notes;
        }
        mutations.push(StoreMutation {
            kind: ChangeKind::ReviewUpdated,
            contract: held.clone(),
        });
        self.commit(scratch, mutations).await
    }

    async fn apply_activation(
        &mut self,
        id: ContractId,
        sap_validated: bool,
        sap_discrepancies: Vec<String>,
        open_position: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut scratch = self.state.clone();
        let held = scratch
            .contracts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        held.sap_validated = sap_validated;
        held.sap_discrepancies = sap_discrepancies;
        if open_position.is_some() {
            held.open_position = open_position;
        }
        let mutation = StoreMutation {
            kind: ChangeKind::ReviewUpdated,
            contract: held.clone(),
        };
        self.commit(scratch, vec![mutation]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_protocol::{
        CounterpartyType, Incoterm, SourceFormat, TemplateType, TermType,
    };

    fn contract(id: &str, counterparty: &str, hash: &str) -> Contract {
        Contract {
            id: ContractId::new(id),
            version: 1,
            template_type: TemplateType::Purchase,
            incoterm: Some(Incoterm::Fob),
            family_id: Some("vessel_purchase_fob".to_string()),
            term_type: TermType::LongTerm,
            company: None,
            contract_number: None,
            effective_date: None,
            expiry_date: Some(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()),
            counterparty: counterparty.to_string(),
            counterparty_type: CounterpartyType::Supplier,
            product_group: "ammonia".to_string(),
            open_position: None,
            source_file_name: "Koch_FOB_2026.docx".to_string(),
            source_format: SourceFormat::Docx,
            file_size_bytes: 145_320,
            file_hash: hash.to_string(),
            previous_hash: String::new(),
            remote_item_id: Some(format!("item-{id}")),
            remote_drive_id: Some("drive-1".to_string()),
            last_verified_at: None,
            verification_status: VerificationStatus::Unverified,
            status: ReviewStatus::Draft,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            sap_validated: false,
            sap_discrepancies: Vec::new(),
            clauses: Vec::new(),
            llm_agreement: None,
            ingested_at: Utc::now(),
        }
    }

    async fn approve_path(store: &ContractStore, id: &ContractId) {
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

    #[tokio::test]
    async fn test_first_ingest_creates_version_one() {
        let store = ContractStore::spawn(None);
        let outcome = store
            .ingest(contract("c1", "Koch Fertilizer, LLC", "a1b2"))
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.version, 1);
        let snap = store.snapshot();
        let held = snap.get(&outcome.id).unwrap();
        assert_eq!(held.status, ReviewStatus::Draft);
        assert_eq!(held.previous_hash, "");
        assert_eq!(held.file_hash, "a1b2");
        assert_eq!(snap.list_by_product_group("ammonia").len(), 1);
    }

    #[tokio::test]
    async fn test_same_hash_same_key_is_noop() {
        let store = ContractStore::spawn(None);
        let first = store
            .ingest(contract("c1", "Koch Fertilizer", "a1b2"))
            .await
            .unwrap();
        let second = store
            .ingest(contract("c2", "Koch Fertilizer, LLC", "a1b2"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 1);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        let held = snap.get(&first.id).unwrap();
        assert_eq!(held.verification_status, VerificationStatus::Verified);
        assert!(held.last_verified_at.is_some());
    }

    #[tokio::test]
    async fn test_reingest_chains_versions_and_supersedes_draft() {
        let store = ContractStore::spawn(None);
        let v1 = store
            .ingest(contract("c1", "Koch Fertilizer", "d3d3"))
            .await
            .unwrap();
        let v2 = store
            .ingest(contract("c2", "Koch Fertilizer", "efef"))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.superseded_previous, Some(v1.id.clone()));
        let snap = store.snapshot();
        let held_v2 = snap.get(&v2.id).unwrap();
        assert_eq!(held_v2.previous_hash, "d3d3");
        assert_eq!(snap.get(&v1.id).unwrap().status, ReviewStatus::Superseded);
    }

    #[tokio::test]
    async fn test_approved_predecessor_survives_until_replacement_approved() {
        let store = ContractStore::spawn(None);
        let v1 = store
            .ingest(contract("c1", "Koch Fertilizer", "d3d3"))
            .await
            .unwrap();
        approve_path(&store, &v1.id).await;

        // Changed file arrives; v1 stays approved while v2 is in review.
        let v2 = store
            .ingest(contract("c2", "Koch Fertilizer", "efef"))
            .await
            .unwrap();
        assert_eq!(v2.superseded_previous, None);
        {
            let snap = store.snapshot();
            assert_eq!(snap.get(&v1.id).unwrap().status, ReviewStatus::Approved);
            assert_eq!(snap.get(&v2.id).unwrap().status, ReviewStatus::Draft);
        }

        // Approving v2 supersedes v1 in the same committed operation.
        approve_path(&store, &v2.id).await;
        let snap = store.snapshot();
        assert_eq!(snap.get(&v1.id).unwrap().status, ReviewStatus::Superseded);
        assert_eq!(snap.get(&v2.id).unwrap().status, ReviewStatus::Approved);
        let key = snap.get(&v2.id).unwrap().canonical_key();
        assert_eq!(snap.approved_version(&key).unwrap().id, v2.id);
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = ContractStore::spawn(None);
        let outcome = store
            .ingest(contract("c1", "Koch Fertilizer", "a1"))
            .await
            .unwrap();
        let err = store
            .transition_review(ReviewTransition {
                id: outcome.id,
                to: ReviewStatus::Approved,
                reviewed_by: "legal-1".to_string(),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let store = ContractStore::spawn(None);
        let outcome = store
            .ingest(contract("c1", "Koch Fertilizer", "a1"))
            .await
            .unwrap();
        store
            .transition_review(ReviewTransition {
                id: outcome.id.clone(),
                to: ReviewStatus::PendingReview,
                reviewed_by: "trader-1".to_string(),
                notes: None,
            })
            .await
            .unwrap();
        store
            .transition_review(ReviewTransition {
                id: outcome.id.clone(),
                to: ReviewStatus::Rejected,
                reviewed_by: "legal-1".to_string(),
                notes: Some("missing sanctions clause".to_string()),
            })
            .await
            .unwrap();
        let err = store
            .transition_review(ReviewTransition {
                id: outcome.id,
                to: ReviewStatus::PendingReview,
                reviewed_by: "trader-1".to_string(),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_active_set_membership() {
        let store = ContractStore::spawn(None);
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let a = store
            .ingest(contract("c1", "Koch Fertilizer", "a1"))
            .await
            .unwrap();
        let b = store.ingest(contract("c2", "Yara", "b2")).await.unwrap();
        approve_path(&store, &a.id).await;
        approve_path(&store, &b.id).await;
        // Only `a` gets SAP validation and an open position.
        store
            .update_activation(a.id.clone(), true, Vec::new(), Some(25_000.0))
            .await
            .unwrap();
        let snap = store.snapshot();
        let active = snap.list_active_set("ammonia", today);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[tokio::test]
    async fn test_change_feed_order() {
        let store = ContractStore::spawn(None);
        let mut feed = store.subscribe();
        let outcome = store
            .ingest(contract("c1", "Koch Fertilizer", "a1"))
            .await
            .unwrap();
        store
            .update_verification(
                outcome.id.clone(),
                VerificationPatch {
                    status: VerificationStatus::Verified,
                    last_verified_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let first = feed.recv().await.unwrap();
        let second = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Ingested);
        assert_eq!(second.kind, ChangeKind::VerificationUpdated);
        assert_eq!(first.topic, "ammonia");
    }

    #[tokio::test]
    async fn test_mutations_reach_persist_channel_before_reply() {
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let store = ContractStore::spawn(Some(persist_tx));
        let outcome = store
            .ingest(contract("c1", "Koch Fertilizer", "a1"))
            .await
            .unwrap();
        // The reply has arrived, so the mutation is already in the channel.
        let mutation = persist_rx.try_recv().expect("mutation queued before reply");
        assert_eq!(mutation.kind, ChangeKind::Ingested);
        assert_eq!(mutation.contract.id, outcome.id);
    }

    #[tokio::test]
    async fn test_restore_replays_to_identical_state() {
        let (persist_tx, mut persist_rx) = mpsc::channel(64);
        let store = ContractStore::spawn(Some(persist_tx));
        let a = store
            .ingest(contract("c1", "Koch Fertilizer", "a1"))
            .await
            .unwrap();
        let _b = store.ingest(contract("c2", "Yara", "b2")).await.unwrap();
        approve_path(&store, &a.id).await;
        let original = store.snapshot();
        drop(store);

        let mut mutations = Vec::new();
        while let Ok(mutation) = persist_rx.try_recv() {
            mutations.push(mutation);
        }
        let restored = ContractStore::restore(mutations, None);
        let snap = restored.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(&a.id).unwrap().status, ReviewStatus::Approved);
        let key = snap.get(&a.id).unwrap().canonical_key();
        assert_eq!(snap.approved_version(&key).unwrap().id, a.id);

        // Replay reproduces the original state exactly (compared through
        // the serialised, id-sorted contract set).
        let serialise = |snapshot: &StoreSnapshot| {
            let mut contracts: Vec<&Contract> = snapshot.contracts().collect();
            contracts.sort_by(|x, y| x.id.cmp(&y.id));
            serde_json::to_string(&contracts).unwrap()
        };
        assert_eq!(serialise(&original), serialise(&snap));
    }
}

//! Versioned in-memory contract store and the review workflow.
//!
//! All writes go through a single writer task, so the single-active
//! invariant (at most one `approved` contract per canonical key) cannot
//! race with itself. Readers never touch the writer: every mutation
//! republishes an immutable snapshot through a watch channel, giving
//! lock-free, consistent reads.
//!
//! Mutations are forwarded to the persist adapter over a bounded channel
//! and awaited before the caller sees the reply: a contract change is
//! durable before it is observable.

mod events;
mod review;
mod store;

pub use events::{ChangeEvent, ChangeKind};
pub use review::{Reviewer, ReviewError, ReviewWorkflow, Role};
pub use store::{
    ContractStore, IngestOutcome, ReviewTransition, StoreError, StoreMutation, StoreSnapshot,
    VerificationPatch,
};

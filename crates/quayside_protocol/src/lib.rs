//! Canonical data model for the Quayside contract desk.
//!
//! Every crate in the workspace speaks these types. The model mirrors the
//! lifecycle of a physical commodity contract: a source document on the
//! remote drive, the structured clauses lifted out of it, the review state
//! machine it moves through, and the provenance chain that ties each
//! version back to the exact bytes it was parsed from.
//!
//! # Canonical key
//!
//! Contract versions chain under `(normalised counterparty, product group)`.
//! At most one version per key is `approved` at any moment; approving a new
//! version supersedes the old one in the same committed operation.

pub mod config;
pub mod defaults;
pub mod hash;
pub mod types;

// Re-export the model for convenience
pub use types::{
    BoundOperator,
    CanonicalKey,
    Clause,
    ClauseRequirement,
    Confidence,
    Contract,
    ContractId,
    CounterpartyType,
    Direction,
    FamilySignature,
    FieldValue,
    Incoterm,
    LlmAgreement,
    PenaltyScheduleEntry,
    PenaltyType,
    Period,
    RequirementLevel,
    ReviewStatus,
    RunId,
    SourceFormat,
    Template,
    TemplateType,
    TermType,
    Transport,
    VerificationStatus,
    normalise_counterparty,
};

pub use config::{DeskConfig, LlmConfig, RemoteStoreConfig};
pub use hash::sha256_hex;

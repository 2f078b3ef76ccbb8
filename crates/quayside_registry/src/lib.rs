//! Template and family registry.
//!
//! Holds the canonical clause inventory, the family signatures, the
//! per-`(contract_type, incoterm)` templates, and the parameter-class
//! membership tables. Reads are lock-free against an immutable snapshot;
//! the rare dynamic registration rebuilds the snapshot and swaps it
//! atomically, so a parser batch that captured a snapshot never observes a
//! torn registry mid-paragraph.

mod registry;
mod seed;

pub use registry::{
    CanonicalClause, RegisterError, RegistrySnapshot, SanityRange, TemplateRegistry,
};

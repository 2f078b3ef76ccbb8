//! Deterministic clause parsing and template validation.
//!
//! The parser lifts structured clauses out of free-form legal text in a
//! fixed ordered pipeline: normalise, segment into section-referenced
//! paragraphs, run anchor matchers most-specific-first, detect the contract
//! family, pull penalty sub-clauses out of remedies text, then dedup.
//! Everything is a pure function of the registry snapshot and the input
//! text: no clock, no randomness, no global state, so re-parsing the same
//! text always yields the same clauses.
//!
//! Validation compares a parsed contract against its template and reports
//! findings; only missing required clauses block submission.

mod matchers;
mod normalise;
mod parser;
pub mod validate;

pub use normalise::{normalise, segment, Paragraph};
pub use parser::{ClauseParser, ParseOutput, ParseWarning};
pub use validate::{
    Finding, FindingKind, ValidateError, ValidateOptions, ValidationReport,
};

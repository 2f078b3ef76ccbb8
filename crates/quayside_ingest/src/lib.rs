//! Contract ingestion: scan -> fetch -> extract -> parse -> version.
//!
//! The ingestor orchestrates the scanner, the document extractor, the
//! deterministic parser, the optional LLM second pass, and the store.
//! File-level failures never abort a batch; they are collected into the
//! per-scan summary.

mod ingest;
mod llm;

pub use ingest::{
    FileError, IngestError, Ingestor, IngestorConfig, ManualIngest, ScanSummary,
};
pub use llm::{cross_check, LlmClause, LlmClient, LlmError, LlmExtraction};

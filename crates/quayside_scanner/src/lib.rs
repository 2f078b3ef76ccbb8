//! Remote contract scanner: subprocess wire protocol and client wrapper.
//!
//! The scanner runs as a long-lived subprocess speaking line-oriented JSON
//! on stdin/stdout (one response per command, FIFO). It owns all remote
//! document-store traffic; interpretation of bytes and hashes stays on the
//! ingest side, so the scanner is replaceable by a filesystem walker or a
//! unit-test fake without touching ingest.
//!
//! The client half supervises the subprocess (restart with backoff after
//! an unexpected exit; outstanding callers get `ScannerCrashed`),
//! multiplexes concurrent callers through a queue with one outstanding
//! command at a time, and injects a fresh bearer token into each command.

pub mod client;
pub mod protocol;
pub mod remote;
pub mod token;

pub use client::{ScanClientError, ScannerClient};
pub use protocol::{
    DiffEntry, DiffResult, FetchResult, KnownFile, RemoteItem, ScanResult, ScannerCommand,
};
pub use token::{TokenError, TokenManager, TokenSource};

//! Scanner wire protocol (JSON lines, one command per line).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Command envelope. The `cmd` tag selects the operation; the bearer token
/// is injected by the client wrapper just before the line is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ScannerCommand {
    /// List recognised contract documents under a folder.
    Scan {
        token: String,
        drive_id: String,
        folder_path: String,
    },
    /// Classify known files as changed/unchanged/missing using metadata
    /// requests only (no downloads).
    DiffHashes { token: String, known: Vec<KnownFile> },
    /// Download one item; the returned hash is computed on the raw bytes
    /// received.
    Fetch {
        token: String,
        drive_id: String,
        item_id: String,
    },
    /// Hash a local file (testing aid).
    HashLocal { path: String },
    /// Liveness probe.
    Ping,
}

impl ScannerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ScannerCommand::Scan { .. } => "scan",
            ScannerCommand::DiffHashes { .. } => "diff_hashes",
            ScannerCommand::Fetch { .. } => "fetch",
            ScannerCommand::HashLocal { .. } => "hash_local",
            ScannerCommand::Ping => "ping",
        }
    }

    /// Set the bearer token on commands that carry one.
    pub fn with_token(mut self, bearer: &str) -> Self {
        match &mut self {
            ScannerCommand::Scan { token, .. }
            | ScannerCommand::DiffHashes { token, .. }
            | ScannerCommand::Fetch { token, .. } => *token = bearer.to_string(),
            ScannerCommand::HashLocal { .. } | ScannerCommand::Ping => {}
        }
        self
    }

    pub fn needs_token(&self) -> bool {
        !matches!(self, ScannerCommand::HashLocal { .. } | ScannerCommand::Ping)
    }
}

/// One remote document with its listing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub item_id: String,
    pub drive_id: String,
    pub name: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// SHA-256 of the remote content when the store reports one. Absence
    /// makes `diff_hashes` classify the file as changed.
    pub sha256: Option<String>,
    pub quick_xor: Option<String>,
    pub web_url: Option<String>,
}

/// A file the store already knows, sent to `diff_hashes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownFile {
    /// Contract id on the desk side; opaque to the scanner.
    pub id: String,
    pub drive_id: String,
    pub item_id: String,
    /// SHA-256 hex-lowercase last ingested.
    pub hash: String,
}

/// One classified entry of a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub id: String,
    pub item_id: String,
    /// Remote hash observed during the diff, when available.
    pub remote_hash: Option<String>,
}

/// `scan` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub items: Vec<RemoteItem>,
}

/// `diff_hashes` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub changed: Vec<DiffEntry>,
    pub unchanged: Vec<DiffEntry>,
    pub missing: Vec<DiffEntry>,
}

/// `fetch` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub sha256: String,
    pub size: u64,
    pub content_base64: String,
}

/// `hash_local` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashLocalResult {
    pub sha256: String,
    pub size: u64,
}

/// Response line: `{"status":"ok", ...payload}` or
/// `{"status":"error","error":...,"detail":...}`.
pub fn ok_response<T: Serialize>(payload: &T) -> serde_json::Value {
    let mut value = serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({}));
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("status".to_string(), serde_json::json!("ok"));
    }
    value
}

pub fn error_response(error: &str, detail: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "error": error,
        "detail": detail.to_string(),
    })
}

/// File extensions the scanner recognises as contract documents.
pub const RECOGNISED_EXTENSIONS: &[&str] = &["pdf", "docx", "docm", "txt"];

pub fn is_recognised_document(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .map(|ext| RECOGNISED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

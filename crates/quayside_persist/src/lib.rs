//! Durable write-ahead log for contract and audit mutations.
//!
//! Append-only files under a root directory, one per day
//! (`YYYY-MM-DD.log`). Each record is
//! `[LEN:4 little-endian][PAYLOAD:LEN][DIGEST:16]` where the digest is the
//! first 16 bytes of SHA-256 over `prev_digest || payload` (zeroes for the
//! first frame of a file). A manifest records the last sealed daily file
//! and its final digest. Fsync is synchronous on every write; producers
//! block when the channel is full, so a mutation is durable before it is
//! observable to new solves.

use chrono::NaiveDate;
use quayside_protocol::hash::chain_digest;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Digest stored per frame: SHA-256 truncated to 16 bytes.
pub const FRAME_DIGEST_LEN: usize = 16;
/// Sanity cap on stored payload sizes (8 MiB).
const MAX_PAYLOAD_LEN: u32 = 8 * 1024 * 1024;

/// One durable record: a topic (`contracts`, `audit`, ...) and its JSON
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistFrame {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persist io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persist serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt log {file} at frame {frame}: {detail}")]
    Corrupt {
        file: String,
        frame: usize,
        detail: String,
    },
}

/// Manifest written when a daily file is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub last_sealed: NaiveDate,
    /// Hex of the sealed file's final frame digest.
    pub final_digest: String,
}

const MANIFEST_NAME: &str = "manifest.json";

fn log_path(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(format!("{}.log", date.format("%Y-%m-%d")))
}

struct OpenLog {
    date: NaiveDate,
    file: File,
    prev_digest: [u8; FRAME_DIGEST_LEN],
}

/// Synchronous append-side of the log. One writer per root directory.
pub struct LogWriter {
    root: PathBuf,
    current: Option<OpenLog>,
}

impl LogWriter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            current: None,
        })
    }

    /// Append one frame under `date`, rotating (and sealing the previous
    /// day) when the date moves on. Fsyncs before returning.
    pub fn append(&mut self, date: NaiveDate, frame: &PersistFrame) -> Result<(), PersistError> {
        if self.current.as_ref().map(|open| open.date) != Some(date) {
            self.rotate_to(date)?;
        }
        let open = self
            .current
            .as_mut()
            .ok_or_else(|| std::io::Error::other("log file not open"))?;

        let payload = serde_json::to_vec(frame)?;
        let digest_full = chain_digest(&open.prev_digest, &payload);
        let mut digest = [0u8; FRAME_DIGEST_LEN];
        digest.copy_from_slice(&digest_full[..FRAME_DIGEST_LEN]);

        open.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        open.file.write_all(&payload)?;
        open.file.write_all(&digest)?;
        open.file.sync_data()?;
        open.prev_digest = digest;
        Ok(())
    }

    /// Seal the current file (manifest update) and open the new day's.
    fn rotate_to(&mut self, date: NaiveDate) -> Result<(), PersistError> {
        if let Some(open) = self.current.take() {
            let manifest = Manifest {
                last_sealed: open.date,
                final_digest: hex(&open.prev_digest),
            };
            let manifest_path = self.root.join(MANIFEST_NAME);
            std::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)?;
            tracing::info!(sealed = %open.date, "sealed daily persist log");
        }

        let path = log_path(&self.root, date);
        // Reopening an existing day (writer restart): walk the file to
        // recover the chain head.
        let prev_digest = if path.exists() {
            read_log_file(&path)?.1
        } else {
            [0u8; FRAME_DIGEST_LEN]
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.current = Some(OpenLog {
            date,
            file,
            prev_digest,
        });
        Ok(())
    }
}

/// The async-facing adapter: consumes frames from a bounded channel and
/// writes them through a [`LogWriter`] on the blocking pool.
pub struct PersistAdapter;

impl PersistAdapter {
    /// Spawn the write-through loop. The task ends when all senders drop.
    pub fn spawn(
        root: PathBuf,
        mut rx: mpsc::Receiver<PersistFrame>,
    ) -> tokio::task::JoinHandle<Result<(), PersistError>> {
        tokio::task::spawn_blocking(move || {
            let mut writer = LogWriter::new(&root)?;
            while let Some(frame) = rx.blocking_recv() {
                writer.append(chrono::Utc::now().date_naive(), &frame)?;
            }
            Ok(())
        })
    }

    /// Pump a typed mutation channel into the frame channel under one
    /// topic. Back-pressure propagates: when the adapter channel is full
    /// the pump blocks, and so do the producers behind `rx`.
    pub fn forward<T>(
        topic: impl Into<String>,
        mut rx: mpsc::Receiver<T>,
        tx: mpsc::Sender<PersistFrame>,
    ) -> tokio::task::JoinHandle<()>
    where
        T: Serialize + Send + 'static,
    {
        let topic = topic.into();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let payload = match serde_json::to_value(&item) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(topic, error = %e, "unserialisable mutation dropped");
                        continue;
                    }
                };
                if tx
                    .send(PersistFrame {
                        topic: topic.clone(),
                        payload,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        })
    }
}

/// Replay every frame in date order.
pub fn restore(root: &Path) -> Result<Vec<PersistFrame>, PersistError> {
    let mut frames = Vec::new();
    for path in log_files(root)? {
        let (file_frames, _) = read_log_file(&path)?;
        frames.extend(file_frames);
    }
    Ok(frames)
}

/// Chain verification report.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub files: usize,
    pub frames: usize,
}

/// Walk every frame of every file, checking the hash chain.
pub fn verify_all(root: &Path) -> Result<VerifyReport, PersistError> {
    let mut report = VerifyReport { files: 0, frames: 0 };
    for path in log_files(root)? {
        let (frames, _) = read_log_file(&path)?;
        report.files += 1;
        report.frames += frames.len();
    }
    Ok(report)
}

/// Read the manifest, if one has been written yet.
pub fn read_manifest(root: &Path) -> Result<Option<Manifest>, PersistError> {
    let path = root.join(MANIFEST_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

fn log_files(root: &Path) -> Result<Vec<PathBuf>, PersistError> {
    let mut paths = Vec::new();
    if !root.exists() {
        return Ok(paths);
    }
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("log") {
            paths.push(path);
        }
    }
    // ISO date names sort chronologically.
    paths.sort();
    Ok(paths)
}

/// Read one log file, verifying the chain; returns its frames and the
/// final digest.
fn read_log_file(path: &Path) -> Result<(Vec<PersistFrame>, [u8; FRAME_DIGEST_LEN]), PersistError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;

    let mut frames = Vec::new();
    let mut prev_digest = [0u8; FRAME_DIGEST_LEN];
    let mut pos = 0usize;
    let mut index = 0usize;
    while pos < raw.len() {
        let corrupt = |detail: &str| PersistError::Corrupt {
            file: file_name.clone(),
            frame: index,
            detail: detail.to_string(),
        };
        if pos + 4 > raw.len() {
            return Err(corrupt("truncated length prefix"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[pos..pos + 4]);
        let len = u32::from_le_bytes(len_bytes);
        if len == 0 || len > MAX_PAYLOAD_LEN {
            return Err(corrupt(&format!("unreasonable payload length {len}")));
        }
        pos += 4;
        let len = len as usize;
        if pos + len + FRAME_DIGEST_LEN > raw.len() {
            return Err(corrupt("truncated frame"));
        }
        let payload = &raw[pos..pos + len];
        pos += len;
        let stored_digest = &raw[pos..pos + FRAME_DIGEST_LEN];
        pos += FRAME_DIGEST_LEN;

        let expected_full = chain_digest(&prev_digest, payload);
        if stored_digest != &expected_full[..FRAME_DIGEST_LEN] {
            return Err(corrupt("hash chain mismatch"));
        }
        prev_digest.copy_from_slice(stored_digest);
        frames.push(serde_json::from_slice(payload)?);
        index += 1;
    }
    Ok((frames, prev_digest))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write as _;
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(topic: &str, n: u64) -> PersistFrame {
        PersistFrame {
            topic: topic.to_string(),
            payload: serde_json::json!({ "seq": n, "body": format!("mutation-{n}") }),
        }
    }

    #[test]
    fn test_append_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let mut writer = LogWriter::new(dir.path()).unwrap();
        for n in 0..5 {
            writer.append(date, &frame("contracts", n)).unwrap();
        }
        let restored = restore(dir.path()).unwrap();
        assert_eq!(restored.len(), 5);
        assert_eq!(restored[0], frame("contracts", 0));
        assert_eq!(restored[4], frame("contracts", 4));

        let report = verify_all(dir.path()).unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.frames, 5);
    }

    #[test]
    fn test_daily_rotation_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let day1 = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut writer = LogWriter::new(dir.path()).unwrap();
        writer.append(day1, &frame("contracts", 1)).unwrap();
        writer.append(day2, &frame("contracts", 2)).unwrap();

        assert!(log_path(dir.path(), day1).exists());
        assert!(log_path(dir.path(), day2).exists());
        let manifest = read_manifest(dir.path()).unwrap().expect("manifest written");
        assert_eq!(manifest.last_sealed, day1);
        assert_eq!(manifest.final_digest.len(), FRAME_DIGEST_LEN * 2);

        // Frames come back in date order.
        let restored = restore(dir.path()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].payload["seq"], 1);
        assert_eq!(restored[1].payload["seq"], 2);
    }

    #[test]
    fn test_writer_restart_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        {
            let mut writer = LogWriter::new(dir.path()).unwrap();
            writer.append(date, &frame("contracts", 1)).unwrap();
        }
        {
            let mut writer = LogWriter::new(dir.path()).unwrap();
            writer.append(date, &frame("contracts", 2)).unwrap();
        }
        let report = verify_all(dir.path()).unwrap();
        assert_eq!(report.frames, 2);
    }

    #[test]
    fn test_corruption_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let mut writer = LogWriter::new(dir.path()).unwrap();
        writer.append(date, &frame("contracts", 1)).unwrap();
        writer.append(date, &frame("contracts", 2)).unwrap();

        // Flip one payload byte in the middle of the file.
        let path = log_path(dir.path(), date);
        let mut raw = std::fs::read(&path).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let err = verify_all(dir.path()).unwrap_err();
        assert!(matches!(err, PersistError::Corrupt { .. }));
        assert!(restore(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_adapter_channel_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = PersistAdapter::spawn(dir.path().to_path_buf(), rx);
        for n in 0..3 {
            tx.send(frame("audit", n)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap().unwrap();

        let restored = restore(dir.path()).unwrap();
        assert_eq!(restored.len(), 3);
        assert!(restored.iter().all(|f| f.topic == "audit"));
    }

    #[tokio::test]
    async fn test_forwarder_wraps_typed_mutations() {
        #[derive(Serialize)]
        struct Mutation {
            kind: &'static str,
        }
        let (typed_tx, typed_rx) = mpsc::channel(4);
        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let pump = PersistAdapter::forward("contracts", typed_rx, frame_tx);
        typed_tx.send(Mutation { kind: "ingested" }).await.unwrap();
        drop(typed_tx);
        pump.await.unwrap();

        let forwarded = frame_rx.recv().await.unwrap();
        assert_eq!(forwarded.topic, "contracts");
        assert_eq!(forwarded.payload["kind"], "ingested");
    }
}

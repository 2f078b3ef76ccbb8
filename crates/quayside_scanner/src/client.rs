//! Scanner subprocess client: supervision, multiplexing, token injection.

use crate::protocol::{
    DiffResult, FetchResult, KnownFile, RemoteItem, ScanResult, ScannerCommand,
};
use crate::token::TokenSource;
use quayside_protocol::defaults;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Errors surfaced to scanner callers.
#[derive(Debug, Error, Clone)]
pub enum ScanClientError {
    /// The subprocess could not be started.
    #[error("scanner unavailable: {0}")]
    Unavailable(String),
    /// The subprocess exited (or desynced) while commands were outstanding.
    #[error("scanner crashed")]
    Crashed,
    #[error("scanner command timed out after {0:?}")]
    Timeout(Duration),
    #[error("token error: {0}")]
    Token(String),
    #[error("remote api error {status}: {detail}")]
    RemoteApi { status: u16, detail: String },
    #[error("scanner error {error}: {detail}")]
    Command { error: String, detail: String },
    #[error("scanner protocol error: {0}")]
    Protocol(String),
    /// Client handle outlived the supervisor task.
    #[error("scanner client is closed")]
    Closed,
}

struct Request {
    command: ScannerCommand,
    reply: oneshot::Sender<Result<serde_json::Value, ScanClientError>>,
}

/// Handle to the scanner. Cheap to clone; all clones share one subprocess
/// and one outstanding-command slot.
#[derive(Clone)]
pub struct ScannerClient {
    tx: mpsc::Sender<Request>,
}

impl ScannerClient {
    /// Spawn the supervised subprocess client.
    pub fn spawn(binary: PathBuf, tokens: TokenSource, command_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(supervise(binary, tokens, command_timeout, rx));
        Self { tx }
    }

    /// Run the client over pre-connected streams, without supervision.
    /// Used by tests and by in-process fakes.
    pub fn spawn_with_io<R, W>(reader: R, writer: W, tokens: TokenSource, command_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, mut rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut writer = writer;
            let (_end, _ok) =
                session(&mut writer, &mut reader, &tokens, command_timeout, &mut rx).await;
            drain(&mut rx, ScanClientError::Crashed);
            while let Some(request) = rx.recv().await {
                let _ = request.reply.send(Err(ScanClientError::Crashed));
            }
        });
        Self { tx }
    }

    pub async fn scan(
        &self,
        drive_id: &str,
        folder_path: &str,
    ) -> Result<Vec<RemoteItem>, ScanClientError> {
        let value = self
            .request(ScannerCommand::Scan {
                token: String::new(),
                drive_id: drive_id.to_string(),
                folder_path: folder_path.to_string(),
            })
            .await?;
        let result: ScanResult =
            serde_json::from_value(value).map_err(|e| ScanClientError::Protocol(e.to_string()))?;
        Ok(result.items)
    }

    pub async fn diff_hashes(&self, known: Vec<KnownFile>) -> Result<DiffResult, ScanClientError> {
        let value = self
            .request(ScannerCommand::DiffHashes {
                token: String::new(),
                known,
            })
            .await?;
        serde_json::from_value(value).map_err(|e| ScanClientError::Protocol(e.to_string()))
    }

    pub async fn fetch(
        &self,
        drive_id: &str,
        item_id: &str,
    ) -> Result<FetchResult, ScanClientError> {
        let value = self
            .request(ScannerCommand::Fetch {
                token: String::new(),
                drive_id: drive_id.to_string(),
                item_id: item_id.to_string(),
            })
            .await?;
        serde_json::from_value(value).map_err(|e| ScanClientError::Protocol(e.to_string()))
    }

    pub async fn ping(&self) -> Result<(), ScanClientError> {
        self.request(ScannerCommand::Ping).await.map(|_| ())
    }

    async fn request(
        &self,
        command: ScannerCommand,
    ) -> Result<serde_json::Value, ScanClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ScanClientError::Closed)?;
        reply_rx.await.map_err(|_| ScanClientError::Crashed)?
    }
}

enum SessionEnd {
    /// Command channel closed; shut down.
    Closed,
    /// Subprocess stream broke; restart.
    Crashed,
}

async fn supervise(
    binary: PathBuf,
    tokens: TokenSource,
    command_timeout: Duration,
    mut rx: mpsc::Receiver<Request>,
) {
    let mut backoff = Duration::from_millis(defaults::RESPAWN_BACKOFF_INITIAL_MS);
    let backoff_max = Duration::from_millis(defaults::RESPAWN_BACKOFF_MAX_MS);
    loop {
        let mut child = match Command::new(&binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(binary = %binary.display(), error = %e, "scanner spawn failed");
                let unavailable = ScanClientError::Unavailable(e.to_string());
                drain(&mut rx, unavailable.clone());
                // Fail callers arriving during the backoff window too.
                match tokio::time::timeout(backoff, rx.recv()).await {
                    Ok(None) => return,
                    Ok(Some(request)) => {
                        let _ = request.reply.send(Err(unavailable));
                    }
                    Err(_) => {}
                }
                backoff = (backoff * 2).min(backoff_max);
                continue;
            }
        };

        let Some(stdin) = child.stdin.take() else {
            tracing::error!("scanner child has no stdin pipe");
            return;
        };
        let Some(stdout) = child.stdout.take() else {
            tracing::error!("scanner child has no stdout pipe");
            return;
        };
        let mut writer = stdin;
        let mut reader = BufReader::new(stdout);

        tracing::info!(binary = %binary.display(), "scanner subprocess started");
        let (end, any_success) =
            session(&mut writer, &mut reader, &tokens, command_timeout, &mut rx).await;
        let _ = child.kill().await;
        match end {
            SessionEnd::Closed => return,
            SessionEnd::Crashed => {
                // Outstanding callers all fail; then restart after backoff.
                drain(&mut rx, ScanClientError::Crashed);
                if any_success {
                    backoff = Duration::from_millis(defaults::RESPAWN_BACKOFF_INITIAL_MS);
                }
                tracing::warn!(backoff_ms = backoff.as_millis() as u64, "scanner crashed; respawning");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(backoff_max);
            }
        }
    }
}

fn drain(rx: &mut mpsc::Receiver<Request>, error: ScanClientError) {
    while let Ok(request) = rx.try_recv() {
        let _ = request.reply.send(Err(error.clone()));
    }
}

/// Serve commands over one subprocess session. One outstanding command at
/// a time, FIFO responses.
async fn session<R, W>(
    writer: &mut W,
    reader: &mut BufReader<R>,
    tokens: &TokenSource,
    command_timeout: Duration,
    rx: &mut mpsc::Receiver<Request>,
) -> (SessionEnd, bool)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut any_success = false;
    while let Some(Request { command, reply }) = rx.recv().await {
        let command = if command.needs_token() {
            match tokens.bearer_token().await {
                Ok(token) => command.with_token(&token),
                Err(e) => {
                    let _ = reply.send(Err(ScanClientError::Token(e.to_string())));
                    continue;
                }
            }
        } else {
            command
        };

        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                let _ = reply.send(Err(ScanClientError::Protocol(e.to_string())));
                continue;
            }
        };
        line.push('\n');
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            let _ = reply.send(Err(ScanClientError::Crashed));
            return (SessionEnd::Crashed, any_success);
        }

        let mut response_line = String::new();
        match tokio::time::timeout(command_timeout, reader.read_line(&mut response_line)).await {
            // Timed out: the stream is desynced, the session cannot
            // continue.
            Err(_) => {
                let _ = reply.send(Err(ScanClientError::Timeout(command_timeout)));
                return (SessionEnd::Crashed, any_success);
            }
            Ok(Err(_)) | Ok(Ok(0)) => {
                let _ = reply.send(Err(ScanClientError::Crashed));
                return (SessionEnd::Crashed, any_success);
            }
            Ok(Ok(_)) => {}
        }

        let result = decode_response(&response_line);
        if result.is_ok() {
            any_success = true;
        }
        let _ = reply.send(result);
    }
    (SessionEnd::Closed, any_success)
}

fn decode_response(line: &str) -> Result<serde_json::Value, ScanClientError> {
    let value: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| ScanClientError::Protocol(format!("bad response line: {e}")))?;
    match value.get("status").and_then(|s| s.as_str()) {
        Some("ok") => Ok(value),
        Some("error") => {
            let error = value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            let detail = value
                .get("detail")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            if error == "token_error" {
                return Err(ScanClientError::Token(detail));
            }
            if let Some(status) = value.get("http_status").and_then(|s| s.as_u64()) {
                return Err(ScanClientError::RemoteApi {
                    status: status as u16,
                    detail,
                });
            }
            Err(ScanClientError::Command { error, detail })
        }
        _ => Err(ScanClientError::Protocol(
            "response missing status field".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ok_response, DiffEntry};

    /// Fake scanner: reads command lines, answers from a script function.
    fn fake_scanner(
        respond: impl Fn(serde_json::Value) -> Option<serde_json::Value> + Send + 'static,
    ) -> ScannerClient {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let command: serde_json::Value = serde_json::from_str(&line).unwrap();
                match respond(command) {
                    Some(response) => {
                        let mut out = response.to_string();
                        out.push('\n');
                        if server_write.write_all(out.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    // Simulate a crash: close the stream mid-command.
                    None => return,
                }
            }
        });
        ScannerClient::spawn_with_io(
            client_read,
            client_write,
            TokenSource::Static("test-token".to_string()),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_scan_round_trip() {
        let client = fake_scanner(|command| {
            assert_eq!(command["cmd"], "scan");
            assert_eq!(command["token"], "test-token");
            Some(ok_response(&ScanResult {
                items: vec![RemoteItem {
                    item_id: "item-1".to_string(),
                    drive_id: "drive-1".to_string(),
                    name: "Koch_FOB_2026.docx".to_string(),
                    size: 145_320,
                    modified_at: None,
                    sha256: Some("a1b2".to_string()),
                    quick_xor: None,
                    web_url: None,
                }],
            }))
        });
        let items = client.scan("drive-1", "Contracts").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Koch_FOB_2026.docx");
        assert_eq!(items[0].sha256.as_deref(), Some("a1b2"));
    }

    #[tokio::test]
    async fn test_diff_hashes_round_trip() {
        let client = fake_scanner(|command| {
            assert_eq!(command["cmd"], "diff_hashes");
            Some(ok_response(&DiffResult {
                changed: vec![DiffEntry {
                    id: "c42".to_string(),
                    item_id: "item-42".to_string(),
                    remote_hash: Some("efef".to_string()),
                }],
                unchanged: Vec::new(),
                missing: Vec::new(),
            }))
        });
        let diff = client
            .diff_hashes(vec![KnownFile {
                id: "c42".to_string(),
                drive_id: "drive-1".to_string(),
                item_id: "item-42".to_string(),
                hash: "d3d3".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].remote_hash.as_deref(), Some("efef"));
    }

    #[tokio::test]
    async fn test_error_response_mapping() {
        let client = fake_scanner(|_| {
            Some(serde_json::json!({
                "status": "error",
                "error": "remote_api_error",
                "detail": "item gone",
                "http_status": 404,
            }))
        });
        let err = client.fetch("drive-1", "item-9").await.unwrap_err();
        match err {
            ScanClientError::RemoteApi { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "item gone");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_error_mapping() {
        let client = fake_scanner(|_| {
            Some(serde_json::json!({
                "status": "error",
                "error": "token_error",
                "detail": "401 from token endpoint",
            }))
        });
        let err = client.scan("drive-1", "Contracts").await.unwrap_err();
        assert!(matches!(err, ScanClientError::Token(_)));
    }

    #[tokio::test]
    async fn test_crash_fails_outstanding_callers() {
        let client = fake_scanner(|_| None);
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ScanClientError::Crashed));
        // Later callers on the dead session fail the same way.
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ScanClientError::Crashed));
    }

    #[tokio::test]
    async fn test_fifo_under_concurrent_callers() {
        let client = fake_scanner(|command| {
            // Echo the command name back so replies are distinguishable.
            Some(serde_json::json!({
                "status": "ok",
                "echo": command["cmd"],
            }))
        });
        let a = client.request(ScannerCommand::Ping);
        let b = client.request(ScannerCommand::Ping);
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap()["echo"], "ping");
        assert_eq!(rb.unwrap()["echo"], "ping");
    }
}

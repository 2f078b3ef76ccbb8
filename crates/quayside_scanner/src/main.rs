//! Scanner subprocess binary.
//!
//! Reads one JSON command per line on stdin, writes one JSON response per
//! line on stdout, strictly FIFO. stderr carries diagnostics only.

use anyhow::Result;
use quayside_scanner::protocol::{
    error_response, ok_response, DiffEntry, DiffResult, FetchResult, HashLocalResult, KnownFile,
    ScanResult, ScannerCommand,
};
use quayside_scanner::remote::{RemoteError, RemoteStoreClient};
use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quayside_scanner=info")),
        )
        .init();

    let remote = match std::env::var("QUAYSIDE_GRAPH_BASE") {
        Ok(base) if !base.trim().is_empty() => RemoteStoreClient::with_base(base),
        _ => RemoteStoreClient::new(),
    };

    serve(tokio::io::stdin(), tokio::io::stdout(), &remote).await
}

async fn serve<R, W>(input: R, output: W, remote: &RemoteStoreClient) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut output = output;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ScannerCommand>(&line) {
            Ok(command) => {
                tracing::debug!(cmd = command.name(), "handling command");
                handle(command, remote).await
            }
            Err(e) => error_response("bad_command", e),
        };
        let mut out = response.to_string();
        out.push('\n');
        output.write_all(out.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

async fn handle(command: ScannerCommand, remote: &RemoteStoreClient) -> serde_json::Value {
    match command {
        ScannerCommand::Ping => serde_json::json!({ "status": "ok", "pong": true }),
        ScannerCommand::Scan {
            token,
            drive_id,
            folder_path,
        } => match remote.list_children(&token, &drive_id, &folder_path).await {
            Ok(items) => ok_response(&ScanResult { items }),
            Err(e) => remote_error_response(&e),
        },
        ScannerCommand::DiffHashes { token, known } => {
            ok_response(&diff_known(&token, known, remote).await)
        }
        ScannerCommand::Fetch {
            token,
            drive_id,
            item_id,
        } => match remote.download(&token, &drive_id, &item_id).await {
            Ok(bytes) => {
                // Hash is computed on the raw bytes received, not trusted
                // from remote metadata.
                let sha256 = quayside_protocol::sha256_hex(&bytes);
                ok_response(&FetchResult {
                    sha256,
                    size: bytes.len() as u64,
                    content_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
                })
            }
            Err(e) => remote_error_response(&e),
        },
        ScannerCommand::HashLocal { path } => match tokio::fs::read(&path).await {
            Ok(bytes) => ok_response(&HashLocalResult {
                sha256: quayside_protocol::sha256_hex(&bytes),
                size: bytes.len() as u64,
            }),
            Err(e) => error_response("io_error", e),
        },
    }
}

/// Classify known files with metadata requests only. A file whose remote
/// hash is unavailable is conservatively classified as changed.
async fn diff_known(token: &str, known: Vec<KnownFile>, remote: &RemoteStoreClient) -> DiffResult {
    let mut result = DiffResult::default();
    for file in known {
        let entry = |remote_hash: Option<String>| DiffEntry {
            id: file.id.clone(),
            item_id: file.item_id.clone(),
            remote_hash,
        };
        match remote.item_sha256(token, &file.drive_id, &file.item_id).await {
            Ok(Some(remote_hash)) => {
                if remote_hash.eq_ignore_ascii_case(&file.hash) {
                    result.unchanged.push(entry(Some(remote_hash)));
                } else {
                    result.changed.push(entry(Some(remote_hash)));
                }
            }
            Ok(None) => result.changed.push(entry(None)),
            Err(e) if e.http_status() == Some(404) => result.missing.push(entry(None)),
            Err(e) => {
                tracing::warn!(item_id = %file.item_id, error = %e, "hash check failed; treating as changed");
                result.changed.push(entry(None));
            }
        }
    }
    result
}

fn remote_error_response(error: &RemoteError) -> serde_json::Value {
    let mut value = error_response("remote_api_error", error);
    if let Some(status) = error.http_status() {
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("http_status".to_string(), serde_json::json!(status));
        }
    }
    value
}

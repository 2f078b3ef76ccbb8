//! Supervised solver subprocess sessions, one per product group.

use crate::codec::{self, SolveMode, SolverInput, SolverResponse, MAX_FRAME_LEN};
use quayside_protocol::defaults;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error, Clone)]
pub enum SolverError {
    #[error("solver unavailable: {0}")]
    Unavailable(String),
    #[error("solver crashed")]
    Crashed,
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),
    /// The engine reported status 2 with a message.
    #[error("solver error: {0}")]
    Engine(String),
    #[error("solver protocol error: {0}")]
    Protocol(String),
    #[error("solver port is closed")]
    Closed,
}

/// Hard deadlines per invocation mode. Solves are never retried.
#[derive(Debug, Clone, Copy)]
pub struct SolverTimeouts {
    pub solve: Duration,
    pub monte_carlo: Duration,
}

impl Default for SolverTimeouts {
    fn default() -> Self {
        Self {
            solve: Duration::from_secs(defaults::SOLVER_SOLVE_TIMEOUT_SECS),
            monte_carlo: Duration::from_secs(defaults::SOLVER_MONTE_CARLO_TIMEOUT_SECS),
        }
    }
}

struct Request {
    mode: SolveMode,
    input: SolverInput,
    reply: oneshot::Sender<Result<SolverResponse, SolverError>>,
}

/// Port to the LP engine. One subprocess and one outstanding command per
/// product group; commands for different groups run independently.
pub struct SolverPort {
    binary: PathBuf,
    timeouts: SolverTimeouts,
    sessions: Mutex<HashMap<String, mpsc::Sender<Request>>>,
}

impl SolverPort {
    pub fn new(binary: PathBuf, timeouts: SolverTimeouts) -> Self {
        Self {
            binary,
            timeouts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Build a port whose sessions are pre-connected streams instead of
    /// subprocesses (tests, in-process fakes).
    pub fn with_session_io<R, W>(
        product_group: &str,
        reader: R,
        writer: W,
        timeouts: SolverTimeouts,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut reader = reader;
            let mut writer = writer;
            let mut rx = rx;
            let _ = session(&mut writer, &mut reader, timeouts, &mut rx).await;
            fail_remaining(&mut rx).await;
        });
        let port = Self::new(PathBuf::new(), timeouts);
        port.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(product_group.to_string(), tx);
        port
    }

    /// Invoke the engine for one product group. Serialised per group: a
    /// second solve for the same group queues behind the first.
    pub async fn invoke(
        &self,
        product_group: &str,
        mode: SolveMode,
        input: SolverInput,
    ) -> Result<SolverResponse, SolverError> {
        let tx = self.session_for(product_group);
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Request {
            mode,
            input,
            reply: reply_tx,
        })
        .await
        .map_err(|_| SolverError::Closed)?;
        reply_rx.await.map_err(|_| SolverError::Crashed)?
    }

    fn session_for(&self, product_group: &str) -> mpsc::Sender<Request> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        sessions
            .entry(product_group.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(supervise(
                    self.binary.clone(),
                    product_group.to_string(),
                    self.timeouts,
                    rx,
                ));
                tx
            })
            .clone()
    }
}

async fn supervise(
    binary: PathBuf,
    product_group: String,
    timeouts: SolverTimeouts,
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
                tracing::warn!(binary = %binary.display(), error = %e, "solver spawn failed");
                let unavailable = SolverError::Unavailable(e.to_string());
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
        let Some(mut stdin) = child.stdin.take() else {
            tracing::error!("solver child has no stdin pipe");
            return;
        };
        let Some(mut stdout) = child.stdout.take() else {
            tracing::error!("solver child has no stdout pipe");
            return;
        };

        tracing::info!(product_group, "solver subprocess started");
        let closed = session(&mut stdin, &mut stdout, timeouts, &mut rx).await;
        let _ = child.kill().await;
        if closed {
            return;
        }
        tracing::warn!(product_group, "solver crashed; respawning replacement");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(backoff_max);
    }
}

async fn fail_remaining(rx: &mut mpsc::Receiver<Request>) {
    while let Some(request) = rx.recv().await {
        let _ = request.reply.send(Err(SolverError::Crashed));
    }
}

/// Serve requests over one subprocess session. Returns `true` when the
/// command channel closed, `false` when the stream broke.
async fn session<W, R>(
    writer: &mut W,
    reader: &mut R,
    timeouts: SolverTimeouts,
    rx: &mut mpsc::Receiver<Request>,
) -> bool
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    while let Some(Request { mode, input, reply }) = rx.recv().await {
        let body = codec::encode_request(mode, &input);
        let deadline = match mode {
            SolveMode::Solve => timeouts.solve,
            SolveMode::MonteCarlo { .. } => timeouts.monte_carlo,
        };

        if write_frame(writer, &body).await.is_err() {
            let _ = reply.send(Err(SolverError::Crashed));
            return false;
        }
        let response = match tokio::time::timeout(deadline, read_frame(reader)).await {
            Err(_) => {
                let _ = reply.send(Err(SolverError::Timeout(deadline)));
                return false;
            }
            Ok(Err(e)) => {
                let _ = reply.send(Err(e));
                return false;
            }
            Ok(Ok(frame)) => codec::decode_response(&frame, mode, &input),
        };
        let _ = reply.send(response);
    }
    true
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> std::io::Result<()> {
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, SolverError> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| SolverError::Crashed)?;
    let length = u32::from_be_bytes(header);
    if length == 0 || length > MAX_FRAME_LEN {
        return Err(SolverError::Protocol(format!(
            "unreasonable frame length {length}"
        )));
    }
    let mut body = vec![0u8; length as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| SolverError::Crashed)?;
    Ok(body)
}

//! Pluggable PDF text engines.
//!
//! The desk treats PDF byte-to-text conversion as an external concern: the
//! default engine shells out to a layout-preserving `pdftotext`, and tests
//! plug a fixed double.

use crate::{ExtractError, Result};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Byte-to-text engine for PDF sources.
pub trait PdfTextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<String>;
}

/// Default engine: `pdftotext -layout <file> -` as a short-lived
/// subprocess. Synchronous; callers on the async side use the blocking
/// pool.
pub struct LayoutPdfExtractor {
    binary: PathBuf,
    timeout: Duration,
}

/// Poll interval while waiting for the subprocess to exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl LayoutPdfExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PdfTextExtractor for LayoutPdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let mut source = tempfile::NamedTempFile::new()
            .map_err(|e| ExtractError::failed(format!("temp file: {e}")))?;
        std::io::Write::write_all(&mut source, bytes)
            .map_err(|e| ExtractError::failed(format!("temp file write: {e}")))?;

        let mut child = Command::new(&self.binary)
            .arg("-layout")
            .arg(source.path())
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExtractError::failed(format!("spawning {}: {e}", self.binary.display()))
            })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ExtractError::failed(format!(
                            "pdftotext timed out after {:?}",
                            self.timeout
                        )));
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => return Err(ExtractError::failed(format!("waiting on pdftotext: {e}"))),
            }
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)
                .map_err(|e| ExtractError::failed(format!("reading pdftotext output: {e}")))?;
        }
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(ExtractError::failed(format!(
                "pdftotext exited with {status}: {}",
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

/// Test double returning fixed text regardless of input bytes.
pub struct FixedPdfExtractor {
    text: String,
}

impl FixedPdfExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl PdfTextExtractor for FixedPdfExtractor {
    fn extract_text(&self, _bytes: &[u8]) -> Result<String> {
        Ok(self.text.clone())
    }
}

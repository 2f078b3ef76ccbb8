//! Logging setup for the Quayside binaries.
//!
//! Log files are day-keyed (`quayside-2026-03-01.log`) under the desk
//! home, the same day-per-file convention the durable contract log uses,
//! so a solve audit and its diagnostics land in files named for the same
//! trading day. Rollover happens on the first write of a new day and
//! sweeps files older than the retention window. stderr carries warnings
//! only, unless the command asked for verbose output.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "quayside=info,quayside_ingest=info,quayside_desk=info,quayside_scanner=info,quayside_store=info";
/// Daily log files older than this are removed at rollover.
const RETAIN_DAYS: i64 = 14;

/// Initialize tracing: a day-keyed file layer under the desk home plus a
/// stderr layer. `QUAYSIDE_LOG` overrides the default filter.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let files = DailyLogFiles::new(log_dir, app_name)
        .with_context(|| format!("Failed to open daily log for {app_name}"))?;

    let file_filter = EnvFilter::try_from_env("QUAYSIDE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(DailyWriter {
                    files: Arc::new(files),
                })
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The desk home directory: `$QUAYSIDE_HOME` or `~/.quayside`.
pub fn quayside_home() -> PathBuf {
    match std::env::var_os("QUAYSIDE_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quayside"),
    }
}

pub fn logs_dir() -> PathBuf {
    quayside_home().join("logs")
}

fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

struct OpenDay {
    date: NaiveDate,
    file: File,
}

/// One log file per day per app, swept to the retention window.
struct DailyLogFiles {
    dir: PathBuf,
    stem: String,
    current: Mutex<Option<OpenDay>>,
}

impl DailyLogFiles {
    fn new(dir: PathBuf, app_name: &str) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            stem: log_file_stem(app_name),
            current: Mutex::new(None),
        })
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.log", self.stem, date.format("%Y-%m-%d")))
    }

    /// Append under the given day, rolling to a new file (and sweeping old
    /// ones) when the day has moved on since the last write.
    fn write_dated(&self, date: NaiveDate, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log state poisoned"))?;
        let needs_roll = guard.as_ref().map(|open| open.date != date).unwrap_or(true);
        if needs_roll {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(date))?;
            *guard = Some(OpenDay { date, file });
            self.sweep(date);
        }
        match guard.as_mut() {
            Some(open) => open.file.write(buf),
            None => Err(io::Error::other("log file unavailable")),
        }
    }

    fn flush(&self) -> io::Result<()> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log state poisoned"))?;
        if let Some(open) = guard.as_mut() {
            open.file.flush()?;
        }
        Ok(())
    }

    /// Remove this app's daily files that have aged out. Unparsable names
    /// are left alone.
    fn sweep(&self, today: NaiveDate) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let prefix = format!("{}-", self.stem);
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(date_part) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".log"))
            else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
                continue;
            };
            if (today - date).num_days() > RETAIN_DAYS {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::debug!(file = name, error = %e, "could not sweep old log file");
                }
            }
        }
    }
}

#[derive(Clone)]
struct DailyWriter {
    files: Arc<DailyLogFiles>,
}

struct DailyWriterGuard {
    files: Arc<DailyLogFiles>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for DailyWriter {
    type Writer = DailyWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        DailyWriterGuard {
            files: Arc::clone(&self.files),
        }
    }
}

impl Write for DailyWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files.write_dated(Utc::now().date_naive(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.files.flush()
    }
}

/// File-name stem for an app: lowercase alphanumerics, everything else
/// collapsed to single dashes.
fn log_file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            stem.push(ch.to_ascii_lowercase());
        } else if !stem.ends_with('-') && !stem.is_empty() {
            stem.push('-');
        }
    }
    let trimmed = stem.trim_end_matches('-');
    if trimmed.is_empty() {
        "quayside".to_string()
    } else {
        trimmed.to_string()
    }
}

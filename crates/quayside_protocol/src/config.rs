//! Desk configuration assembled from the environment.
//!
//! Secrets (client secret, LLM key) live only in this struct at runtime;
//! they are never serialised into contract records, audit frames, or the
//! persist log.

use crate::defaults;
use std::path::PathBuf;
use thiserror::Error;

/// Remote document store (SharePoint drive) connection settings.
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub drive_id: String,
    /// Folder under the drive root holding contract documents.
    pub contracts_folder: String,
}

/// LLM second-pass endpoint settings. Absent config disables the pass.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Canonical desk configuration used by the CLI and the pipeline.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub remote: Option<RemoteStoreConfig>,
    pub llm: Option<LlmConfig>,
    /// Path to the scanner subprocess binary.
    pub scanner_bin: PathBuf,
    /// Path to the LP solver subprocess binary.
    pub solver_bin: PathBuf,
    /// Root directory for the durable log and run artifacts.
    pub data_dir: PathBuf,
    pub scanner_timeout_secs: u64,
    pub solve_timeout_secs: u64,
    pub monte_carlo_timeout_secs: u64,
    /// Staleness threshold for upstream variable sources, seconds.
    pub variable_staleness_secs: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {detail}")]
    InvalidVar { var: &'static str, detail: String },
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl DeskConfig {
    /// Build from `QUAYSIDE_*` environment variables.
    ///
    /// The remote store block is all-or-nothing: if any of tenant, client
    /// id, secret, or drive id is set, all four must be. Same for the LLM
    /// block (endpoint, key, model).
    pub fn from_env() -> Result<Self, ConfigError> {
        let remote = if env_var_opt("QUAYSIDE_TENANT_ID").is_some()
            || env_var_opt("QUAYSIDE_DRIVE_ID").is_some()
        {
            Some(RemoteStoreConfig {
                tenant_id: env_var("QUAYSIDE_TENANT_ID")?,
                client_id: env_var("QUAYSIDE_CLIENT_ID")?,
                client_secret: env_var("QUAYSIDE_CLIENT_SECRET")?,
                drive_id: env_var("QUAYSIDE_DRIVE_ID")?,
                contracts_folder: env_var_opt("QUAYSIDE_CONTRACTS_FOLDER")
                    .unwrap_or_else(|| defaults::DEFAULT_CONTRACTS_FOLDER.to_string()),
            })
        } else {
            None
        };

        let llm = match env_var_opt("QUAYSIDE_LLM_ENDPOINT") {
            Some(endpoint) => Some(LlmConfig {
                endpoint,
                api_key: env_var("QUAYSIDE_LLM_KEY")?,
                model: env_var("QUAYSIDE_LLM_MODEL")?,
                timeout_secs: parse_secs("QUAYSIDE_LLM_TIMEOUT_SECS", defaults::LLM_TIMEOUT_SECS)?,
            }),
            None => None,
        };

        Ok(Self {
            remote,
            llm,
            scanner_bin: env_var_opt("QUAYSIDE_SCANNER_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("quayside-scanner")),
            solver_bin: env_var_opt("QUAYSIDE_SOLVER_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("quayside-solver")),
            data_dir: env_var_opt("QUAYSIDE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".quayside")),
            scanner_timeout_secs: parse_secs(
                "QUAYSIDE_SCANNER_TIMEOUT_SECS",
                defaults::SCANNER_COMMAND_TIMEOUT_SECS,
            )?,
            solve_timeout_secs: parse_secs(
                "QUAYSIDE_SOLVE_TIMEOUT_SECS",
                defaults::SOLVER_SOLVE_TIMEOUT_SECS,
            )?,
            monte_carlo_timeout_secs: parse_secs(
                "QUAYSIDE_MONTE_CARLO_TIMEOUT_SECS",
                defaults::SOLVER_MONTE_CARLO_TIMEOUT_SECS,
            )?,
            variable_staleness_secs: parse_secs(
                "QUAYSIDE_VARIABLE_STALENESS_SECS",
                defaults::DEFAULT_VARIABLE_STALENESS_SECS as u64,
            )? as i64,
        })
    }
}

fn parse_secs(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_var_opt(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidVar {
            var,
            detail: e.to_string(),
        }),
    }
}

//! Desk wiring: config, persistence restore, and component construction.

use anyhow::{Context, Result};
use quayside_desk::{
    AuditLog, ConstraintBridge, FrameSet, ReadinessGate, SolvePipeline,
};
use quayside_extract::{DocumentExtractor, LayoutPdfExtractor};
use quayside_ingest::{Ingestor, IngestorConfig, LlmClient};
use quayside_persist::{PersistAdapter, PersistFrame};
use quayside_protocol::{defaults, DeskConfig};
use quayside_registry::TemplateRegistry;
use quayside_scanner::{ScannerClient, TokenManager, TokenSource};
use quayside_solver::{SolverPort, SolverTimeouts};
use quayside_store::{ContractStore, ReviewWorkflow, StoreMutation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything a command needs, wired once per invocation.
pub struct DeskContext {
    pub config: DeskConfig,
    pub registry: Arc<TemplateRegistry>,
    pub store: ContractStore,
    pub workflow: ReviewWorkflow,
    pub ingestor: Ingestor,
    pub audit: Arc<AuditLog>,
    pub pipeline: SolvePipeline,
}

impl DeskContext {
    /// Build the desk from the environment: restore the store from the
    /// durable log, then wire the persist adapter, scanner, solver, and
    /// pipeline.
    pub async fn build(product_group: &str) -> Result<Self> {
        let config = DeskConfig::from_env().context("reading QUAYSIDE_* environment")?;
        let registry = Arc::new(TemplateRegistry::seeded());
        let wal_dir = wal_dir(&config.data_dir);

        // Replay the durable log before anything may observe the store.
        let restored = restore_store_mutations(&wal_dir)?;
        if !restored.is_empty() {
            tracing::info!(mutations = restored.len(), "restored contract store from durable log");
        }

        // Persist plumbing: store and audit each pump a typed channel into
        // the adapter's frame channel.
        let (frame_tx, frame_rx) = mpsc::channel(defaults::PERSIST_CHANNEL_CAPACITY);
        let _writer = PersistAdapter::spawn(wal_dir, frame_rx);
        let (store_tx, store_rx) = mpsc::channel(defaults::PERSIST_CHANNEL_CAPACITY);
        let store = ContractStore::restore(restored, Some(store_tx));
        let _contracts_pump = PersistAdapter::forward("contracts", store_rx, frame_tx.clone());
        let (audit_tx, audit_rx) = mpsc::channel(defaults::PERSIST_CHANNEL_CAPACITY);
        let audit = Arc::new(AuditLog::new(Some(audit_tx)));
        let _audit_pump = PersistAdapter::forward("audit", audit_rx, frame_tx);

        let workflow = ReviewWorkflow::new(store.clone(), registry.clone());

        let extractor = DocumentExtractor::new(Arc::new(LayoutPdfExtractor::new(
            std::env::var("QUAYSIDE_PDFTOTEXT").unwrap_or_else(|_| "pdftotext".to_string()),
        )));

        let scanner = match &config.remote {
            Some(remote) => {
                let tokens = TokenManager::new(remote);
                tokens.spawn_refresh();
                Some(ScannerClient::spawn(
                    config.scanner_bin.clone(),
                    TokenSource::Managed(tokens),
                    Duration::from_secs(config.scanner_timeout_secs),
                ))
            }
            None => None,
        };
        let llm = config.llm.clone().map(|llm| Arc::new(LlmClient::new(llm)));

        let ingestor = Ingestor::new(
            store.clone(),
            registry.clone(),
            extractor,
            scanner,
            llm,
            IngestorConfig::new(
                config
                    .remote
                    .as_ref()
                    .map(|r| r.drive_id.clone())
                    .unwrap_or_default(),
                config
                    .remote
                    .as_ref()
                    .map(|r| r.contracts_folder.clone())
                    .unwrap_or_else(|| defaults::DEFAULT_CONTRACTS_FOLDER.to_string()),
                product_group,
            ),
        );

        let solver = Arc::new(SolverPort::new(
            config.solver_bin.clone(),
            SolverTimeouts {
                solve: Duration::from_secs(config.solve_timeout_secs),
                monte_carlo: Duration::from_secs(config.monte_carlo_timeout_secs),
            },
        ));
        let gate = ReadinessGate::new(
            store.clone(),
            registry.clone(),
            config.variable_staleness_secs,
        );
        let bridge = ConstraintBridge::new(Arc::new(FrameSet::standard()));
        let pipeline = SolvePipeline::new(
            store.clone(),
            Some(ingestor.clone()),
            bridge,
            gate,
            solver,
            audit.clone(),
        );

        Ok(Self {
            config,
            registry,
            store,
            workflow,
            ingestor,
            audit,
            pipeline,
        })
    }
}

pub fn wal_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("wal")
}

/// Decode the `contracts` frames of the durable log back into store
/// mutations.
fn restore_store_mutations(wal_dir: &Path) -> Result<Vec<StoreMutation>> {
    let frames = quayside_persist::restore(wal_dir).context("replaying durable log")?;
    let mut mutations = Vec::new();
    for PersistFrame { topic, payload } in frames {
        if topic != "contracts" {
            continue;
        }
        match serde_json::from_value::<StoreMutation>(payload) {
            Ok(mutation) => mutations.push(mutation),
            Err(e) => tracing::warn!(error = %e, "skipping undecodable contracts frame"),
        }
    }
    Ok(mutations)
}

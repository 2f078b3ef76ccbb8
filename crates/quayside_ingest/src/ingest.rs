//! Scan orchestration and contract assembly.

use crate::llm::{cross_check, LlmClient};
use base64::Engine as _;
use chrono::{NaiveDate, Utc};
use quayside_extract::{DocumentExtractor, ExtractError};
use quayside_parser::{ClauseParser, ParseOutput};
use quayside_protocol::{
    defaults, sha256_hex, Contract, ContractId, CounterpartyType, Direction, FieldValue, Incoterm,
    ReviewStatus, SourceFormat, TemplateType, TermType, VerificationStatus,
};
use quayside_registry::{RegistrySnapshot, TemplateRegistry};
use quayside_scanner::{KnownFile, RemoteItem, ScanClientError, ScannerClient};
use quayside_store::{ContractStore, IngestOutcome, StoreError, VerificationPatch};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum IngestError {
    /// No scanner is configured for this desk.
    #[error("scanner unavailable")]
    ScannerUnavailable,
    #[error(transparent)]
    Scanner(#[from] ScanClientError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("ingest failed: {0}")]
    Failed(String),
}

/// One file-level failure inside a scan.
#[derive(Debug, Clone)]
pub struct FileError {
    pub name: String,
    pub error: String,
}

/// Per-scan outcome. Errors for one file never cancel other files.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub scanned: usize,
    pub ingested_new: Vec<ContractId>,
    pub ingested_changed: Vec<ContractId>,
    pub unchanged: usize,
    pub missing: usize,
    pub errors: Vec<FileError>,
}

impl ScanSummary {
    pub fn changed_count(&self) -> usize {
        self.ingested_changed.len()
    }
}

/// Manual upload input, bypassing the scanner.
#[derive(Debug, Clone)]
pub struct ManualIngest {
    pub counterparty: String,
    pub counterparty_type: CounterpartyType,
    pub product_group: String,
    pub source_file_bytes: Vec<u8>,
    pub source_file_name: String,
    pub contract_number: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub company: Option<String>,
}

/// Desk-level ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub drive_id: String,
    pub folder_path: String,
    /// Product group this desk ingests into.
    pub product_group: String,
    /// Bounded in-flight file count during a scan.
    pub max_inflight: usize,
}

impl IngestorConfig {
    pub fn new(drive_id: impl Into<String>, folder_path: impl Into<String>, product_group: impl Into<String>) -> Self {
        Self {
            drive_id: drive_id.into(),
            folder_path: folder_path.into(),
            product_group: product_group.into(),
            max_inflight: defaults::MAX_INFLIGHT_FILES,
        }
    }
}

/// The ingestion orchestrator.
#[derive(Clone)]
pub struct Ingestor {
    store: ContractStore,
    registry: Arc<TemplateRegistry>,
    extractor: DocumentExtractor,
    scanner: Option<ScannerClient>,
    llm: Option<Arc<LlmClient>>,
    config: IngestorConfig,
}

impl Ingestor {
    pub fn new(
        store: ContractStore,
        registry: Arc<TemplateRegistry>,
        extractor: DocumentExtractor,
        scanner: Option<ScannerClient>,
        llm: Option<Arc<LlmClient>>,
        config: IngestorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            extractor,
            scanner,
            llm,
            config,
        }
    }

    pub fn has_scanner(&self) -> bool {
        self.scanner.is_some()
    }

    /// Full scan: list the folder, classify every file against the store,
    /// verify unchanged files, ingest new and changed ones.
    pub async fn full_scan(&self) -> Result<ScanSummary, IngestError> {
        let scanner = self.scanner.as_ref().ok_or(IngestError::ScannerUnavailable)?;
        let items = scanner
            .scan(&self.config.drive_id, &self.config.folder_path)
            .await?;
        let snapshot = self.store.snapshot();

        let mut summary = ScanSummary {
            scanned: items.len(),
            ..Default::default()
        };
        let mut to_process: Vec<(RemoteItem, Option<Contract>)> = Vec::new();
        for item in items {
            let existing = snapshot
                .find_by_remote_item(&item.item_id)
                .or_else(|| item.sha256.as_deref().and_then(|h| snapshot.find_by_hash(h)));
            match existing {
                Some(contract) if item.sha256.as_deref() == Some(contract.file_hash.as_str()) => {
                    self.mark_verified(&contract.id).await?;
                    summary.unchanged += 1;
                }
                Some(contract) => to_process.push((item, Some(contract.clone()))),
                None => to_process.push((item, None)),
            }
        }

        self.process_batch(to_process, &mut summary).await;
        tracing::info!(
            scanned = summary.scanned,
            new = summary.ingested_new.len(),
            changed = summary.ingested_changed.len(),
            unchanged = summary.unchanged,
            errors = summary.errors.len(),
            "full scan complete"
        );
        Ok(summary)
    }

    /// Delta scan: hash-diff the store's current entries without
    /// downloading, then ingest only what changed.
    pub async fn delta_scan(&self) -> Result<ScanSummary, IngestError> {
        let scanner = self.scanner.as_ref().ok_or(IngestError::ScannerUnavailable)?;
        let snapshot = self.store.snapshot();

        let mut known = Vec::new();
        for contract in snapshot.contracts() {
            if contract.product_group != self.config.product_group {
                continue;
            }
            // Only the head of each version chain is tracked remotely.
            let key = contract.canonical_key();
            let is_latest = snapshot
                .latest_version(&key)
                .map(|latest| latest.id == contract.id)
                .unwrap_or(false);
            if !is_latest {
                continue;
            }
            let (Some(item_id), Some(drive_id)) =
                (&contract.remote_item_id, &contract.remote_drive_id)
            else {
                continue;
            };
            known.push(KnownFile {
                id: contract.id.to_string(),
                drive_id: drive_id.clone(),
                item_id: item_id.clone(),
                hash: contract.file_hash.clone(),
            });
        }

        let diff = scanner.diff_hashes(known).await?;
        let mut summary = ScanSummary {
            scanned: diff.changed.len() + diff.unchanged.len() + diff.missing.len(),
            ..Default::default()
        };

        for entry in &diff.unchanged {
            let id = ContractId::new(entry.id.clone());
            self.mark_verified(&id).await?;
            summary.unchanged += 1;
        }
        for entry in &diff.missing {
            let id = ContractId::new(entry.id.clone());
            self.store
                .update_verification(
                    id,
                    VerificationPatch {
                        status: VerificationStatus::FileNotFound,
                        last_verified_at: Utc::now(),
                    },
                )
                .await?;
            summary.missing += 1;
        }

        let mut to_process: Vec<(RemoteItem, Option<Contract>)> = Vec::new();
        for entry in &diff.changed {
            let id = ContractId::new(entry.id.clone());
            let Some(predecessor) = snapshot.get(&id) else {
                summary.errors.push(FileError {
                    name: entry.item_id.clone(),
                    error: format!("diff reported unknown contract {id}"),
                });
                continue;
            };
            let item = RemoteItem {
                item_id: entry.item_id.clone(),
                drive_id: predecessor
                    .remote_drive_id
                    .clone()
                    .unwrap_or_else(|| self.config.drive_id.clone()),
                name: predecessor.source_file_name.clone(),
                size: 0,
                modified_at: None,
                sha256: entry.remote_hash.clone(),
                quick_xor: None,
                web_url: None,
            };
            to_process.push((item, Some(predecessor.clone())));
        }

        self.process_batch(to_process, &mut summary).await;
        tracing::info!(
            checked = summary.scanned,
            changed = summary.ingested_changed.len(),
            unchanged = summary.unchanged,
            missing = summary.missing,
            errors = summary.errors.len(),
            "delta scan complete"
        );
        Ok(summary)
    }

    /// Manual upload, bypassing the scanner.
    pub async fn ingest_manual(&self, request: ManualIngest) -> Result<IngestOutcome, IngestError> {
        let snapshot = self.registry.snapshot();
        let text = self
            .extractor
            .extract(&request.source_file_bytes, &request.source_file_name)?;
        let parse = ClauseParser::new(snapshot.clone()).parse(&text);
        let llm_agreement = self.second_pass(&text, &snapshot, &parse).await;

        let file_hash = sha256_hex(&request.source_file_bytes);
        let mut contract = assemble_contract(
            &snapshot,
            &parse,
            ContractIdentity {
                counterparty: request.counterparty,
                counterparty_type: request.counterparty_type,
                product_group: request.product_group,
                company: request.company,
                contract_number: request.contract_number,
                effective_date: request.effective_date,
                expiry_date: request.expiry_date,
            },
            &request.source_file_name,
            request.source_file_bytes.len() as u64,
            file_hash,
        )?;
        contract.llm_agreement = llm_agreement;
        Ok(self.store.ingest(contract).await?)
    }

    async fn mark_verified(&self, id: &ContractId) -> Result<(), StoreError> {
        self.store
            .update_verification(
                id.clone(),
                VerificationPatch {
                    status: VerificationStatus::Verified,
                    last_verified_at: Utc::now(),
                },
            )
            .await
    }

    /// Fetch, extract, parse, and ingest a batch with a bounded in-flight
    /// count. One snapshot is captured for the whole batch, so dynamic
    /// registrations land only at batch boundaries.
    async fn process_batch(
        &self,
        batch: Vec<(RemoteItem, Option<Contract>)>,
        summary: &mut ScanSummary,
    ) {
        if batch.is_empty() {
            return;
        }
        let snapshot = self.registry.snapshot();
        let limiter = Arc::new(Semaphore::new(self.config.max_inflight.max(1)));
        let mut tasks: JoinSet<(String, bool, Result<IngestOutcome, IngestError>)> = JoinSet::new();

        for (item, predecessor) in batch {
            let ingestor = self.clone();
            let snapshot = snapshot.clone();
            let limiter = limiter.clone();
            let is_changed = predecessor.is_some();
            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let name = item.name.clone();
                let result = ingestor
                    .process_remote_file(item, predecessor, &snapshot)
                    .await;
                (name, is_changed, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, is_changed, Ok(outcome))) if outcome.created => {
                    if is_changed {
                        summary.ingested_changed.push(outcome.id);
                    } else {
                        summary.ingested_new.push(outcome.id);
                    }
                }
                Ok((_, _, Ok(_noop))) => summary.unchanged += 1,
                Ok((name, _, Err(e))) => summary.errors.push(FileError {
                    name,
                    error: e.to_string(),
                }),
                Err(join_error) => summary.errors.push(FileError {
                    name: "<task>".to_string(),
                    error: join_error.to_string(),
                }),
            }
        }
    }

    async fn process_remote_file(
        &self,
        item: RemoteItem,
        predecessor: Option<Contract>,
        snapshot: &Arc<RegistrySnapshot>,
    ) -> Result<IngestOutcome, IngestError> {
        let scanner = self.scanner.as_ref().ok_or(IngestError::ScannerUnavailable)?;
        let fetched = scanner.fetch(&item.drive_id, &item.item_id).await?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&fetched.content_base64)
            .map_err(|e| IngestError::Fetch(format!("bad base64 content: {e}")))?;
        let file_hash = sha256_hex(&bytes);
        if file_hash != fetched.sha256 {
            return Err(IngestError::Fetch(format!(
                "hash mismatch: scanner reported {} but bytes hash to {file_hash}",
                fetched.sha256
            )));
        }

        // Extraction is CPU/subprocess work; keep it off the async runtime.
        let extractor = self.extractor.clone();
        let name = item.name.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &name))
            .await
            .map_err(|e| IngestError::Failed(e.to_string()))??;

        let parse = ClauseParser::new(snapshot.clone()).parse(&text);
        let llm_agreement = self.second_pass(&text, snapshot, &parse).await;

        let identity = match &predecessor {
            Some(prev) => ContractIdentity {
                counterparty: prev.counterparty.clone(),
                counterparty_type: prev.counterparty_type,
                product_group: prev.product_group.clone(),
                company: prev.company.clone(),
                contract_number: prev.contract_number.clone(),
                effective_date: prev.effective_date,
                expiry_date: prev.expiry_date,
            },
            None => ContractIdentity {
                counterparty: infer_counterparty(&text, parse.direction)
                    .unwrap_or_else(|| counterparty_from_file_name(&item.name)),
                counterparty_type: match parse.direction {
                    Some(Direction::Sale) => CounterpartyType::Customer,
                    _ => CounterpartyType::Supplier,
                },
                product_group: self.config.product_group.clone(),
                company: None,
                contract_number: None,
                effective_date: None,
                expiry_date: None,
            },
        };

        let mut contract = assemble_contract(
            snapshot,
            &parse,
            identity,
            &item.name,
            fetched.size,
            file_hash,
        )?;
        contract.remote_item_id = Some(item.item_id.clone());
        contract.remote_drive_id = Some(item.drive_id.clone());
        contract.verification_status = VerificationStatus::Verified;
        contract.last_verified_at = Some(Utc::now());
        contract.llm_agreement = llm_agreement;

        Ok(self.store.ingest(contract).await?)
    }

    /// Optional LLM cross-check; failures are logged and never fail the
    /// file.
    async fn second_pass(
        &self,
        text: &str,
        snapshot: &RegistrySnapshot,
        parse: &ParseOutput,
    ) -> Option<quayside_protocol::LlmAgreement> {
        let llm = self.llm.as_ref()?;
        match llm.second_pass(text, snapshot).await {
            Ok(extraction) => Some(cross_check(&parse.clauses, &extraction)),
            Err(e) => {
                tracing::warn!(error = %e, "llm second pass failed; deterministic parse stands alone");
                None
            }
        }
    }
}

/// Commercial identity of the contract being assembled.
struct ContractIdentity {
    counterparty: String,
    counterparty_type: CounterpartyType,
    product_group: String,
    company: Option<String>,
    contract_number: Option<String>,
    effective_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
}

/// Build a draft contract from a parse. Version fields are assigned by the
/// store writer at ingest time.
fn assemble_contract(
    snapshot: &RegistrySnapshot,
    parse: &ParseOutput,
    identity: ContractIdentity,
    file_name: &str,
    file_size: u64,
    file_hash: String,
) -> Result<Contract, IngestError> {
    let source_format = SourceFormat::from_file_name(file_name).ok_or_else(|| {
        IngestError::Extract(ExtractError::UnsupportedFormat {
            file_name: file_name.to_string(),
        })
    })?;

    let family = parse
        .family_id
        .as_deref()
        .and_then(|id| snapshot.family(id));
    let term_type = family.map(|f| f.term_type).unwrap_or(TermType::Spot);
    // Family detection wins; otherwise the counterparty side implies the
    // trade direction.
    let direction = parse.direction.unwrap_or(match identity.counterparty_type {
        CounterpartyType::Supplier => Direction::Purchase,
        CounterpartyType::Customer => Direction::Sale,
    });
    let template_type = match direction {
        Direction::Sale => TemplateType::Sale,
        Direction::Purchase => TemplateType::Purchase,
    };
    let incoterm = parse
        .clauses
        .iter()
        .find(|c| c.clause_id == "INCOTERMS")
        .and_then(|c| c.extracted_fields.get("incoterm"))
        .and_then(|v| match v {
            FieldValue::Text(raw) => Incoterm::parse(raw),
            _ => None,
        })
        .or_else(|| family.and_then(|f| f.default_incoterms.first().copied()));

    Ok(Contract {
        id: ContractId::new(format!("ctr-{}", uuid::Uuid::new_v4().simple())),
        version: 1,
        template_type,
        incoterm,
        family_id: parse.family_id.clone(),
        term_type,
        company: identity.company,
        contract_number: identity.contract_number,
        effective_date: identity.effective_date,
        expiry_date: identity.expiry_date,
        counterparty: identity.counterparty,
        counterparty_type: identity.counterparty_type,
        product_group: identity.product_group,
        open_position: None,
        source_file_name: file_name.to_string(),
        source_format,
        file_size_bytes: file_size,
        file_hash,
        previous_hash: String::new(),
        remote_item_id: None,
        remote_drive_id: None,
        last_verified_at: None,
        verification_status: VerificationStatus::Unverified,
        status: ReviewStatus::Draft,
        reviewed_by: None,
        reviewed_at: None,
        review_notes: None,
        sap_validated: false,
        sap_discrepancies: Vec::new(),
        clauses: parse.clauses.clone(),
        llm_agreement: None,
        ingested_at: Utc::now(),
    })
}

fn seller_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*seller\s*[:\-]\s*(.{2,80})$").unwrap())
}

fn buyer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*buyer\s*[:\-]\s*(.{2,80})$").unwrap())
}

/// Counterparty is the other side of the trade: the seller on a purchase,
/// the buyer on a sale.
fn infer_counterparty(text: &str, direction: Option<Direction>) -> Option<String> {
    let re = match direction {
        Some(Direction::Sale) => buyer_re(),
        _ => seller_re(),
    };
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_end_matches([',', '.', ';']).to_string())
        .filter(|name| !name.is_empty())
}

/// Fallback: leading tokens of the file name up to an incoterm or year.
fn counterparty_from_file_name(file_name: &str) -> String {
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    let words: Vec<&str> = stem
        .split(['_', '-', ' '])
        .take_while(|token| {
            Incoterm::parse(token).is_none() && !token.chars().all(|c| c.is_ascii_digit())
        })
        .collect();
    if words.is_empty() {
        stem.to_string()
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_extract::FixedPdfExtractor;
    use quayside_protocol::sha256_hex;
    use quayside_scanner::protocol::ok_response;
    use quayside_scanner::{DiffEntry, DiffResult, FetchResult, ScanResult, TokenSource};
    use quayside_store::ReviewTransition;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    const KOCH_TEXT: &str = "\
AMMONIA PURCHASE CONTRACT

Seller: Koch Fertilizer, LLC
Buyer: Quayside Trading Co

3. Delivery Terms
FOB Donaldsonville per Incoterms 2020. Buyer shall nominate the vessel
at the load port within the agreed laycan.

5. Price
US$ 335/MT FOB Donaldsonville.

6. Payment
Net 30 days from bill of lading date.";

    /// Fake scanner subprocess speaking the real wire protocol over a
    /// duplex stream, serving a fixed file map.
    fn fake_scanner(files: HashMap<String, (String, Vec<u8>)>) -> ScannerClient {
        let (client_side, server_side) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let command: serde_json::Value = serde_json::from_str(&line).unwrap();
                let response = match command["cmd"].as_str().unwrap() {
                    "scan" => {
                        let items = files
                            .iter()
                            .map(|(item_id, (name, bytes))| quayside_scanner::RemoteItem {
                                item_id: item_id.clone(),
                                drive_id: "drive-1".to_string(),
                                name: name.clone(),
                                size: bytes.len() as u64,
                                modified_at: None,
                                sha256: Some(sha256_hex(bytes)),
                                quick_xor: None,
                                web_url: None,
                            })
                            .collect();
                        ok_response(&ScanResult { items })
                    }
                    "fetch" => {
                        let item_id = command["item_id"].as_str().unwrap();
                        match files.get(item_id) {
                            Some((_, bytes)) => ok_response(&FetchResult {
                                sha256: sha256_hex(bytes),
                                size: bytes.len() as u64,
                                content_base64: base64::engine::general_purpose::STANDARD
                                    .encode(bytes),
                            }),
                            None => serde_json::json!({
                                "status": "error",
                                "error": "remote_api_error",
                                "detail": "not found",
                                "http_status": 404,
                            }),
                        }
                    }
                    "diff_hashes" => {
                        let mut diff = DiffResult::default();
                        for known in command["known"].as_array().unwrap() {
                            let id = known["id"].as_str().unwrap().to_string();
                            let item_id = known["item_id"].as_str().unwrap().to_string();
                            let hash = known["hash"].as_str().unwrap();
                            match files.get(&item_id) {
                                None => diff.missing.push(DiffEntry {
                                    id,
                                    item_id,
                                    remote_hash: None,
                                }),
                                Some((_, bytes)) => {
                                    let remote_hash = sha256_hex(bytes);
                                    let entry = DiffEntry {
                                        id,
                                        item_id,
                                        remote_hash: Some(remote_hash.clone()),
                                    };
                                    if remote_hash == hash {
                                        diff.unchanged.push(entry);
                                    } else {
                                        diff.changed.push(entry);
                                    }
                                }
                            }
                        }
                        ok_response(&diff)
                    }
                    other => panic!("unexpected command {other}"),
                };
                let mut out = response.to_string();
                out.push('\n');
                if server_write.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        });
        ScannerClient::spawn_with_io(
            client_read,
            client_write,
            TokenSource::Static("test-token".to_string()),
            Duration::from_secs(5),
        )
    }

    fn ingestor_with(files: HashMap<String, (String, Vec<u8>)>) -> (Ingestor, ContractStore) {
        let store = ContractStore::spawn(None);
        let registry = Arc::new(TemplateRegistry::seeded());
        let extractor = DocumentExtractor::new(Arc::new(FixedPdfExtractor::new("")));
        let ingestor = Ingestor::new(
            store.clone(),
            registry,
            extractor,
            Some(fake_scanner(files)),
            None,
            IngestorConfig::new("drive-1", "Contracts", "ammonia"),
        );
        (ingestor, store)
    }

    #[tokio::test]
    async fn test_full_scan_ingests_new_contract() {
        let mut files = HashMap::new();
        files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        let (ingestor, store) = ingestor_with(files);

        let summary = ingestor.full_scan().await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.ingested_new.len(), 1);
        assert!(summary.errors.is_empty());

        let snap = store.snapshot();
        let held = snap.get(&summary.ingested_new[0]).unwrap();
        assert_eq!(held.counterparty, "Koch Fertilizer, LLC");
        assert_eq!(held.canonical_key().counterparty, "koch fertilizer");
        assert_eq!(held.product_group, "ammonia");
        assert_eq!(held.version, 1);
        assert_eq!(held.previous_hash, "");
        assert_eq!(held.file_hash, sha256_hex(KOCH_TEXT.as_bytes()));
        assert_eq!(held.incoterm, Some(Incoterm::Fob));
        assert_eq!(held.verification_status, VerificationStatus::Verified);
        let price = held.find_clause("PRICE").expect("price clause");
        assert_eq!(price.value, Some(335.0));
        assert_eq!(price.section_ref, "Section 5");
        assert_eq!(snap.list_by_product_group("ammonia").len(), 1);
    }

    #[tokio::test]
    async fn test_full_scan_rerun_is_noop() {
        let mut files = HashMap::new();
        files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        let (ingestor, store) = ingestor_with(files);
        ingestor.full_scan().await.unwrap();
        let second = ingestor.full_scan().await.unwrap();
        assert_eq!(second.ingested_new.len(), 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_delta_scan_all_unchanged() {
        let mut files = HashMap::new();
        files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        let (ingestor, store) = ingestor_with(files);
        let summary = ingestor.full_scan().await.unwrap();
        let id = summary.ingested_new[0].clone();

        let delta = ingestor.delta_scan().await.unwrap();
        assert_eq!(delta.unchanged, 1);
        assert!(delta.ingested_changed.is_empty());
        let snap = store.snapshot();
        let held = snap.get(&id).unwrap();
        assert_eq!(held.verification_status, VerificationStatus::Verified);
        assert!(held.last_verified_at.is_some());
        assert_eq!(snap.len(), 1, "no new versions on an unchanged delta scan");
    }

    #[tokio::test]
    async fn test_delta_scan_one_changed_chains_version() {
        let mut files = HashMap::new();
        files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        let (ingestor, store) = ingestor_with(files.clone());
        let summary = ingestor.full_scan().await.unwrap();
        let v1_id = summary.ingested_new[0].clone();
        let v1_hash = sha256_hex(KOCH_TEXT.as_bytes());

        // Approve v1 so it must survive until v2 is approved.
        store
            .transition_review(ReviewTransition {
                id: v1_id.clone(),
                to: ReviewStatus::PendingReview,
                reviewed_by: "trader-1".to_string(),
                notes: None,
            })
            .await
            .unwrap();
        store
            .transition_review(ReviewTransition {
                id: v1_id.clone(),
                to: ReviewStatus::Approved,
                reviewed_by: "legal-1".to_string(),
                notes: None,
            })
            .await
            .unwrap();

        // Remote file changes: price amended.
        let amended = KOCH_TEXT.replace("US$ 335/MT", "US$ 350/MT");
        let mut changed_files = files;
        changed_files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), amended.as_bytes().to_vec()),
        );
        let ingestor = Ingestor::new(
            ingestor.store.clone(),
            ingestor.registry.clone(),
            ingestor.extractor.clone(),
            Some(fake_scanner(changed_files)),
            None,
            ingestor.config.clone(),
        );

        let delta = ingestor.delta_scan().await.unwrap();
        assert_eq!(delta.ingested_changed.len(), 1);
        let v2_id = delta.ingested_changed[0].clone();

        let snap = store.snapshot();
        let v2 = snap.get(&v2_id).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.previous_hash, v1_hash);
        assert_eq!(v2.status, ReviewStatus::Draft);
        assert_eq!(v2.find_clause("PRICE").unwrap().value, Some(350.0));
        // v1 stays approved until v2 is approved.
        assert_eq!(snap.get(&v1_id).unwrap().status, ReviewStatus::Approved);
    }

    #[tokio::test]
    async fn test_delta_scan_missing_marks_file_not_found() {
        let mut files = HashMap::new();
        files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        let (ingestor, store) = ingestor_with(files);
        let summary = ingestor.full_scan().await.unwrap();
        let id = summary.ingested_new[0].clone();

        // Remote folder is now empty.
        let ingestor = Ingestor::new(
            ingestor.store.clone(),
            ingestor.registry.clone(),
            ingestor.extractor.clone(),
            Some(fake_scanner(HashMap::new())),
            None,
            ingestor.config.clone(),
        );
        let delta = ingestor.delta_scan().await.unwrap();
        assert_eq!(delta.missing, 1);
        let snap = store.snapshot();
        assert_eq!(
            snap.get(&id).unwrap().verification_status,
            VerificationStatus::FileNotFound
        );
        // The contract is kept; missing files never auto-invalidate.
        assert_eq!(snap.len(), 1);
    }

    #[tokio::test]
    async fn test_file_error_does_not_abort_batch() {
        // "item-bad" is listed by scan but fetch 404s.
        let mut files = HashMap::new();
        files.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        let (ingestor, store) = ingestor_with(files);
        // Inject a phantom listing by scanning against a scanner that lists
        // two items but can only fetch one.
        let mut listing = HashMap::new();
        listing.insert(
            "item-1".to_string(),
            ("Koch_FOB_2026.txt".to_string(), KOCH_TEXT.as_bytes().to_vec()),
        );
        listing.insert(
            "item-2".to_string(),
            ("Yara_CFR_2026.txt".to_string(), b"Sale contract CFR".to_vec()),
        );
        let scanner = {
            // Listing advertises both, but the fetch map drops item-2's
            // body, so its fetch hash-mismatches.
            let mut broken = listing.clone();
            broken.insert("item-2".to_string(), ("Yara_CFR_2026.txt".to_string(), Vec::new()));
            let (client_side, server_side) = tokio::io::duplex(256 * 1024);
            let (client_read, client_write) = tokio::io::split(client_side);
            let (server_read, mut server_write) = tokio::io::split(server_side);
            tokio::spawn(async move {
                let mut lines = BufReader::new(server_read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let command: serde_json::Value = serde_json::from_str(&line).unwrap();
                    let response = match command["cmd"].as_str().unwrap() {
                        "scan" => {
                            let items = listing
                                .iter()
                                .map(|(item_id, (name, bytes))| quayside_scanner::RemoteItem {
                                    item_id: item_id.clone(),
                                    drive_id: "drive-1".to_string(),
                                    name: name.clone(),
                                    size: bytes.len() as u64,
                                    modified_at: None,
                                    sha256: Some(sha256_hex(bytes)),
                                    quick_xor: None,
                                    web_url: None,
                                })
                                .collect();
                            ok_response(&ScanResult { items })
                        }
                        "fetch" => {
                            let item_id = command["item_id"].as_str().unwrap();
                            match item_id {
                                "item-2" => serde_json::json!({
                                    "status": "error",
                                    "error": "remote_api_error",
                                    "detail": "gone",
                                    "http_status": 410,
                                }),
                                _ => {
                                    let (_, bytes) = broken.get(item_id).unwrap();
                                    ok_response(&FetchResult {
                                        sha256: sha256_hex(bytes),
                                        size: bytes.len() as u64,
                                        content_base64: base64::engine::general_purpose::STANDARD
                                            .encode(bytes),
                                    })
                                }
                            }
                        }
                        other => panic!("unexpected command {other}"),
                    };
                    let mut out = response.to_string();
                    out.push('\n');
                    if server_write.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
            ScannerClient::spawn_with_io(
                client_read,
                client_write,
                TokenSource::Static("t".to_string()),
                Duration::from_secs(5),
            )
        };
        let ingestor = Ingestor::new(
            ingestor.store.clone(),
            ingestor.registry.clone(),
            ingestor.extractor.clone(),
            Some(scanner),
            None,
            ingestor.config.clone(),
        );

        let summary = ingestor.full_scan().await.unwrap();
        assert_eq!(summary.ingested_new.len(), 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].name, "Yara_CFR_2026.txt");
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_ingest_without_scanner() {
        let store = ContractStore::spawn(None);
        let registry = Arc::new(TemplateRegistry::seeded());
        let extractor = DocumentExtractor::new(Arc::new(FixedPdfExtractor::new("")));
        let ingestor = Ingestor::new(
            store.clone(),
            registry,
            extractor,
            None,
            None,
            IngestorConfig::new("drive-1", "Contracts", "ammonia"),
        );
        let outcome = ingestor
            .ingest_manual(ManualIngest {
                counterparty: "Trammo Inc.".to_string(),
                counterparty_type: CounterpartyType::Supplier,
                product_group: "ammonia".to_string(),
                source_file_bytes: KOCH_TEXT.as_bytes().to_vec(),
                source_file_name: "Trammo_Spot.txt".to_string(),
                contract_number: Some("QT-2026-019".to_string()),
                effective_date: None,
                expiry_date: NaiveDate::from_ymd_opt(2026, 12, 31),
                company: None,
            })
            .await
            .unwrap();
        assert!(outcome.created);
        let snap = store.snapshot();
        let held = snap.get(&outcome.id).unwrap();
        assert_eq!(held.counterparty, "Trammo Inc.");
        assert_eq!(held.contract_number.as_deref(), Some("QT-2026-019"));
        assert_eq!(held.verification_status, VerificationStatus::Unverified);

        // Scans require a scanner.
        assert!(matches!(
            ingestor.full_scan().await,
            Err(IngestError::ScannerUnavailable)
        ));
    }

    #[test]
    fn test_infer_counterparty_by_direction() {
        assert_eq!(
            infer_counterparty(KOCH_TEXT, Some(Direction::Purchase)).as_deref(),
            Some("Koch Fertilizer, LLC")
        );
        assert_eq!(
            infer_counterparty(KOCH_TEXT, Some(Direction::Sale)).as_deref(),
            Some("Quayside Trading Co")
        );
        assert_eq!(infer_counterparty("no parties here", None), None);
    }

    #[test]
    fn test_counterparty_from_file_name() {
        assert_eq!(counterparty_from_file_name("Koch_FOB_2026.docx"), "Koch");
        assert_eq!(
            counterparty_from_file_name("CF Industries DAP 2026.pdf"),
            "CF Industries"
        );
        assert_eq!(counterparty_from_file_name("2026.txt"), "2026");
    }
}

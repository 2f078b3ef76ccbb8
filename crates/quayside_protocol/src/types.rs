//! Contract, clause, and registry payload types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Canonical Ids (used across all crates)
// ============================================================================

/// Stable opaque contract identifier.
///
/// Assigned once at first ingest and carried by every later version of the
/// same logical agreement. Never derived from mutable contract fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContractId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty("contract id"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Identifier of one solve-pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty("run id"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

// ============================================================================
// Canonical Enums (use these everywhere)
// ============================================================================

/// Contract template archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Purchase,
    Sale,
    SpotPurchase,
    SpotSale,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Purchase => "purchase",
            TemplateType::Sale => "sale",
            TemplateType::SpotPurchase => "spot_purchase",
            TemplateType::SpotSale => "spot_sale",
        }
    }

    /// Buy/sell direction implied by the template.
    pub fn direction(&self) -> Direction {
        match self {
            TemplateType::Purchase | TemplateType::SpotPurchase => Direction::Purchase,
            TemplateType::Sale | TemplateType::SpotSale => Direction::Sale,
        }
    }
}

/// Trade direction relative to our book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Purchase,
    Sale,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Purchase => "purchase",
            Direction::Sale => "sale",
        }
    }
}

/// Incoterms 2020 rules recognised on the desk.
///
/// A contract with no discernible incoterm carries `None` at the contract
/// level rather than a sentinel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Incoterm {
    Fob,
    Cfr,
    Cif,
    Dap,
    Ddp,
    Fca,
    Exw,
    Cpt,
}

impl Incoterm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Incoterm::Fob => "FOB",
            Incoterm::Cfr => "CFR",
            Incoterm::Cif => "CIF",
            Incoterm::Dap => "DAP",
            Incoterm::Ddp => "DDP",
            Incoterm::Fca => "FCA",
            Incoterm::Exw => "EXW",
            Incoterm::Cpt => "CPT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FOB" => Some(Incoterm::Fob),
            "CFR" | "C&F" | "CNF" => Some(Incoterm::Cfr),
            "CIF" => Some(Incoterm::Cif),
            "DAP" => Some(Incoterm::Dap),
            "DDP" => Some(Incoterm::Ddp),
            "FCA" => Some(Incoterm::Fca),
            "EXW" => Some(Incoterm::Exw),
            "CPT" => Some(Incoterm::Cpt),
            _ => None,
        }
    }
}

/// Spot vs long-term book classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TermType {
    #[default]
    Spot,
    LongTerm,
}

impl TermType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermType::Spot => "spot",
            TermType::LongTerm => "long_term",
        }
    }
}

/// Which side of the book the counterparty sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyType {
    Supplier,
    Customer,
}

impl CounterpartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterpartyType::Supplier => "supplier",
            CounterpartyType::Customer => "customer",
        }
    }
}

/// Review state machine. Transitions are acyclic:
/// `draft -> pending_review -> {approved, rejected}`, `approved -> superseded`.
/// `rejected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Superseded,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Draft => "draft",
            ReviewStatus::PendingReview => "pending_review",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Superseded => "superseded",
        }
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(&self, next: ReviewStatus) -> bool {
        matches!(
            (self, next),
            (ReviewStatus::Draft, ReviewStatus::PendingReview)
                | (ReviewStatus::PendingReview, ReviewStatus::Approved)
                | (ReviewStatus::PendingReview, ReviewStatus::Rejected)
                | (ReviewStatus::Approved, ReviewStatus::Superseded)
        )
    }
}

/// Outcome of the most recent remote-drive verification of a contract's
/// source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verified,
    Stale,
    FileNotFound,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Stale => "stale",
            VerificationStatus::FileNotFound => "file_not_found",
        }
    }
}

/// Parser confidence in an extracted clause.
///
/// Ordering is `Low < Medium < High` so dedup can keep the best candidate
/// with `max_by_key`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Comparison operator of a bound-shaped clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundOperator {
    /// `>=` — floor
    Gte,
    /// `<=` — ceiling
    Lte,
    /// `=` — pin
    Eq,
    /// closed interval `[value, value_upper]`
    Between,
}

impl BoundOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundOperator::Gte => ">=",
            BoundOperator::Lte => "<=",
            BoundOperator::Eq => "=",
            BoundOperator::Between => "between",
        }
    }
}

/// Accounting period a clause value applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Spot,
    Monthly,
    Quarterly,
    Annual,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Spot => "spot",
            Period::Monthly => "monthly",
            Period::Quarterly => "quarterly",
            Period::Annual => "annual",
        }
    }
}

/// Penalty categories the solver objective consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyType {
    VolumeShortfall,
    LateDelivery,
    Demurrage,
}

impl PenaltyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PenaltyType::VolumeShortfall => "volume_shortfall",
            PenaltyType::LateDelivery => "late_delivery",
            PenaltyType::Demurrage => "demurrage",
        }
    }
}

/// Source document container format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Docx,
    Docm,
    Txt,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Docx => "docx",
            SourceFormat::Docm => "docm",
            SourceFormat::Txt => "txt",
        }
    }

    /// Case-insensitive extension dispatch; `None` for unrecognised names.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "docx" => Some(SourceFormat::Docx),
            "docm" => Some(SourceFormat::Docm),
            "txt" => Some(SourceFormat::Txt),
            _ => None,
        }
    }
}

/// Transport mode of a contract family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Vessel,
    Domestic,
    Multimodal,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Vessel => "vessel",
            Transport::Domestic => "domestic",
            Transport::Multimodal => "multimodal",
        }
    }
}

// ============================================================================
// Canonical key
// ============================================================================

/// Identity under which contract versions chain: at most one `approved`
/// contract may exist per key at any moment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct CanonicalKey {
    /// Normalised counterparty name (see [`normalise_counterparty`]).
    pub counterparty: String,
    /// Product group, e.g. `ammonia`.
    pub product_group: String,
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.counterparty, self.product_group)
    }
}

/// Corporate suffixes stripped during counterparty normalisation.
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "llc", "ltd", "gmbh", "sa", "co", "corp", "company", "plc", "bv",
];

/// Lowercase, strip punctuation, collapse whitespace, drop trailing
/// corporate suffixes. `"Koch Fertilizer, LLC"` -> `"koch fertilizer"`.
pub fn normalise_counterparty(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = words.last() {
        if words.len() > 1 && CORPORATE_SUFFIXES.contains(last) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

// ============================================================================
// Clause
// ============================================================================

/// A typed value extracted from legal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Num(f64),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            FieldValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One recognised contractual provision.
///
/// `extracted_fields` are immutable once the containing contract version is
/// persisted; changing them requires ingesting a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    /// Canonical short code from the registry (e.g. `PRICE`, `DEMURRAGE`).
    pub clause_id: String,
    /// Registry category (e.g. `commercial`, `shipping`, `legal`).
    pub category: String,
    /// Field name -> typed value. Ordered map so serialisation is stable.
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, FieldValue>,
    /// Verbatim paragraph the clause was lifted from.
    pub source_text: String,
    /// Heading-derived reference, e.g. `Section 5`.
    pub section_ref: String,
    /// Anchor phrases that fired during matching.
    #[serde(default)]
    pub anchors_matched: Vec<String>,
    pub confidence: Confidence,

    // Bound-shaped fields (all optional; present only on solver-relevant
    // clauses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<BoundOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
}

impl Clause {
    /// Minimal clause with the mandatory fields; bound fields default off.
    pub fn new(
        clause_id: impl Into<String>,
        category: impl Into<String>,
        source_text: impl Into<String>,
        section_ref: impl Into<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            clause_id: clause_id.into(),
            category: category.into(),
            extracted_fields: BTreeMap::new(),
            source_text: source_text.into(),
            section_ref: section_ref.into(),
            anchors_matched: Vec::new(),
            confidence,
            parameter: None,
            operator: None,
            value: None,
            value_upper: None,
            unit: None,
            penalty_per_unit: None,
            penalty_cap: None,
            period: None,
        }
    }

    /// True when the clause carries a complete bound tuple the constraint
    /// bridge can project.
    pub fn is_bound_shaped(&self) -> bool {
        self.parameter.is_some() && self.operator.is_some() && self.value.is_some()
    }
}

// ============================================================================
// Contract
// ============================================================================

/// Cross-check summary between the deterministic parse and the LLM second
/// pass. The deterministic parse stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LlmAgreement {
    /// Clause ids both passes produced.
    pub matched: Vec<String>,
    /// Clause ids only the deterministic parser produced.
    pub deterministic_only: Vec<String>,
    /// Clause ids only the LLM produced (surfaced for operator review).
    pub llm_only: Vec<String>,
}

/// One version of one logical agreement with a counterparty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    // Identity
    pub id: ContractId,
    /// Monotonic per canonical key; starts at 1.
    pub version: u32,

    // Classification
    pub template_type: TemplateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoterm: Option<Incoterm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    pub term_type: TermType,
    /// Contracting entity on our side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    // Commercial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    pub counterparty: String,
    pub counterparty_type: CounterpartyType,
    pub product_group: String,
    /// Metric tons remaining on the book; required for the active set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_position: Option<f64>,

    // Provenance
    pub source_file_name: String,
    pub source_format: SourceFormat,
    pub file_size_bytes: u64,
    /// SHA-256 of the raw source bytes, hex-lowercase.
    pub file_hash: String,
    /// `file_hash` of the immediately prior version for the same canonical
    /// key; empty for version 1.
    #[serde(default)]
    pub previous_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_drive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
    pub verification_status: VerificationStatus,

    // Review
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(default)]
    pub sap_validated: bool,
    #[serde(default)]
    pub sap_discrepancies: Vec<String>,

    // Content
    pub clauses: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_agreement: Option<LlmAgreement>,

    pub ingested_at: DateTime<Utc>,
}

impl Contract {
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey {
            counterparty: normalise_counterparty(&self.counterparty),
            product_group: self.product_group.clone(),
        }
    }

    /// Active-set membership: approved, unexpired, SAP-validated, with an
    /// open position on the book.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.status == ReviewStatus::Approved
            && self.sap_validated
            && self.open_position.is_some()
            && self.expiry_date.map_or(false, |d| d > today)
    }

    pub fn find_clause(&self, clause_id: &str) -> Option<&Clause> {
        self.clauses.iter().find(|c| c.clause_id == clause_id)
    }
}

// ============================================================================
// Templates & families
// ============================================================================

/// How strongly a template insists on a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementLevel {
    Required,
    Expected,
    Optional,
}

impl RequirementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementLevel::Required => "required",
            RequirementLevel::Expected => "expected",
            RequirementLevel::Optional => "optional",
        }
    }
}

/// One entry in a template's clause inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseRequirement {
    /// Canonical clause id the requirement is satisfied by.
    pub clause_type: String,
    /// Requirement class whose member parameters satisfy this entry;
    /// `None` means any parameter (or none) is acceptable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_class: Option<String>,
    pub level: RequirementLevel,
    pub description: String,
}

/// Clause inventory for a `(contract_type, incoterm)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub contract_type: TemplateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoterm: Option<Incoterm>,
    pub requirements: Vec<ClauseRequirement>,
}

/// Coarse contract archetype with its detection anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySignature {
    pub family_id: String,
    pub direction: Direction,
    pub term_type: TermType,
    pub transport: Transport,
    pub default_incoterms: Vec<Incoterm>,
    /// Phrases whose occurrence count scores the family during detection.
    pub detect_anchors: Vec<String>,
    pub expected_clause_ids: Vec<String>,
}

// ============================================================================
// Penalty schedule
// ============================================================================

/// One row of the penalty schedule the solver objective consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyScheduleEntry {
    pub counterparty: String,
    pub penalty_type: PenaltyType,
    /// USD per metric ton.
    pub rate_per_ton: f64,
    /// Open quantity the rate applies to (MT).
    pub open_qty: f64,
    /// `rate_per_ton * open_qty`, capped by the clause's penalty cap when
    /// one was extracted.
    pub max_exposure: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoterm: Option<Incoterm>,
    pub direction: Direction,
}

//! Copy-on-write registry behind an atomic snapshot swap.

use crate::seed;
use quayside_protocol::{
    FamilySignature, Incoterm, Template, TemplateType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// One entry of the canonical clause inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalClause {
    /// Short code, e.g. `PRICE`, `DEMURRAGE`.
    pub clause_id: String,
    /// Coarse grouping: `commercial`, `shipping`, `legal`, `penalty`, ...
    pub category: String,
    pub description: String,
}

/// Per-parameter plausibility range used by the template validator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SanityRange {
    pub min: f64,
    pub max: f64,
}

/// Immutable view of the registry. Cheap to clone via `Arc`; a parser batch
/// captures one snapshot and never sees registrations land mid-batch.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    clauses: BTreeMap<String, CanonicalClause>,
    families: BTreeMap<String, FamilySignature>,
    /// Keyed by `(contract_type, incoterm)`.
    templates: BTreeMap<(TemplateType, Option<Incoterm>), Template>,
    /// Requirement class -> concrete parameter keys the parser may emit.
    parameter_classes: BTreeMap<String, Vec<String>>,
    sanity_ranges: BTreeMap<String, SanityRange>,
}

impl RegistrySnapshot {
    pub fn canonical_clauses(&self) -> impl Iterator<Item = &CanonicalClause> {
        self.clauses.values()
    }

    pub fn clause(&self, clause_id: &str) -> Option<&CanonicalClause> {
        self.clauses.get(clause_id)
    }

    pub fn family_signatures(&self) -> impl Iterator<Item = &FamilySignature> {
        self.families.values()
    }

    pub fn family(&self, family_id: &str) -> Option<&FamilySignature> {
        self.families.get(family_id)
    }

    pub fn get_template(
        &self,
        contract_type: TemplateType,
        incoterm: Option<Incoterm>,
    ) -> Option<&Template> {
        self.templates
            .get(&(contract_type, incoterm))
            // Incoterm-less lookup falls back to the generic template for
            // the contract type when no exact pairing is registered.
            .or_else(|| self.templates.get(&(contract_type, None)))
    }

    /// Clause ids a template marks `required`.
    pub fn required_clauses(
        &self,
        contract_type: TemplateType,
        incoterm: Option<Incoterm>,
    ) -> Vec<&str> {
        self.get_template(contract_type, incoterm)
            .map(|t| {
                t.requirements
                    .iter()
                    .filter(|r| r.level == quayside_protocol::RequirementLevel::Required)
                    .map(|r| r.clause_type.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Concrete parameter keys belonging to a requirement class.
    pub fn parameter_class_members(&self, parameter_class: &str) -> &[String] {
        self.parameter_classes
            .get(parameter_class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn sanity_range(&self, parameter: &str) -> Option<SanityRange> {
        self.sanity_ranges.get(parameter).copied()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("clause id cannot be empty")]
    EmptyClauseId,
    #[error("family id cannot be empty")]
    EmptyFamilyId,
    #[error("family {0} references unknown clause {1}")]
    UnknownExpectedClause(String, String),
}

/// Process-wide registry. Construction seeds the canonical inventory;
/// registration is last-write-wins and idempotent for identical payloads.
pub struct TemplateRegistry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl TemplateRegistry {
    /// Registry seeded with the canonical clauses, the seven family
    /// signatures, the standard templates, and the parameter tables.
    pub fn seeded() -> Self {
        let snapshot = RegistrySnapshot {
            clauses: seed::canonical_clauses()
                .into_iter()
                .map(|c| (c.clause_id.clone(), c))
                .collect(),
            families: seed::family_signatures()
                .into_iter()
                .map(|f| (f.family_id.clone(), f))
                .collect(),
            templates: seed::templates()
                .into_iter()
                .map(|t| ((t.contract_type, t.incoterm), t))
                .collect(),
            parameter_classes: seed::parameter_classes(),
            sanity_ranges: seed::sanity_ranges(),
        };
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Current immutable snapshot. Never blocks writers for longer than the
    /// `Arc` clone.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Register (or replace) a canonical clause. Visible to readers at
    /// their next `snapshot()` call.
    pub fn register_clause(&self, clause: CanonicalClause) -> Result<(), RegisterError> {
        if clause.clause_id.trim().is_empty() {
            return Err(RegisterError::EmptyClauseId);
        }
        self.mutate(|next| {
            tracing::info!(clause_id = %clause.clause_id, "registering clause");
            next.clauses.insert(clause.clause_id.clone(), clause);
        });
        Ok(())
    }

    /// Register (or replace) a family signature. Every expected clause id
    /// must already be registered.
    pub fn register_family(&self, family: FamilySignature) -> Result<(), RegisterError> {
        if family.family_id.trim().is_empty() {
            return Err(RegisterError::EmptyFamilyId);
        }
        let current = self.snapshot();
        for clause_id in &family.expected_clause_ids {
            if current.clause(clause_id).is_none() {
                return Err(RegisterError::UnknownExpectedClause(
                    family.family_id.clone(),
                    clause_id.clone(),
                ));
            }
        }
        self.mutate(|next| {
            tracing::info!(family_id = %family.family_id, "registering family");
            next.families.insert(family.family_id.clone(), family);
        });
        Ok(())
    }

    /// Register (or replace) a template for its `(contract_type, incoterm)`
    /// key.
    pub fn register_template(&self, template: Template) -> Result<(), RegisterError> {
        self.mutate(|next| {
            next.templates
                .insert((template.contract_type, template.incoterm), template);
        });
        Ok(())
    }

    /// Register (or replace) a parameter class membership list.
    pub fn register_parameter_class(&self, class: impl Into<String>, members: Vec<String>) {
        let class = class.into();
        self.mutate(|next| {
            next.parameter_classes.insert(class.clone(), members);
        });
    }

    /// Rebuild-and-swap under the write lock. Readers holding the previous
    /// `Arc` keep a consistent view; new readers observe the whole write.
    fn mutate(&self, f: impl FnOnce(&mut RegistrySnapshot)) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::seeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_protocol::{Direction, RequirementLevel, TermType, Transport};

    #[test]
    fn test_seeded_inventory_is_complete() {
        let registry = TemplateRegistry::seeded();
        let snap = registry.snapshot();
        assert!(
            snap.canonical_clauses().count() >= 30,
            "canonical inventory must hold at least 30 clauses"
        );
        assert_eq!(snap.family_signatures().count(), 7);
        for id in [
            "INCOTERMS",
            "PRICE",
            "DEMURRAGE",
            "PENALTY_VOLUME_SHORTFALL",
            "PENALTY_LATE_DELIVERY",
            "DEFAULT_AND_REMEDIES",
        ] {
            assert!(snap.clause(id).is_some(), "missing canonical clause {id}");
        }
        for family in [
            "vessel_purchase_fob",
            "vessel_sale_cfr",
            "vessel_dap",
            "domestic_cpt",
            "domestic_multimodal",
            "lt_sale_cfr",
            "lt_purchase_fob",
        ] {
            assert!(snap.family(family).is_some(), "missing family {family}");
        }
    }

    #[test]
    fn test_get_template_falls_back_to_generic() {
        let registry = TemplateRegistry::seeded();
        let snap = registry.snapshot();
        let exact = snap.get_template(TemplateType::Purchase, Some(Incoterm::Fob));
        assert!(exact.is_some());
        // EXW has no dedicated purchase template; generic purchase applies.
        let fallback = snap.get_template(TemplateType::Purchase, Some(Incoterm::Exw));
        assert!(fallback.is_some());
        assert_eq!(fallback.map(|t| t.incoterm), Some(None));
    }

    #[test]
    fn test_required_clauses_for_purchase_fob() {
        let registry = TemplateRegistry::seeded();
        let snap = registry.snapshot();
        let required = snap.required_clauses(TemplateType::Purchase, Some(Incoterm::Fob));
        assert!(required.contains(&"PRICE"));
        assert!(required.contains(&"QUANTITY_TOLERANCE"));
        assert!(required.contains(&"DELIVERY_PERIOD"));
        assert_eq!(required.len(), 6);
    }

    #[test]
    fn test_parameter_class_members() {
        let registry = TemplateRegistry::seeded();
        let snap = registry.snapshot();
        let members = snap.parameter_class_members("price");
        assert!(members.contains(&"buy_price_usd_ton".to_string()));
        assert!(members.contains(&"sell_price_usd_ton".to_string()));
        assert!(snap.parameter_class_members("no_such_class").is_empty());
    }

    #[test]
    fn test_registration_is_atomic_to_snapshots() {
        let registry = TemplateRegistry::seeded();
        let before = registry.snapshot();
        registry
            .register_clause(CanonicalClause {
                clause_id: "CARBON_INTENSITY".to_string(),
                category: "environmental".to_string(),
                description: "Carbon intensity certification".to_string(),
            })
            .unwrap();
        // The pre-registration snapshot is unchanged; a fresh one sees it.
        assert!(before.clause("CARBON_INTENSITY").is_none());
        assert!(registry.snapshot().clause("CARBON_INTENSITY").is_some());
    }

    #[test]
    fn test_register_family_rejects_unknown_clause() {
        let registry = TemplateRegistry::seeded();
        let err = registry
            .register_family(FamilySignature {
                family_id: "rail_purchase".to_string(),
                direction: Direction::Purchase,
                term_type: TermType::Spot,
                transport: Transport::Domestic,
                default_incoterms: vec![Incoterm::Fca],
                detect_anchors: vec!["railcar".to_string()],
                expected_clause_ids: vec!["NOT_A_CLAUSE".to_string()],
            })
            .unwrap_err();
        assert!(matches!(err, RegisterError::UnknownExpectedClause(_, _)));
    }

    #[test]
    fn test_register_template_replaces_existing() {
        let registry = TemplateRegistry::seeded();
        let mut template = registry
            .snapshot()
            .get_template(TemplateType::Sale, Some(Incoterm::Cfr))
            .cloned()
            .unwrap();
        template.requirements.push(quayside_protocol::ClauseRequirement {
            clause_type: "ENVIRONMENTAL".to_string(),
            parameter_class: None,
            level: RequirementLevel::Expected,
            description: "Emissions reporting".to_string(),
        });
        registry.register_template(template.clone()).unwrap();
        let reread = registry
            .snapshot()
            .get_template(TemplateType::Sale, Some(Incoterm::Cfr))
            .cloned()
            .unwrap();
        assert_eq!(reread, template);
    }

    #[test]
    fn test_sanity_ranges_present_for_prices() {
        let snap = TemplateRegistry::seeded().snapshot();
        let range = snap.sanity_range("buy_price_usd_ton").unwrap();
        assert_eq!(range.min, 100.0);
        assert_eq!(range.max, 1200.0);
        assert!(snap.sanity_range("unknown_param").is_none());
    }
}

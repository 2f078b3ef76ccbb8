//! Role-gated review workflow over the contract store.
//!
//! Traders submit drafts, legal reviewers approve or reject, operations
//! revalidate SAP data. The store writer enforces the state machine and the
//! single-active invariant; this layer enforces who may ask for what, and
//! blocks submission while required clauses are missing.

use crate::store::{ContractStore, ReviewTransition, StoreError};
use quayside_parser::validate::{validate, ValidateOptions};
use quayside_protocol::{ContractId, ReviewStatus};
use quayside_registry::TemplateRegistry;
use std::sync::Arc;
use thiserror::Error;

/// Desk roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Trader,
    Legal,
    Operations,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Trader => "trader",
            Role::Legal => "legal",
            Role::Operations => "operations",
        }
    }
}

/// Identity performing a review action.
#[derive(Debug, Clone)]
pub struct Reviewer {
    pub name: String,
    pub role: Role,
}

impl Reviewer {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("role {role} may not {action}")]
    RoleForbidden { role: &'static str, action: &'static str },
    /// Submission blocked until every listed required clause is resolved.
    #[error("submission blocked: {0:?}")]
    BlocksSubmission(Vec<String>),
    #[error("validation failed: {0}")]
    Validation(#[from] quayside_parser::ValidateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Workflow facade handed to the CLI and the pipeline.
#[derive(Clone)]
pub struct ReviewWorkflow {
    store: ContractStore,
    registry: Arc<TemplateRegistry>,
}

impl ReviewWorkflow {
    pub fn new(store: ContractStore, registry: Arc<TemplateRegistry>) -> Self {
        Self { store, registry }
    }

    /// `draft -> pending_review`. Trader-only; blocked while required
    /// clauses are missing.
    pub async fn submit(&self, id: &ContractId, reviewer: &Reviewer) -> Result<(), ReviewError> {
        require_role(reviewer, Role::Trader, "submit for review")?;
        let snapshot = self.store.snapshot();
        let contract = snapshot
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let report = validate(
            &self.registry.snapshot(),
            contract,
            ValidateOptions::default(),
        )?;
        if report.blocks_submission {
            return Err(ReviewError::BlocksSubmission(
                report
                    .missing_required()
                    .iter()
                    .map(|f| f.subject.clone())
                    .collect(),
            ));
        }
        self.store
            .transition_review(ReviewTransition {
                id: id.clone(),
                to: ReviewStatus::PendingReview,
                reviewed_by: reviewer.name.clone(),
                notes: None,
            })
            .await?;
        Ok(())
    }

    /// `pending_review -> approved`. Legal-only; the store supersedes any
    /// previously-approved version atomically.
    pub async fn approve(
        &self,
        id: &ContractId,
        reviewer: &Reviewer,
        notes: Option<String>,
    ) -> Result<(), ReviewError> {
        require_role(reviewer, Role::Legal, "approve")?;
        self.store
            .transition_review(ReviewTransition {
                id: id.clone(),
                to: ReviewStatus::Approved,
                reviewed_by: reviewer.name.clone(),
                notes,
            })
            .await?;
        Ok(())
    }

    /// `pending_review -> rejected`. Legal-only; terminal.
    pub async fn reject(
        &self,
        id: &ContractId,
        reviewer: &Reviewer,
        notes: Option<String>,
    ) -> Result<(), ReviewError> {
        require_role(reviewer, Role::Legal, "reject")?;
        self.store
            .transition_review(ReviewTransition {
                id: id.clone(),
                to: ReviewStatus::Rejected,
                reviewed_by: reviewer.name.clone(),
                notes,
            })
            .await?;
        Ok(())
    }

    /// SAP revalidation, allowed at any review state. Operations-only.
    pub async fn sap_revalidate(
        &self,
        id: &ContractId,
        reviewer: &Reviewer,
        validated: bool,
        discrepancies: Vec<String>,
        open_position: Option<f64>,
    ) -> Result<(), ReviewError> {
        require_role(reviewer, Role::Operations, "revalidate SAP data")?;
        self.store
            .update_activation(id.clone(), validated, discrepancies, open_position)
            .await?;
        Ok(())
    }
}

fn require_role(reviewer: &Reviewer, needed: Role, action: &'static str) -> Result<(), ReviewError> {
    if reviewer.role != needed {
        return Err(ReviewError::RoleForbidden {
            role: reviewer.role.as_str(),
            action,
        });
    }
    Ok(())
}

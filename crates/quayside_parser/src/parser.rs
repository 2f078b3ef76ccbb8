//! The clause parser: fixed ordered pipeline over segmented paragraphs.

use crate::matchers::{
    self, MatchOutcome, MatcherCtx,
};
use crate::normalise::{normalise, segment, Paragraph};
use quayside_protocol::{Clause, Direction};
use quayside_registry::RegistrySnapshot;
use std::collections::HashMap;
use std::sync::Arc;

/// Paragraph that looked like a clause but could not be used; surfaced for
/// human review, never a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub section_ref: String,
    pub message: String,
}

/// Result of one parse. Clauses and warnings are ordered by section.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutput {
    pub clauses: Vec<Clause>,
    pub warnings: Vec<ParseWarning>,
    /// Highest-scoring family above the detection threshold, if any.
    pub family_id: Option<String>,
    /// Trade direction implied by the detected family.
    pub direction: Option<Direction>,
}

/// Minimum summed anchor occurrences for a family to win detection.
const FAMILY_SCORE_THRESHOLD: usize = 2;

/// Deterministic parser over one registry snapshot.
///
/// A parser instance pins the snapshot it was built with, so registrations
/// landing mid-batch become visible only to the next parser, never between
/// two paragraphs of the same document.
pub struct ClauseParser {
    snapshot: Arc<RegistrySnapshot>,
}

impl ClauseParser {
    pub fn new(snapshot: Arc<RegistrySnapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    /// Parse normalised document text into clauses and warnings.
    pub fn parse(&self, text: &str) -> ParseOutput {
        let normalised = normalise(text);
        let full_lower = normalised.to_lowercase();
        let paragraphs = segment(&normalised);

        let family_id = self.detect_family(&full_lower);
        let direction = family_id
            .as_deref()
            .and_then(|id| self.snapshot.family(id))
            .map(|f| f.direction);
        let ctx = MatcherCtx { direction };

        // Ordered pipeline: first matcher to claim a paragraph wins, so a
        // paragraph matching two clause types yields only the more
        // specific one.
        let mut found: Vec<(usize, Clause)> = Vec::new();
        let mut warnings: Vec<(usize, ParseWarning)> = Vec::new();
        for para in &paragraphs {
            let lower = para.text.to_lowercase();
            for matcher in matchers::pipeline() {
                match (matcher.run)(para, &lower, &ctx) {
                    MatchOutcome::Skip => continue,
                    MatchOutcome::Match(clause) => {
                        found.push((para.order, clause));
                        break;
                    }
                    MatchOutcome::Warn(message) => {
                        warnings.push((
                            para.order,
                            ParseWarning {
                                section_ref: para.section_ref.clone(),
                                message,
                            },
                        ));
                        break;
                    }
                }
            }
        }

        // Second pass: penalty sub-clauses embedded in remedies text come
        // out as clauses of their own.
        let mut embedded: Vec<(usize, Clause)> = Vec::new();
        for (order, clause) in &found {
            if clause.clause_id != "DEFAULT_AND_REMEDIES" {
                continue;
            }
            for sub in extract_embedded_penalties(clause, *order) {
                embedded.push((*order, sub));
            }
        }
        found.extend(embedded);

        let clauses = dedup_clauses(found);
        warnings.sort_by_key(|(order, _)| *order);

        ParseOutput {
            clauses,
            warnings: warnings.into_iter().map(|(_, w)| w).collect(),
            family_id,
            direction,
        }
    }

    /// Score each family by counting anchor occurrences in the full text;
    /// highest above the threshold wins, ties broken by family id so the
    /// result is stable.
    fn detect_family(&self, full_lower: &str) -> Option<String> {
        let mut best: Option<(usize, String)> = None;
        for family in self.snapshot.family_signatures() {
            let score: usize = family
                .detect_anchors
                .iter()
                .map(|anchor| full_lower.matches(anchor.as_str()).count())
                .sum();
            if score < FAMILY_SCORE_THRESHOLD {
                continue;
            }
            let candidate = (score, family.family_id.clone());
            best = match best.take() {
                None => Some(candidate),
                Some(current) => {
                    if candidate.0 > current.0
                        || (candidate.0 == current.0 && candidate.1 < current.1)
                    {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.map(|(_, id)| id)
    }
}

/// Run the penalty matchers over sentence-sized slices of a remedies
/// clause.
fn extract_embedded_penalties(clause: &Clause, order: usize) -> Vec<Clause> {
    let mut out = Vec::new();
    for sentence in clause
        .source_text
        .split(['.', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let para = Paragraph {
            section_ref: clause.section_ref.clone(),
            text: sentence.to_string(),
            order,
        };
        let lower = sentence.to_lowercase();
        if let MatchOutcome::Match(sub) = matchers::match_shortfall_penalty_inner(&para, &lower) {
            out.push(sub);
        }
        if let MatchOutcome::Match(sub) =
            matchers::match_late_delivery_penalty_inner(&para, &lower)
        {
            out.push(sub);
        }
    }
    out
}

/// Group by `(parameter, operator, value, clause type)`; keep the highest
/// confidence, ties broken by lowest section order. Output keeps document
/// order.
fn dedup_clauses(found: Vec<(usize, Clause)>) -> Vec<Clause> {
    type Key = (Option<String>, Option<String>, Option<u64>, String);
    let mut winners: HashMap<Key, (usize, Clause)> = HashMap::new();
    let mut key_order: Vec<Key> = Vec::new();

    for (order, clause) in found {
        let key: Key = (
            clause.parameter.clone(),
            clause.operator.map(|op| op.as_str().to_string()),
            clause.value.map(f64::to_bits),
            clause.clause_id.clone(),
        );
        match winners.get_mut(&key) {
            None => {
                key_order.push(key.clone());
                winners.insert(key, (order, clause));
            }
            Some((held_order, held)) => {
                let replace = clause.confidence > held.confidence
                    || (clause.confidence == held.confidence && order < *held_order);
                if replace {
                    *held_order = order;
                    *held = clause;
                }
            }
        }
    }

    let mut out: Vec<(usize, Clause)> = key_order
        .into_iter()
        .filter_map(|key| winners.remove(&key))
        .collect();
    out.sort_by_key(|(order, _)| *order);
    out.into_iter().map(|(_, clause)| clause).collect()
}

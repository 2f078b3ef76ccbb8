//! Anchor-based clause matchers.
//!
//! Each matcher is a pure function of the paragraph and the matcher
//! context. The pipeline in `parser.rs` runs them in specificity order:
//! demurrage before generic penalty wording, shortfall penalty before the
//! generic remedies clause, laytime before loading rate. The first matcher
//! that claims a paragraph wins, so a paragraph never yields two clauses.

use crate::normalise::Paragraph;
use quayside_protocol::{BoundOperator, Clause, Confidence, Direction, FieldValue, Incoterm, Period};
use regex::Regex;
use std::sync::OnceLock;

/// Outcome of one matcher against one paragraph.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Match(Clause),
    Skip,
    /// Looked like this clause but was unusable; surfaced for human review.
    Warn(String),
}

/// Shared context for a parser batch.
pub struct MatcherCtx {
    /// Trade direction from family detection; pricing parameters default to
    /// the purchase book when no family was detected.
    pub direction: Option<Direction>,
}

impl MatcherCtx {
    fn price_parameter(&self) -> (&'static str, bool) {
        match self.direction {
            Some(Direction::Sale) => ("sell_price_usd_ton", false),
            Some(Direction::Purchase) => ("buy_price_usd_ton", false),
            None => ("buy_price_usd_ton", true),
        }
    }
}

// ============================================================================
// Numeric / unit / operator extraction
// ============================================================================

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Thousand separators and decimals; optionally currency-prefixed.
    RE.get_or_init(|| {
        Regex::new(r"(?i)(US\$|USD|\$)?\s*([0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]+)?|[0-9]+(?:\.[0-9]+)?)")
            .unwrap()
    })
}

fn heading_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+)*[.)]?\s+").unwrap())
}

/// Paragraph text with any merged heading number stripped, so `8. Laytime`
/// never contributes an `8` to numeric extraction.
pub fn clause_body(text: &str) -> &str {
    match heading_prefix_re().find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// One numeric token with its currency flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberToken {
    pub value: f64,
    pub has_currency: bool,
}

/// All numeric tokens in order of appearance, heading numbers excluded.
pub fn extract_numbers(text: &str) -> Vec<NumberToken> {
    number_re()
        .captures_iter(clause_body(text))
        .filter_map(|caps| {
            let raw = caps.get(2)?.as_str().replace(',', "");
            let value = raw.parse::<f64>().ok()?;
            Some(NumberToken {
                value,
                has_currency: caps.get(1).is_some(),
            })
        })
        .collect()
}

/// First currency-prefixed amount, else the first number at all.
pub fn first_money(text: &str) -> Option<NumberToken> {
    let numbers = extract_numbers(text);
    numbers
        .iter()
        .copied()
        .find(|n| n.has_currency)
        .or_else(|| numbers.first().copied())
}

/// Fixed unit table, most specific first.
const UNIT_TABLE: &[(&str, &str)] = &[
    ("per metric ton per day", "mt/day"),
    ("mt per day", "mt/day"),
    ("mt/day", "mt/day"),
    ("metric tons per day", "mt/day"),
    ("per metric ton", "$/ton"),
    ("per mt", "$/ton"),
    ("/mt", "$/ton"),
    ("/ton", "$/ton"),
    ("per ton", "$/ton"),
    ("per day pro rata", "$/day"),
    ("per day", "$/day"),
    ("/day", "$/day"),
    ("metric tons", "mt"),
    ("metric tonnes", "mt"),
    (" mt ", "mt"),
    ("percent", "%"),
    ("%", "%"),
    ("running hours", "hours"),
    ("hours", "hours"),
    ("days", "days"),
];

pub fn detect_unit(lower: &str) -> Option<&'static str> {
    let padded = format!(" {lower} ");
    UNIT_TABLE
        .iter()
        .find(|(pat, _)| padded.contains(pat))
        .map(|(_, unit)| *unit)
}

/// Operator wording. `between`/`from..to` outranks the one-sided words.
pub fn detect_operator(lower: &str) -> Option<BoundOperator> {
    if lower.contains("between") || between_re().is_match(lower) {
        return Some(BoundOperator::Between);
    }
    const GTE: &[&str] = &["minimum", "at least", "not less than", "no less than"];
    const LTE: &[&str] = &[
        "maximum",
        "not to exceed",
        "no more than",
        "not more than",
        "up to",
        "shall not exceed",
    ];
    if GTE.iter().any(|w| lower.contains(w)) {
        return Some(BoundOperator::Gte);
    }
    if LTE.iter().any(|w| lower.contains(w)) {
        return Some(BoundOperator::Lte);
    }
    const EQ: &[&str] = &["shall be", "fixed at", "agreed at", "equal to"];
    if EQ.iter().any(|w| lower.contains(w)) {
        return Some(BoundOperator::Eq);
    }
    None
}

fn between_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)from\s+[0-9][0-9,.]*\s+to\s+[0-9]").unwrap())
}

pub fn detect_period(lower: &str) -> Option<Period> {
    const MONTHLY: &[&str] = &["per month", "monthly", "per calendar month", "each month"];
    const QUARTERLY: &[&str] = &["per quarter", "quarterly", "each quarter"];
    const ANNUAL: &[&str] = &["per annum", "annual", "yearly", "contract year", "per year"];
    if MONTHLY.iter().any(|w| lower.contains(w)) {
        return Some(Period::Monthly);
    }
    if QUARTERLY.iter().any(|w| lower.contains(w)) {
        return Some(Period::Quarterly);
    }
    if ANNUAL.iter().any(|w| lower.contains(w)) {
        return Some(Period::Annual);
    }
    None
}

// ============================================================================
// Matcher plumbing
// ============================================================================

pub type MatcherFn = fn(&Paragraph, &str, &MatcherCtx) -> MatchOutcome;

/// One pipeline entry.
pub struct ClauseMatcher {
    pub clause_id: &'static str,
    pub run: MatcherFn,
}

fn clause_for(
    clause_id: &str,
    category: &str,
    para: &Paragraph,
    confidence: Confidence,
    anchors: &[&str],
) -> Clause {
    let mut clause = Clause::new(
        clause_id,
        category,
        para.text.clone(),
        para.section_ref.clone(),
        confidence,
    );
    clause.anchors_matched = anchors.iter().map(|a| a.to_string()).collect();
    clause
}

fn matched_anchors<'a>(lower: &str, anchors: &[&'a str]) -> Vec<&'a str> {
    anchors
        .iter()
        .copied()
        .filter(|a| lower.contains(a))
        .collect()
}

/// The fixed pipeline, most specific first.
pub fn pipeline() -> &'static [ClauseMatcher] {
    static PIPELINE: &[ClauseMatcher] = &[
        ClauseMatcher { clause_id: "DEMURRAGE", run: match_demurrage },
        ClauseMatcher { clause_id: "PENALTY_VOLUME_SHORTFALL", run: match_shortfall_penalty },
        ClauseMatcher { clause_id: "PENALTY_LATE_DELIVERY", run: match_late_delivery_penalty },
        ClauseMatcher { clause_id: "DEFAULT_AND_REMEDIES", run: match_default_and_remedies },
        ClauseMatcher { clause_id: "LAYTIME", run: match_laytime },
        ClauseMatcher { clause_id: "LOADING_RATE", run: match_loading_rate },
        ClauseMatcher { clause_id: "MINIMUM_INVENTORY", run: match_minimum_inventory },
        ClauseMatcher { clause_id: "QUANTITY_TOLERANCE", run: match_quantity_tolerance },
        ClauseMatcher { clause_id: "PRICE", run: match_price },
        ClauseMatcher { clause_id: "PAYMENT", run: match_payment },
        ClauseMatcher { clause_id: "INCOTERMS", run: match_incoterms },
        ClauseMatcher { clause_id: "DELIVERY_PERIOD", run: match_delivery_period },
        ClauseMatcher { clause_id: "PRODUCT_AND_SPECS", run: match_product_and_specs },
        ClauseMatcher { clause_id: "WEIGHT_QUALITY", run: keyword_weight_quality },
        ClauseMatcher { clause_id: "NOMINATION", run: keyword_nomination },
        ClauseMatcher { clause_id: "VESSEL_APPROVAL", run: keyword_vessel_approval },
        ClauseMatcher { clause_id: "SHIPPING_TERMS", run: keyword_shipping_terms },
        ClauseMatcher { clause_id: "ORIGIN", run: keyword_origin },
        ClauseMatcher { clause_id: "DESTINATION", run: keyword_destination },
        ClauseMatcher { clause_id: "INSURANCE", run: keyword_insurance },
        ClauseMatcher { clause_id: "FORCE_MAJEURE", run: keyword_force_majeure },
        ClauseMatcher { clause_id: "ARBITRATION", run: keyword_arbitration },
        ClauseMatcher { clause_id: "GOVERNING_LAW", run: keyword_governing_law },
        ClauseMatcher { clause_id: "SANCTIONS", run: keyword_sanctions },
        ClauseMatcher { clause_id: "ASSIGNMENT", run: keyword_assignment },
        ClauseMatcher { clause_id: "TITLE_RISK", run: keyword_title_risk },
        ClauseMatcher { clause_id: "NOTICES", run: keyword_notices },
        ClauseMatcher { clause_id: "CONFIDENTIALITY", run: keyword_confidentiality },
        ClauseMatcher { clause_id: "TERMINATION", run: keyword_termination },
        ClauseMatcher { clause_id: "TRADE_RULES", run: keyword_trade_rules },
        ClauseMatcher { clause_id: "ENVIRONMENTAL", run: keyword_environmental },
    ];
    PIPELINE
}

// ============================================================================
// Bound-shaped matchers
// ============================================================================

fn match_demurrage(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    if !lower.contains("demurrage") {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(lower, &["demurrage", "per day"]);
    match first_money(&para.text) {
        Some(token) => {
            let confidence = if token.has_currency { Confidence::High } else { Confidence::Medium };
            let mut clause = clause_for("DEMURRAGE", "shipping", para, confidence, &anchors);
            clause.parameter = Some("demurrage_usd_day".to_string());
            clause.operator = Some(BoundOperator::Eq);
            clause.value = Some(token.value);
            clause.unit = Some(detect_unit(lower).unwrap_or("$/day").to_string());
            clause.penalty_per_unit = Some(token.value);
            clause
                .extracted_fields
                .insert("rate".to_string(), FieldValue::Num(token.value));
            MatchOutcome::Match(clause)
        }
        None => MatchOutcome::Warn(format!(
            "demurrage clause without an extractable rate ({})",
            para.section_ref
        )),
    }
}

/// Remedies paragraphs are claimed by DEFAULT_AND_REMEDIES; embedded
/// penalties are pulled out by the parser's second pass instead.
pub fn is_remedies_text(lower: &str) -> bool {
    lower.contains("event of default") || lower.contains("remedies")
}

fn penalty_clause(
    clause_id: &str,
    para: &Paragraph,
    lower: &str,
    parameter: &str,
    anchors: &[&str],
) -> MatchOutcome {
    match first_money(&para.text) {
        Some(token) => {
            let confidence = if token.has_currency { Confidence::High } else { Confidence::Medium };
            let mut clause = clause_for(clause_id, "penalty", para, confidence, anchors);
            clause.parameter = Some(parameter.to_string());
            clause.penalty_per_unit = Some(token.value);
            clause.value = Some(token.value);
            clause.operator = Some(BoundOperator::Eq);
            clause.unit = Some(detect_unit(lower).unwrap_or("$/ton").to_string());
            clause.period = detect_period(lower);
            // A second, larger amount is read as the aggregate cap.
            clause.penalty_cap = extract_numbers(&para.text)
                .into_iter()
                .map(|n| n.value)
                .filter(|v| *v > token.value)
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))));
            clause
                .extracted_fields
                .insert("rate".to_string(), FieldValue::Num(token.value));
            MatchOutcome::Match(clause)
        }
        None => {
            // Unambiguous penalty wording without a number still yields a
            // low-confidence clause.
            let mut clause = clause_for(clause_id, "penalty", para, Confidence::Low, anchors);
            clause.parameter = Some(parameter.to_string());
            MatchOutcome::Match(clause)
        }
    }
}

fn match_shortfall_penalty(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    if is_remedies_text(lower) {
        return MatchOutcome::Skip;
    }
    match_shortfall_penalty_inner(para, lower)
}

pub(crate) fn match_shortfall_penalty_inner(para: &Paragraph, lower: &str) -> MatchOutcome {
    let talks_shortfall = lower.contains("shortfall")
        || lower.contains("short-delivered")
        || lower.contains("deficiency in quantity");
    let talks_penalty =
        lower.contains("penalty") || lower.contains("liquidated damages") || lower.contains("pay");
    if !(talks_shortfall && talks_penalty) {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(lower, &["shortfall", "penalty", "liquidated damages"]);
    penalty_clause(
        "PENALTY_VOLUME_SHORTFALL",
        para,
        lower,
        "shortfall_penalty_usd_ton",
        &anchors,
    )
}

fn match_late_delivery_penalty(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    if is_remedies_text(lower) {
        return MatchOutcome::Skip;
    }
    match_late_delivery_penalty_inner(para, lower)
}

pub(crate) fn match_late_delivery_penalty_inner(para: &Paragraph, lower: &str) -> MatchOutcome {
    let talks_late = lower.contains("late delivery") || lower.contains("delay in delivery");
    let talks_penalty =
        lower.contains("penalty") || lower.contains("liquidated damages") || lower.contains("pay");
    if !(talks_late && talks_penalty) {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(lower, &["late delivery", "penalty", "liquidated damages"]);
    penalty_clause(
        "PENALTY_LATE_DELIVERY",
        para,
        lower,
        "late_delivery_penalty_usd_ton",
        &anchors,
    )
}

fn match_default_and_remedies(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    const ANCHORS: &[&str] = &["event of default", "remedies", "breach of this contract"];
    let hit = matched_anchors(lower, ANCHORS);
    if hit.is_empty() {
        return MatchOutcome::Skip;
    }
    MatchOutcome::Match(clause_for(
        "DEFAULT_AND_REMEDIES",
        "legal",
        para,
        Confidence::High,
        &hit,
    ))
}

fn match_laytime(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    if !lower.contains("laytime") {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(lower, &["laytime", "running hours"]);
    match extract_numbers(&para.text).first() {
        Some(token) => {
            let in_days = detect_unit(lower) == Some("days");
            let mut clause = clause_for("LAYTIME", "shipping", para, Confidence::High, &anchors);
            clause.parameter = Some("laytime_hours".to_string());
            clause.operator = Some(detect_operator(lower).unwrap_or(BoundOperator::Lte));
            clause.value = Some(if in_days { token.value * 24.0 } else { token.value });
            clause.unit = Some("hours".to_string());
            if in_days {
                clause.confidence = Confidence::Medium;
            }
            MatchOutcome::Match(clause)
        }
        None => MatchOutcome::Warn(format!(
            "laytime clause without an extractable allowance ({})",
            para.section_ref
        )),
    }
}

fn match_loading_rate(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    let is_loading = lower.contains("loading rate") || lower.contains("load at the rate");
    let is_discharge = lower.contains("discharge rate") || lower.contains("discharge at the rate");
    if !is_loading && !is_discharge {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(lower, &["loading rate", "discharge rate", "per day"]);
    match extract_numbers(&para.text).first() {
        Some(token) => {
            let mut clause =
                clause_for("LOADING_RATE", "shipping", para, Confidence::High, &anchors);
            clause.parameter = Some(
                if is_discharge { "discharge_rate_mt_day" } else { "loading_rate_mt_day" }
                    .to_string(),
            );
            // A guaranteed rate is a floor unless the wording says otherwise.
            clause.operator = Some(detect_operator(lower).unwrap_or(BoundOperator::Gte));
            clause.value = Some(token.value);
            clause.unit = Some("mt/day".to_string());
            MatchOutcome::Match(clause)
        }
        None => MatchOutcome::Warn(format!(
            "loading-rate clause without an extractable rate ({})",
            para.section_ref
        )),
    }
}

fn match_minimum_inventory(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    if !lower.contains("inventory") && !lower.contains("storage heel") {
        return MatchOutcome::Skip;
    }
    let parameter = if lower.contains("donaldsonville") {
        "inv_don"
    } else if lower.contains("tampa") {
        "inv_tampa"
    } else {
        return MatchOutcome::Skip;
    };
    let anchors = matched_anchors(lower, &["inventory", "donaldsonville", "tampa"]);
    match extract_numbers(&para.text).first() {
        Some(token) => {
            let mut clause =
                clause_for("MINIMUM_INVENTORY", "commercial", para, Confidence::High, &anchors);
            clause.parameter = Some(parameter.to_string());
            clause.operator = Some(detect_operator(lower).unwrap_or(BoundOperator::Gte));
            clause.value = Some(token.value);
            clause.unit = Some("mt".to_string());
            MatchOutcome::Match(clause)
        }
        None => MatchOutcome::Warn(format!(
            "inventory clause without an extractable quantity ({})",
            para.section_ref
        )),
    }
}

fn match_quantity_tolerance(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    let talks_quantity = lower.contains("quantity")
        || lower.contains("tolerance")
        || lower.contains("more or less");
    if !talks_quantity {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(
        lower,
        &["quantity", "tolerance", "more or less", "+/-", "moloo"],
    );
    let numbers = extract_numbers(&para.text);
    if numbers.is_empty() {
        return MatchOutcome::Warn(format!(
            "quantity clause without an extractable volume ({})",
            para.section_ref
        ));
    }

    // Small numbers read as tolerance percentages, large ones as volumes.
    let pct = numbers.iter().find(|n| n.value <= 20.0).copied();
    let volume = numbers.iter().find(|n| n.value > 20.0).copied();

    let mut clause =
        clause_for("QUANTITY_TOLERANCE", "commercial", para, Confidence::High, &anchors);
    match (volume, detect_period(lower)) {
        (Some(vol), Some(Period::Monthly)) => {
            clause.parameter = Some("monthly_volume_mt".to_string());
            clause.operator = Some(detect_operator(lower).unwrap_or(BoundOperator::Eq));
            clause.value = Some(vol.value);
            clause.unit = Some("mt".to_string());
            clause.period = Some(Period::Monthly);
        }
        (Some(vol), period) => {
            let operator = detect_operator(lower).unwrap_or(BoundOperator::Eq);
            clause.parameter = Some(
                match operator {
                    BoundOperator::Lte => "max_volume_mt",
                    _ => "min_volume_mt",
                }
                .to_string(),
            );
            clause.operator = Some(operator);
            clause.value = Some(vol.value);
            if operator == BoundOperator::Between {
                clause.value_upper = numbers
                    .iter()
                    .map(|n| n.value)
                    .find(|v| *v > vol.value);
            }
            clause.unit = Some("mt".to_string());
            clause.period = period;
            if detect_operator(lower).is_none() {
                clause.confidence = Confidence::Medium;
            }
        }
        (None, _) => {
            clause.confidence = Confidence::Medium;
        }
    }
    if let Some(p) = pct {
        clause
            .extracted_fields
            .insert("tolerance_pct".to_string(), FieldValue::Num(p.value));
    }
    if let Some(vol) = volume {
        clause
            .extracted_fields
            .insert("volume_mt".to_string(), FieldValue::Num(vol.value));
    }
    MatchOutcome::Match(clause)
}

fn match_price(para: &Paragraph, lower: &str, ctx: &MatcherCtx) -> MatchOutcome {
    if !lower.contains("price") {
        return MatchOutcome::Skip;
    }
    let anchors = matched_anchors(lower, &["price", "usd", "per metric ton"]);
    match first_money(&para.text) {
        Some(token) => {
            let (parameter, defaulted) = ctx.price_parameter();
            let confidence = if token.has_currency && !defaulted {
                Confidence::High
            } else {
                Confidence::Medium
            };
            let mut clause = clause_for("PRICE", "commercial", para, confidence, &anchors);
            clause.parameter = Some(parameter.to_string());
            clause.operator = Some(detect_operator(lower).unwrap_or(BoundOperator::Eq));
            clause.value = Some(token.value);
            clause.unit = Some(detect_unit(lower).unwrap_or("$/ton").to_string());
            clause.period = detect_period(lower);
            clause
                .extracted_fields
                .insert("price".to_string(), FieldValue::Num(token.value));
            MatchOutcome::Match(clause)
        }
        None => {
            // Formula-priced contracts (index-linked) carry no flat number;
            // the clause survives at low confidence for review.
            if lower.contains("index") || lower.contains("formula") {
                let mut clause = clause_for("PRICE", "commercial", para, Confidence::Low, &anchors);
                clause
                    .extracted_fields
                    .insert("formula".to_string(), FieldValue::Flag(true));
                return MatchOutcome::Match(clause);
            }
            MatchOutcome::Warn(format!(
                "price clause without an extractable amount ({})",
                para.section_ref
            ))
        }
    }
}

fn match_payment(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    const ANCHORS: &[&str] = &[
        "payment",
        "letter of credit",
        "telegraphic transfer",
        "cash against documents",
    ];
    let hit = matched_anchors(lower, ANCHORS);
    if hit.is_empty() {
        return MatchOutcome::Skip;
    }
    let mut clause = clause_for("PAYMENT", "commercial", para, Confidence::High, &hit);
    if let Some(days) = payment_days_re()
        .captures(lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        clause
            .extracted_fields
            .insert("net_days".to_string(), FieldValue::Num(days));
    }
    if lower.contains("letter of credit") {
        clause.extracted_fields.insert(
            "instrument".to_string(),
            FieldValue::Text("letter_of_credit".to_string()),
        );
    }
    MatchOutcome::Match(clause)
}

fn payment_days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:net|within)\s+(\d{1,3})\s+days").unwrap())
}

fn match_incoterms(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    let named = ["fob", "cfr", "cif", "dap", "ddp", "fca", "exw", "cpt"]
        .iter()
        .copied()
        .filter(|term| contains_word(lower, term))
        .collect::<Vec<_>>();
    let references_rules = lower.contains("incoterms");
    if named.is_empty() && !references_rules {
        return MatchOutcome::Skip;
    }
    // A bare rule mention inside running prose is only taken as the
    // incoterms clause when the paragraph is about delivery terms.
    let is_terms_paragraph = references_rules
        || lower.contains("delivery terms")
        || lower.contains("trade term")
        || lower.contains("delivery basis");
    if !is_terms_paragraph {
        return MatchOutcome::Skip;
    }
    let mut clause = clause_for(
        "INCOTERMS",
        "commercial",
        para,
        if references_rules { Confidence::High } else { Confidence::Medium },
        &named,
    );
    if let Some(term) = named.first().and_then(|t| Incoterm::parse(t)) {
        clause.extracted_fields.insert(
            "incoterm".to_string(),
            FieldValue::Text(term.as_str().to_string()),
        );
    }
    MatchOutcome::Match(clause)
}

fn match_delivery_period(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    const ANCHORS: &[&str] = &[
        "delivery period",
        "shipment period",
        "laycan",
        "delivery window",
        "shipment window",
    ];
    let hit = matched_anchors(lower, ANCHORS);
    if hit.is_empty() {
        return MatchOutcome::Skip;
    }
    let mut clause = clause_for("DELIVERY_PERIOD", "commercial", para, Confidence::High, &hit);
    clause.period = detect_period(lower);
    MatchOutcome::Match(clause)
}

fn match_product_and_specs(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
    const ANCHORS: &[&str] = &[
        "product",
        "specification",
        "anhydrous ammonia",
        "urea",
        "purity",
    ];
    let hit = matched_anchors(lower, ANCHORS);
    // One generic word is not enough; specs paragraphs name the product or
    // the spec table.
    if hit.is_empty()
        || (hit == ["product"] && !lower.contains("specification") && !lower.contains("grade"))
    {
        return MatchOutcome::Skip;
    }
    MatchOutcome::Match(clause_for(
        "PRODUCT_AND_SPECS",
        "commercial",
        para,
        Confidence::High,
        &hit,
    ))
}

fn contains_word(lower: &str, word: &str) -> bool {
    lower.match_indices(word).any(|(idx, _)| {
        let before_ok = idx == 0 || !lower.as_bytes()[idx - 1].is_ascii_alphanumeric();
        let after = idx + word.len();
        let after_ok = after >= lower.len() || !lower.as_bytes()[after].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

// ============================================================================
// Keyword matchers for the plain legal clauses
// ============================================================================

macro_rules! keyword_matcher {
    ($name:ident, $clause_id:expr, $category:expr, $anchors:expr) => {
        fn $name(para: &Paragraph, lower: &str, _ctx: &MatcherCtx) -> MatchOutcome {
            const ANCHORS: &[&str] = $anchors;
            let hit = matched_anchors(lower, ANCHORS);
            if hit.is_empty() {
                return MatchOutcome::Skip;
            }
            MatchOutcome::Match(clause_for($clause_id, $category, para, Confidence::High, &hit))
        }
    };
}

keyword_matcher!(
    keyword_weight_quality,
    "WEIGHT_QUALITY",
    "commercial",
    &["weight and quality", "independent surveyor", "draft survey", "certificate of analysis"]
);
keyword_matcher!(keyword_nomination, "NOMINATION", "shipping", &["nominate", "nomination"]);
keyword_matcher!(
    keyword_vessel_approval,
    "VESSEL_APPROVAL",
    "shipping",
    &["vessel approval", "vetting", "acceptable to terminal"]
);
keyword_matcher!(
    keyword_shipping_terms,
    "SHIPPING_TERMS",
    "shipping",
    &["charter party", "charterparty", "shipping terms"]
);
keyword_matcher!(keyword_origin, "ORIGIN", "shipping", &["country of origin", "origin:"]);
keyword_matcher!(
    keyword_destination,
    "DESTINATION",
    "shipping",
    &["destination", "discharge port", "delivery point"]
);
keyword_matcher!(keyword_insurance, "INSURANCE", "legal", &["insurance", "insured"]);
keyword_matcher!(keyword_force_majeure, "FORCE_MAJEURE", "legal", &["force majeure"]);
keyword_matcher!(keyword_arbitration, "ARBITRATION", "legal", &["arbitration", "arbitrator"]);
keyword_matcher!(
    keyword_governing_law,
    "GOVERNING_LAW",
    "legal",
    &["governing law", "governed by the laws", "governed by english law"]
);
keyword_matcher!(keyword_sanctions, "SANCTIONS", "legal", &["sanctions", "ofac", "embargo"]);
keyword_matcher!(
    keyword_assignment,
    "ASSIGNMENT",
    "legal",
    &["assignment", "assign this contract"]
);
keyword_matcher!(
    keyword_title_risk,
    "TITLE_RISK",
    "legal",
    &["title and risk", "risk of loss", "title shall pass"]
);
keyword_matcher!(keyword_notices, "NOTICES", "legal", &["notices", "notice shall be given"]);
keyword_matcher!(keyword_confidentiality, "CONFIDENTIALITY", "legal", &["confidential"]);
keyword_matcher!(
    keyword_termination,
    "TERMINATION",
    "legal",
    &["termination", "terminate this contract"]
);
keyword_matcher!(
    keyword_trade_rules,
    "TRADE_RULES",
    "legal",
    &["fertecon", "trade rules", "gafta", "fosfa"]
);
keyword_matcher!(
    keyword_environmental,
    "ENVIRONMENTAL",
    "legal",
    &["environmental", "emissions", "imo 2020"]
);

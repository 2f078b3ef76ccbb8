//! Seed inventory: canonical clauses, family signatures, templates, and
//! parameter tables the registry boots with.

use crate::registry::{CanonicalClause, SanityRange};
use quayside_protocol::{
    ClauseRequirement, Direction, FamilySignature, Incoterm, RequirementLevel, Template,
    TemplateType, TermType, Transport,
};
use std::collections::BTreeMap;

fn clause(id: &str, category: &str, description: &str) -> CanonicalClause {
    CanonicalClause {
        clause_id: id.to_string(),
        category: category.to_string(),
        description: description.to_string(),
    }
}

/// The canonical clause inventory.
pub fn canonical_clauses() -> Vec<CanonicalClause> {
    vec![
        clause("INCOTERMS", "commercial", "Delivery rule (Incoterms 2020)"),
        clause("PRODUCT_AND_SPECS", "commercial", "Product description and specification"),
        clause("QUANTITY_TOLERANCE", "commercial", "Contract quantity and +/- tolerance"),
        clause("PRICE", "commercial", "Unit price and basis"),
        clause("PAYMENT", "commercial", "Payment terms and instrument"),
        clause("DELIVERY_PERIOD", "commercial", "Delivery or shipment window"),
        clause("LOADING_RATE", "shipping", "Guaranteed loading rate"),
        clause("DEMURRAGE", "shipping", "Demurrage rate and basis"),
        clause("LAYTIME", "shipping", "Allowed laytime"),
        clause("WEIGHT_QUALITY", "commercial", "Weight and quality determination"),
        clause("INSURANCE", "legal", "Insurance responsibility"),
        clause("FORCE_MAJEURE", "legal", "Force majeure"),
        clause("GOVERNING_LAW", "legal", "Governing law"),
        clause("ARBITRATION", "legal", "Arbitration forum and rules"),
        clause("SANCTIONS", "legal", "Sanctions compliance"),
        clause("ASSIGNMENT", "legal", "Assignment restrictions"),
        clause("TITLE_RISK", "legal", "Title and risk transfer"),
        clause("NOTICES", "legal", "Notice addresses and method"),
        clause("CONFIDENTIALITY", "legal", "Confidentiality"),
        clause("TERMINATION", "legal", "Termination rights"),
        clause("DEFAULT_AND_REMEDIES", "legal", "Default events and remedies"),
        clause("TRADE_RULES", "legal", "Trade rules incorporation"),
        clause("ORIGIN", "shipping", "Product origin"),
        clause("DESTINATION", "shipping", "Discharge or delivery destination"),
        clause("NOMINATION", "shipping", "Vessel or volume nomination procedure"),
        clause("SHIPPING_TERMS", "shipping", "Charter party and shipping terms"),
        clause("VESSEL_APPROVAL", "shipping", "Vessel vetting and approval"),
        clause("ENVIRONMENTAL", "legal", "Environmental and regulatory compliance"),
        clause("PENALTY_VOLUME_SHORTFALL", "penalty", "Penalty for volume shortfall"),
        clause("PENALTY_LATE_DELIVERY", "penalty", "Penalty for late delivery"),
        clause("MINIMUM_INVENTORY", "commercial", "Minimum inventory commitment at a named terminal"),
    ]
}

/// The seven registered contract families.
pub fn family_signatures() -> Vec<FamilySignature> {
    fn anchors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }
    fn expected(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    vec![
        FamilySignature {
            family_id: "vessel_purchase_fob".to_string(),
            direction: Direction::Purchase,
            term_type: TermType::Spot,
            transport: Transport::Vessel,
            default_incoterms: vec![Incoterm::Fob],
            detect_anchors: anchors(&[
                "fob",
                "load port",
                "laycan",
                "buyer shall nominate",
                "vessel",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "QUANTITY_TOLERANCE",
                "LOADING_RATE",
                "LAYTIME",
                "DEMURRAGE",
                "NOMINATION",
            ]),
        },
        FamilySignature {
            family_id: "vessel_sale_cfr".to_string(),
            direction: Direction::Sale,
            term_type: TermType::Spot,
            transport: Transport::Vessel,
            default_incoterms: vec![Incoterm::Cfr, Incoterm::Cif],
            detect_anchors: anchors(&[
                "cfr",
                "cost and freight",
                "discharge port",
                "seller shall nominate",
                "vessel",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "QUANTITY_TOLERANCE",
                "DESTINATION",
                "DEMURRAGE",
                "VESSEL_APPROVAL",
            ]),
        },
        FamilySignature {
            family_id: "vessel_dap".to_string(),
            direction: Direction::Sale,
            term_type: TermType::Spot,
            transport: Transport::Vessel,
            default_incoterms: vec![Incoterm::Dap],
            detect_anchors: anchors(&[
                "dap",
                "delivered at place",
                "named place of destination",
                "vessel",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "DELIVERY_PERIOD",
                "DESTINATION",
                "TITLE_RISK",
            ]),
        },
        FamilySignature {
            family_id: "domestic_cpt".to_string(),
            direction: Direction::Sale,
            term_type: TermType::Spot,
            transport: Transport::Domestic,
            default_incoterms: vec![Incoterm::Cpt],
            detect_anchors: anchors(&[
                "cpt",
                "carriage paid to",
                "truck",
                "railcar",
                "domestic",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "QUANTITY_TOLERANCE",
                "DELIVERY_PERIOD",
            ]),
        },
        FamilySignature {
            family_id: "domestic_multimodal".to_string(),
            direction: Direction::Purchase,
            term_type: TermType::Spot,
            transport: Transport::Multimodal,
            default_incoterms: vec![Incoterm::Fca, Incoterm::Dap],
            detect_anchors: anchors(&[
                "multimodal",
                "barge",
                "pipeline",
                "transloading",
                "terminal",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "DELIVERY_PERIOD",
                "MINIMUM_INVENTORY",
            ]),
        },
        FamilySignature {
            family_id: "lt_sale_cfr".to_string(),
            direction: Direction::Sale,
            term_type: TermType::LongTerm,
            transport: Transport::Vessel,
            default_incoterms: vec![Incoterm::Cfr],
            detect_anchors: anchors(&[
                "cfr",
                "contract year",
                "annual quantity",
                "evenly spread",
                "shortfall",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "QUANTITY_TOLERANCE",
                "DELIVERY_PERIOD",
                "PENALTY_VOLUME_SHORTFALL",
                "DEFAULT_AND_REMEDIES",
            ]),
        },
        FamilySignature {
            family_id: "lt_purchase_fob".to_string(),
            direction: Direction::Purchase,
            term_type: TermType::LongTerm,
            transport: Transport::Vessel,
            default_incoterms: vec![Incoterm::Fob],
            detect_anchors: anchors(&[
                "fob",
                "contract year",
                "annual quantity",
                "take or pay",
                "shortfall",
            ]),
            expected_clause_ids: expected(&[
                "INCOTERMS",
                "PRICE",
                "QUANTITY_TOLERANCE",
                "DELIVERY_PERIOD",
                "PENALTY_VOLUME_SHORTFALL",
                "DEFAULT_AND_REMEDIES",
            ]),
        },
    ]
}

fn requirement(
    clause_type: &str,
    parameter_class: Option<&str>,
    level: RequirementLevel,
    description: &str,
) -> ClauseRequirement {
    ClauseRequirement {
        clause_type: clause_type.to_string(),
        parameter_class: parameter_class.map(str::to_string),
        level,
        description: description.to_string(),
    }
}

/// The standard `(contract_type, incoterm)` templates.
pub fn templates() -> Vec<Template> {
    use RequirementLevel::{Expected, Optional, Required};

    let purchase_core = |incoterm: Option<Incoterm>| Template {
        contract_type: TemplateType::Purchase,
        incoterm,
        requirements: vec![
            requirement("INCOTERMS", None, Required, "Delivery rule stated"),
            requirement("PRODUCT_AND_SPECS", None, Required, "Product specified"),
            requirement("QUANTITY_TOLERANCE", Some("volume"), Required, "Quantity with tolerance"),
            requirement("PRICE", Some("price"), Required, "Unit price"),
            requirement("PAYMENT", None, Required, "Payment terms"),
            requirement("DELIVERY_PERIOD", None, Required, "Delivery window"),
            requirement("LOADING_RATE", Some("rate"), Expected, "Loading rate"),
            requirement("LAYTIME", Some("laytime"), Expected, "Laytime allowance"),
            requirement("DEMURRAGE", Some("demurrage"), Expected, "Demurrage rate"),
            requirement("WEIGHT_QUALITY", None, Expected, "Determination at load"),
            requirement("FORCE_MAJEURE", None, Expected, "Force majeure"),
            requirement("GOVERNING_LAW", None, Expected, "Governing law"),
            requirement("ARBITRATION", None, Optional, "Arbitration"),
            requirement("SANCTIONS", None, Optional, "Sanctions"),
            requirement("DEFAULT_AND_REMEDIES", None, Optional, "Remedies"),
        ],
    };

    let sale_core = |incoterm: Option<Incoterm>| Template {
        contract_type: TemplateType::Sale,
        incoterm,
        requirements: vec![
            requirement("INCOTERMS", None, Required, "Delivery rule stated"),
            requirement("PRODUCT_AND_SPECS", None, Required, "Product specified"),
            requirement("QUANTITY_TOLERANCE", Some("volume"), Required, "Quantity with tolerance"),
            requirement("PRICE", Some("price"), Required, "Unit price"),
            requirement("PAYMENT", None, Required, "Payment terms"),
            requirement("DELIVERY_PERIOD", None, Required, "Delivery window"),
            requirement("DESTINATION", None, Expected, "Discharge destination"),
            requirement("DEMURRAGE", Some("demurrage"), Expected, "Demurrage rate"),
            requirement("TITLE_RISK", None, Expected, "Title and risk transfer"),
            requirement("WEIGHT_QUALITY", None, Expected, "Determination at discharge"),
            requirement("FORCE_MAJEURE", None, Expected, "Force majeure"),
            requirement("GOVERNING_LAW", None, Expected, "Governing law"),
            requirement("PENALTY_VOLUME_SHORTFALL", Some("penalty"), Optional, "Shortfall penalty"),
            requirement("PENALTY_LATE_DELIVERY", Some("penalty"), Optional, "Late delivery penalty"),
        ],
    };

    let spot = |contract_type: TemplateType| Template {
        contract_type,
        incoterm: None,
        requirements: vec![
            requirement("INCOTERMS", None, Required, "Delivery rule stated"),
            requirement("PRODUCT_AND_SPECS", None, Required, "Product specified"),
            requirement("PRICE", Some("price"), Required, "Unit price"),
            requirement("QUANTITY_TOLERANCE", Some("volume"), Required, "Cargo size"),
            requirement("DELIVERY_PERIOD", None, Expected, "Laycan"),
            requirement("PAYMENT", None, Expected, "Payment terms"),
            requirement("DEMURRAGE", Some("demurrage"), Optional, "Demurrage rate"),
        ],
    };

    vec![
        purchase_core(Some(Incoterm::Fob)),
        purchase_core(Some(Incoterm::Cif)),
        purchase_core(None),
        sale_core(Some(Incoterm::Cfr)),
        sale_core(Some(Incoterm::Dap)),
        sale_core(None),
        spot(TemplateType::SpotPurchase),
        spot(TemplateType::SpotSale),
    ]
}

/// Requirement class -> concrete solver parameter keys.
pub fn parameter_classes() -> BTreeMap<String, Vec<String>> {
    let mut classes = BTreeMap::new();
    let mut insert = |class: &str, members: &[&str]| {
        classes.insert(
            class.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    };
    insert("price", &["buy_price_usd_ton", "sell_price_usd_ton"]);
    insert(
        "volume",
        &["min_volume_mt", "max_volume_mt", "monthly_volume_mt", "quantity_tolerance_pct"],
    );
    insert("rate", &["loading_rate_mt_day", "discharge_rate_mt_day"]);
    insert("demurrage", &["demurrage_usd_day"]);
    insert("laytime", &["laytime_hours"]);
    insert("inventory", &["inv_don", "inv_tampa"]);
    insert(
        "penalty",
        &["shortfall_penalty_usd_ton", "late_delivery_penalty_usd_ton"],
    );
    classes
}

/// Per-parameter plausibility ranges for value sanity checks.
pub fn sanity_ranges() -> BTreeMap<String, SanityRange> {
    let mut ranges = BTreeMap::new();
    let mut insert = |param: &str, min: f64, max: f64| {
        ranges.insert(param.to_string(), SanityRange { min, max });
    };
    insert("buy_price_usd_ton", 100.0, 1_200.0);
    insert("sell_price_usd_ton", 100.0, 1_500.0);
    insert("min_volume_mt", 100.0, 500_000.0);
    insert("max_volume_mt", 100.0, 1_000_000.0);
    insert("monthly_volume_mt", 500.0, 100_000.0);
    insert("quantity_tolerance_pct", 1.0, 15.0);
    insert("loading_rate_mt_day", 500.0, 30_000.0);
    insert("discharge_rate_mt_day", 500.0, 30_000.0);
    insert("demurrage_usd_day", 5_000.0, 150_000.0);
    insert("laytime_hours", 12.0, 240.0);
    insert("inv_don", 0.0, 200_000.0);
    insert("inv_tampa", 0.0, 200_000.0);
    insert("shortfall_penalty_usd_ton", 1.0, 300.0);
    insert("late_delivery_penalty_usd_ton", 1.0, 300.0);
    ranges
}

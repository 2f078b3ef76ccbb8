//! Product-group variable frames.
//!
//! A frame enumerates the solver variables of one product group, in the
//! wire order the engine expects, with the defaults used when a live value
//! is missing. The bridge resolves clause parameters against the frame, so
//! adding a product group means registering a frame, not editing the
//! bridge.

use quayside_solver::SolverInput;
use std::collections::{BTreeMap, HashMap};

/// One solver variable of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    pub key: String,
    /// Value used when neither live feed nor trader supplies one.
    pub default: f64,
}

impl VariableSpec {
    pub fn new(key: impl Into<String>, default: f64) -> Self {
        Self {
            key: key.into(),
            default,
        }
    }
}

/// Solver model shape for one product group.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableFrame {
    pub product_group: String,
    /// Wire order matters: the engine reads the variables block in this
    /// order.
    pub variables: Vec<VariableSpec>,
    pub route_count: u32,
    pub constraint_count: u32,
}

impl VariableFrame {
    pub fn contains(&self, key: &str) -> bool {
        self.variables.iter().any(|v| v.key == key)
    }

    /// Materialise the ordered solver input from a (possibly sparse)
    /// values map.
    pub fn solver_input(&self, values: &BTreeMap<String, f64>) -> SolverInput {
        SolverInput {
            variables: self
                .variables
                .iter()
                .map(|spec| {
                    (
                        spec.key.clone(),
                        values.get(&spec.key).copied().unwrap_or(spec.default),
                    )
                })
                .collect(),
            route_count: self.route_count,
            constraint_count: self.constraint_count,
        }
    }

    /// Full values map with defaults filled in.
    pub fn resolve(&self, values: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        self.variables
            .iter()
            .map(|spec| {
                (
                    spec.key.clone(),
                    values.get(&spec.key).copied().unwrap_or(spec.default),
                )
            })
            .collect()
    }
}

/// Registered frames, keyed by product group.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: HashMap<String, VariableFrame>,
}

impl FrameSet {
    /// The standard desk frames.
    pub fn standard() -> Self {
        let mut set = Self::default();
        set.register(ammonia_frame());
        set
    }

    pub fn register(&mut self, frame: VariableFrame) {
        self.frames.insert(frame.product_group.clone(), frame);
    }

    pub fn get(&self, product_group: &str) -> Option<&VariableFrame> {
        self.frames.get(product_group)
    }
}

fn ammonia_frame() -> VariableFrame {
    VariableFrame {
        product_group: "ammonia".to_string(),
        variables: vec![
            VariableSpec::new("inv_don", 0.0),
            VariableSpec::new("inv_tampa", 0.0),
            VariableSpec::new("buy_price_usd_ton", 400.0),
            VariableSpec::new("sell_price_usd_ton", 450.0),
            VariableSpec::new("monthly_volume_mt", 0.0),
            VariableSpec::new("min_volume_mt", 0.0),
            VariableSpec::new("max_volume_mt", 1_000_000.0),
            VariableSpec::new("loading_rate_mt_day", 10_000.0),
            VariableSpec::new("discharge_rate_mt_day", 10_000.0),
        ],
        route_count: 4,
        constraint_count: 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_input_order_and_defaults() {
        let set = FrameSet::standard();
        let frame = set.get("ammonia").unwrap();
        let mut values = BTreeMap::new();
        values.insert("inv_don".to_string(), 5_000.0);
        let input = frame.solver_input(&values);
        assert_eq!(input.variables[0], ("inv_don".to_string(), 5_000.0));
        // Missing values fall back to the frame defaults.
        assert_eq!(
            input.variables[2],
            ("buy_price_usd_ton".to_string(), 400.0)
        );
        assert_eq!(input.route_count, 4);
        assert_eq!(input.constraint_count, 6);
    }

    #[test]
    fn test_unknown_product_group() {
        assert!(FrameSet::standard().get("potash").is_none());
    }

    #[test]
    fn test_registering_a_frame_adds_a_group() {
        let mut set = FrameSet::standard();
        set.register(VariableFrame {
            product_group: "urea".to_string(),
            variables: vec![VariableSpec::new("buy_price_usd_ton", 300.0)],
            route_count: 1,
            constraint_count: 1,
        });
        assert!(set.get("urea").is_some());
    }
}

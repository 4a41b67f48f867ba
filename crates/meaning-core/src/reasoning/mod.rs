//! Symbolic layer: forward chaining plus per-dimension logical rules.

pub mod logic;
pub mod reasoner;

pub use logic::{Context, LogicalExpression};
pub use reasoner::{ReasoningOutcome, SymbolicReasoner, TraceEntry, WORLD_MODEL_SOURCE};

use crate::registry::Registry;
use crate::vector::FeatureVector;
use tracing::debug;

/// Trace source prefix for facts derived from a dimension's logical rule.
pub const LOGIC_SOURCE: &str = "logic";

/// Evaluate each dimension's compiled rule in registry order.
///
/// A true rule sets its dimension true in the context (so later rules see it) and raises
/// the slot to 1.0 only if it is exactly 0.0. A false rule changes nothing.
pub fn apply_dimension_rules(
    registry: &Registry,
    context: &mut Context,
    vector: &mut FeatureVector,
    pass: usize,
) -> Vec<TraceEntry> {
    let mut trace = Vec::new();
    for (idx, dim) in registry.iter().enumerate() {
        let Some(rule) = registry.compiled_rule(idx) else {
            continue;
        };
        if !rule.evaluate(context) {
            continue;
        }
        let was_true = context.get(&dim.id).copied().unwrap_or(false);
        context.insert(dim.id.clone(), true);
        let raised = vector.assert_additive(idx);
        if !was_true || raised {
            debug!(target: "meaning::logic", dimension = %dim.id, rule = %rule, "Dimension rule fired");
            trace.push(TraceEntry {
                pass,
                source: format!("{}:{}", LOGIC_SOURCE, dim.id),
                fact: dim.id.clone(),
            });
        }
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DimensionDef;

    #[test]
    fn later_rules_see_earlier_results() {
        let reg = Registry::from_dimensions(vec![
            DimensionDef::new("a"),
            DimensionDef::new("b").with_rule("a"),
            DimensionDef::new("c").with_rule("(b AND NOT(d))"),
        ])
        .unwrap();
        let mut ctx = Context::from([("a".to_string(), true)]);
        let mut v = FeatureVector::from_values(vec![1.0, 0.0, 0.0]);
        let trace = apply_dimension_rules(&reg, &mut ctx, &mut v, 1);
        assert_eq!(v.values(), &[1.0, 1.0, 1.0]);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1].source, "logic:c");
    }

    #[test]
    fn rules_never_override_observed_values() {
        let reg = Registry::from_dimensions(vec![
            DimensionDef::new("a"),
            DimensionDef::new("b").with_rule("a"),
            DimensionDef::new("c").with_rule("NOT a"),
        ])
        .unwrap();
        let mut ctx = Context::from([("a".to_string(), true)]);
        let mut v = FeatureVector::from_values(vec![1.0, 0.3, 0.7]);
        apply_dimension_rules(&reg, &mut ctx, &mut v, 1);
        assert_eq!(v.values(), &[1.0, 0.3, 0.7]);
    }
}

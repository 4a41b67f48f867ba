//! Forward-chaining reasoner over the working context.
//!
//! Each pass reads the context as it stood when the pass began, collects every rule
//! conclusion and world-model supertype that is not yet true, then asserts them all.
//! The loop stops at a fixed point or at the pass cap.

use crate::error::MeaningError;
use crate::knowledge::rulebase::Rulebase;
use crate::knowledge::world_model::WorldModel;
use crate::reasoning::logic::Context;
use crate::registry::Registry;
use crate::vector::FeatureVector;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Trace source for facts asserted through `is_a` closure.
pub const WORLD_MODEL_SOURCE: &str = "world_model";

/// One asserted fact and what produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub pass: usize,
    pub source: String,
    pub fact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningOutcome {
    pub context: Context,
    pub trace: Vec<TraceEntry>,
    pub passes: usize,
    pub limit_exceeded: bool,
}

impl ReasoningOutcome {
    /// Concepts asserted true, sorted.
    pub fn true_facts(&self) -> BTreeSet<String> {
        self.context
            .iter()
            .filter(|(_, v)| **v)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn warning(&self) -> Option<MeaningError> {
        self.limit_exceeded
            .then_some(MeaningError::ReasoningLimitExceeded {
                passes: self.passes,
            })
    }

    /// Raise every inferred fact that names a registry dimension to 1.0 when its slot is
    /// still exactly 0.0. Returns the slots that changed.
    pub fn apply_to_vector(&self, registry: &Registry, vector: &mut FeatureVector) -> Vec<usize> {
        let mut changed = Vec::new();
        for entry in &self.trace {
            for idx in registry.indices_of(&entry.fact) {
                if vector.assert_additive(idx) {
                    changed.push(idx);
                }
            }
        }
        changed
    }
}

#[derive(Debug, Clone)]
pub struct SymbolicReasoner {
    activation_threshold: f64,
    max_passes: usize,
    min_rule_confidence: f64,
}

impl Default for SymbolicReasoner {
    fn default() -> Self {
        Self::new(0.5, 50)
    }
}

impl SymbolicReasoner {
    pub fn new(activation_threshold: f64, max_passes: usize) -> Self {
        Self {
            activation_threshold,
            max_passes: max_passes.max(1),
            min_rule_confidence: 0.0,
        }
    }

    pub fn with_min_rule_confidence(mut self, min: f64) -> Self {
        self.min_rule_confidence = min;
        self
    }

    pub fn activation_threshold(&self) -> f64 {
        self.activation_threshold
    }

    /// Boolean projection of the vector: `value > threshold`. A repeated id is true if any
    /// of its slots is active.
    pub fn project(&self, vector: &FeatureVector, registry: &Registry) -> Context {
        let mut context = Context::new();
        for (dim, value) in registry.iter().zip(vector.values()) {
            let active = *value > self.activation_threshold;
            let slot = context.entry(dim.id.clone()).or_insert(false);
            *slot = *slot || active;
        }
        context
    }

    pub fn reason(
        &self,
        vector: &FeatureVector,
        registry: &Registry,
        rulebase: &Rulebase,
        world_model: &dyn WorldModel,
    ) -> ReasoningOutcome {
        self.reason_context(self.project(vector, registry), rulebase, world_model)
    }

    /// Run forward chaining from an arbitrary starting context.
    pub fn reason_context(
        &self,
        mut context: Context,
        rulebase: &Rulebase,
        world_model: &dyn WorldModel,
    ) -> ReasoningOutcome {
        let mut trace = Vec::new();

        for pass in 1..=self.max_passes {
            let new_facts = self.single_pass(pass, &context, rulebase, world_model);
            if new_facts.is_empty() {
                debug!(target: "meaning::reasoner", passes = pass, facts = trace.len(), "Reached fixed point");
                return ReasoningOutcome {
                    context,
                    trace,
                    passes: pass,
                    limit_exceeded: false,
                };
            }
            for entry in new_facts {
                context.insert(entry.fact.clone(), true);
                trace.push(entry);
            }
        }

        warn!(
            target: "meaning::reasoner",
            passes = self.max_passes,
            facts = trace.len(),
            "Reasoning pass cap reached before fixed point"
        );
        ReasoningOutcome {
            context,
            trace,
            passes: self.max_passes,
            limit_exceeded: true,
        }
    }

    fn single_pass(
        &self,
        pass: usize,
        snapshot: &Context,
        rulebase: &Rulebase,
        world_model: &dyn WorldModel,
    ) -> Vec<TraceEntry> {
        let holds = |id: &str| snapshot.get(id).copied().unwrap_or(false);
        let mut asserted: BTreeSet<&str> = BTreeSet::new();
        let mut out = Vec::new();

        for rule in rulebase.rules() {
            if rule.confidence.unwrap_or(1.0) < self.min_rule_confidence {
                continue;
            }
            if holds(&rule.conclusion) || !rule.triggers.iter().all(|t| holds(t)) {
                continue;
            }
            if asserted.insert(rule.conclusion.as_str()) {
                out.push(TraceEntry {
                    pass,
                    source: rule.label(),
                    fact: rule.conclusion.clone(),
                });
            }
        }

        let mut supertype_facts = Vec::new();
        for (concept, _) in snapshot.iter().filter(|(_, v)| **v) {
            for sup in world_model.get_all_supertypes(concept) {
                if !holds(&sup) && !asserted.contains(sup.as_str()) {
                    supertype_facts.push(sup);
                }
            }
        }
        let mut seen = BTreeSet::new();
        for sup in supertype_facts {
            if seen.insert(sup.clone()) {
                out.push(TraceEntry {
                    pass,
                    source: WORLD_MODEL_SOURCE.to_string(),
                    fact: sup,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::rulebase::Rule;
    use crate::knowledge::world_model::ConceptGraph;
    use crate::registry::DimensionDef;

    fn ctx(ids: &[&str]) -> Context {
        ids.iter().map(|i| (i.to_string(), true)).collect()
    }

    #[test]
    fn chains_rules_across_passes() {
        let rb = Rulebase::new(vec![
            Rule::new(&["is_mammal"], "is_animal"),
            Rule::new(&["is_dog"], "is_mammal"),
        ]);
        let out = SymbolicReasoner::default().reason_context(ctx(&["is_dog"]), &rb, &ConceptGraph::new());
        assert_eq!(
            out.true_facts().into_iter().collect::<Vec<_>>(),
            vec!["is_animal", "is_dog", "is_mammal"]
        );
        assert_eq!(out.trace[0].fact, "is_mammal");
        assert_eq!(out.trace[0].pass, 1);
        assert_eq!(out.trace[1].fact, "is_animal");
        assert_eq!(out.trace[1].pass, 2);
        assert_eq!(out.passes, 3);
        assert!(!out.limit_exceeded);
        assert!(out.warning().is_none());
    }

    #[test]
    fn conjunctive_trigger_needs_all() {
        let rb = Rulebase::new(vec![Rule::new(&["has_fur", "barks"], "is_dog")]);
        let r = SymbolicReasoner::default();
        let partial = r.reason_context(ctx(&["has_fur"]), &rb, &ConceptGraph::new());
        assert!(!partial.true_facts().contains("is_dog"));
        let full = r.reason_context(ctx(&["has_fur", "barks"]), &rb, &ConceptGraph::new());
        assert!(full.true_facts().contains("is_dog"));
    }

    #[test]
    fn world_model_supertypes_are_asserted_in_order() {
        let mut g = ConceptGraph::new();
        g.add_is_a("dog", "mammal");
        g.add_is_a("mammal", "animal");
        g.add_is_a("cat", "mammal");
        let out = SymbolicReasoner::default().reason_context(ctx(&["cat", "dog"]), &Rulebase::empty(), &g);
        let facts: Vec<_> = out.trace.iter().map(|t| t.fact.as_str()).collect();
        assert_eq!(facts, vec!["animal", "mammal"]);
        assert!(out.trace.iter().all(|t| t.source == WORLD_MODEL_SOURCE));
    }

    #[test]
    fn cap_stops_long_chains() {
        let rules = (0..10)
            .map(|i| Rule::new(&[&format!("c{}", i)], &format!("c{}", i + 1)))
            .collect();
        let rb = Rulebase::new(rules);
        let out = SymbolicReasoner::new(0.5, 3).reason_context(ctx(&["c0"]), &rb, &ConceptGraph::new());
        assert!(out.limit_exceeded);
        assert_eq!(out.passes, 3);
        assert_eq!(out.trace.len(), 3);
        assert!(matches!(
            out.warning(),
            Some(MeaningError::ReasoningLimitExceeded { passes: 3 })
        ));
    }

    #[test]
    fn cyclic_rulebase_terminates() {
        let rb = Rulebase::new(vec![Rule::new(&["a"], "b"), Rule::new(&["b"], "a")]);
        let out = SymbolicReasoner::default().reason_context(ctx(&["a"]), &rb, &ConceptGraph::new());
        assert!(!out.limit_exceeded);
        assert_eq!(out.true_facts().len(), 2);
    }

    #[test]
    fn low_confidence_rules_never_fire() {
        let rb = Rulebase::new(vec![Rule::new(&["a"], "b").with_confidence(0.2)]);
        let out = SymbolicReasoner::default()
            .with_min_rule_confidence(0.5)
            .reason_context(ctx(&["a"]), &rb, &ConceptGraph::new());
        assert!(out.trace.is_empty());
    }

    #[test]
    fn projection_and_additive_vector_update() {
        let reg = Registry::from_dimensions(vec![
            DimensionDef::new("is_dog"),
            DimensionDef::new("is_animal"),
            DimensionDef::new("is_pet"),
        ])
        .unwrap();
        let rb = Rulebase::new(vec![
            Rule::new(&["is_dog"], "is_animal"),
            Rule::new(&["is_dog"], "is_pet"),
        ]);
        let mut v = FeatureVector::from_values(vec![0.9, 0.0, 0.3]);
        let out = SymbolicReasoner::default().reason(&v, &reg, &rb, &ConceptGraph::new());
        let changed = out.apply_to_vector(&reg, &mut v);
        assert_eq!(changed, vec![1]);
        assert_eq!(v.values(), &[0.9, 1.0, 0.3]);
    }
}

//! Property tests for the reasoning and matching core.
//!
//! ## Properties
//! 1. build → reason → evaluate is deterministic.
//! 2. Re-reasoning from a fixed point asserts nothing new.
//! 3. Reasoning never lowers a non-zero input value.
//! 4. Logical evaluation is total; missing variables read as false.
//! 5. Under every metric, with and without weights, each library member is its own best
//!    match with a score of ~1.

use meaning_core::{
    ConceptGraph, Context, DimensionDef, EngineConfig, ExtractorOutput,
    KnowledgeSnapshot, LibraryEntry, LogicalExpression, MeaningEngine, Metric, Registry, Rule,
    Rulebase, SimilarityMatcher, SymbolicReasoner,
};
use proptest::prelude::*;

const IDS: [&str; 5] = ["is_dog", "is_wolf", "is_animal", "is_canine", "is_pet"];

fn registry() -> Registry {
    Registry::from_dimensions(vec![
        DimensionDef::new("is_dog"),
        DimensionDef::new("is_wolf"),
        DimensionDef::new("is_animal"),
        DimensionDef::new("is_canine").with_rule("is_dog OR is_wolf"),
        DimensionDef::new("is_pet").with_rule("is_dog AND NOT is_wolf"),
    ])
    .unwrap()
}

fn rulebase() -> Rulebase {
    Rulebase::new(vec![
        Rule::new(&["is_dog"], "is_animal"),
        Rule::new(&["is_wolf"], "is_animal"),
        Rule::new(&["is_canine", "is_animal"], "is_dog"),
    ])
}

fn graph() -> ConceptGraph {
    let mut g = ConceptGraph::new();
    g.add_is_a("is_dog", "is_canine");
    g.add_is_a("is_canine", "is_animal");
    g
}

fn engine() -> MeaningEngine {
    let snapshot = KnowledgeSnapshot::new(registry())
        .with_rulebase(rulebase())
        .with_world_model(std::sync::Arc::new(graph()));
    MeaningEngine::new(EngineConfig::default(), snapshot)
}

fn outputs(values: &[f64]) -> Vec<ExtractorOutput> {
    let mut out = ExtractorOutput::new("prop");
    for (id, v) in IDS.iter().zip(values) {
        out = out.with(id, *v);
    }
    vec![out]
}

/// Several strictly positive vectors of one shared length, plus positive weights.
fn library_and_weights() -> impl Strategy<Value = (Vec<Vec<f64>>, Vec<f64>)> {
    (2usize..8).prop_flat_map(|len| {
        (
            prop::collection::vec(prop::collection::vec(0.1f64..10.0, len), 2..6),
            prop::collection::vec(0.2f64..5.0, len),
        )
    })
}

/// No two vectors are (nearly) proportional, so no two normalise to the same histogram.
fn pairwise_distinct(vectors: &[Vec<f64>]) -> bool {
    let normalised: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| {
            let total: f64 = v.iter().sum();
            v.iter().map(|x| x / total).collect()
        })
        .collect();
    normalised.iter().enumerate().all(|(i, a)| {
        normalised[i + 1..].iter().all(|b| {
            a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max) > 1e-2
        })
    })
}

proptest! {
    #[test]
    fn reasoning_is_deterministic(values in prop::collection::vec(0.0f64..=1.0, 5)) {
        let engine = engine();
        let first = engine.reason_vector(&outputs(&values));
        let second = engine.reason_vector(&outputs(&values));
        prop_assert_eq!(first.vector.values(), second.vector.values());
        prop_assert_eq!(&first.context, &second.context);
        prop_assert_eq!(&first.trace, &second.trace);
    }

    #[test]
    fn fixed_point_is_stable(values in prop::collection::vec(0.0f64..=1.0, 5)) {
        let reasoner = SymbolicReasoner::default();
        let vector = meaning_core::FeatureVector::from_values(values);
        let outcome = reasoner.reason(&vector, &registry(), &rulebase(), &graph());
        prop_assert!(!outcome.limit_exceeded);
        let again = reasoner.reason_context(outcome.context.clone(), &rulebase(), &graph());
        prop_assert!(again.trace.is_empty());
        prop_assert_eq!(again.context, outcome.context);
    }

    #[test]
    fn non_zero_inputs_are_never_changed(values in prop::collection::vec(0.0f64..=1.0, 5)) {
        let reasoned = engine().reason_vector(&outputs(&values));
        for (i, raw) in values.iter().enumerate() {
            let after = reasoned.vector.values()[i];
            if *raw != 0.0 {
                prop_assert_eq!(after, *raw);
            } else {
                prop_assert!(after == 0.0 || after == 1.0);
            }
        }
    }

    #[test]
    fn logic_is_total(a in any::<Option<bool>>(), b in any::<Option<bool>>(), c in any::<Option<bool>>()) {
        let expr = LogicalExpression::parse("(a AND NOT b) OR c").unwrap();
        let mut ctx = Context::new();
        for (name, value) in [("a", a), ("b", b), ("c", c)] {
            if let Some(v) = value {
                ctx.insert(name.to_string(), v);
            }
        }
        let (a, b, c) = (a.unwrap_or(false), b.unwrap_or(false), c.unwrap_or(false));
        prop_assert_eq!(expr.evaluate(&ctx), (a && !b) || c);
    }

    #[test]
    fn every_library_member_matches_itself((library, weights) in library_and_weights()) {
        prop_assume!(pairwise_distinct(&library));
        let weighted: Vec<Vec<f64>> = library
            .iter()
            .map(|v| v.iter().zip(&weights).map(|(x, w)| x * w).collect())
            .collect();
        prop_assume!(pairwise_distinct(&weighted));

        let entries: Vec<LibraryEntry> = library
            .iter()
            .enumerate()
            .map(|(i, v)| LibraryEntry::new(&format!("v{}", i), v.clone()))
            .collect();
        for metric in Metric::ALL {
            let plain = SimilarityMatcher::new(metric);
            let scaled = SimilarityMatcher::new(metric).with_weights(weights.clone());
            for (i, v) in library.iter().enumerate() {
                for matcher in [&plain, &scaled] {
                    let (id, score) = matcher.find_best_match(v, &entries).unwrap();
                    prop_assert_eq!(id, format!("v{}", i), "{} picked the wrong entry", metric);
                    prop_assert!((score - 1.0).abs() < 1e-6, "{} scored {}", metric, score);
                }
            }
        }
    }
}

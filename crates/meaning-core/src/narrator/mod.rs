//! Narrator boundary: turn a match into free text.
//!
//! The engine always builds a mechanical justification first and hands it to the narrator
//! as the hint. If the narrator fails, that mechanical text is used instead.

#[cfg(feature = "openrouter")]
pub mod openrouter;

#[cfg(feature = "openrouter")]
pub use openrouter::OpenRouterNarrator;

use crate::error::MeaningResult;
use crate::reasoning::TraceEntry;
use crate::registry::Registry;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// What the narrator is asked to explain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrationRequest {
    pub vector_a: Vec<f64>,
    pub vector_b: Vec<f64>,
    pub score: f64,
    pub hint: String,
}

#[async_trait]
pub trait Narrator: Send + Sync {
    fn name(&self) -> &str;

    async fn narrate(&self, request: &NarrationRequest) -> MeaningResult<String>;
}

/// Deterministic narrator: restates the hint with the score.
#[derive(Debug, Clone, Copy, Default)]
pub struct MechanicalNarrator;

#[async_trait]
impl Narrator for MechanicalNarrator {
    fn name(&self) -> &str {
        "mechanical"
    }

    async fn narrate(&self, request: &NarrationRequest) -> MeaningResult<String> {
        Ok(format!("Match score {:.3}. {}", request.score, request.hint))
    }
}

/// Justification built from the reasoning trace and extractor provenance.
pub fn mechanical_justification(
    best_id: &str,
    score: f64,
    metric: &str,
    trace: &[TraceEntry],
    provenance: &BTreeMap<String, String>,
) -> String {
    let mut text = format!(
        "Best match '{}' under {} similarity (score {:.3}).",
        best_id, metric, score
    );
    if !provenance.is_empty() {
        let observed: Vec<String> = provenance
            .iter()
            .map(|(dim, engine)| format!("{} ({})", dim, engine))
            .collect();
        text.push_str(&format!(" Observed: {}.", observed.join(", ")));
    }
    if !trace.is_empty() {
        let inferred: Vec<String> = trace
            .iter()
            .map(|t| format!("{} via {}", t.fact, t.source))
            .collect();
        text.push_str(&format!(" Inferred: {}.", inferred.join(", ")));
    }
    text
}

/// Which active dimensions the query shares with the match and which differ.
/// Slots missing from `matched` read as 0.0.
pub fn growth_summary(registry: &Registry, query: &[f64], matched: &[f64], threshold: f64) -> String {
    let mut shared = Vec::new();
    let mut only_query = Vec::new();
    let mut only_match = Vec::new();
    for (i, (dim, q)) in registry.iter().zip(query).enumerate() {
        let m = matched.get(i).copied().unwrap_or(0.0);
        match (*q > threshold, m > threshold) {
            (true, true) => shared.push(dim.display_name.as_str()),
            (true, false) => only_query.push(dim.display_name.as_str()),
            (false, true) => only_match.push(dim.display_name.as_str()),
            (false, false) => {}
        }
    }
    let list = |v: &[&str]| if v.is_empty() { "none".to_string() } else { v.join(", ") };
    format!(
        "Shared: {}. Only in query: {}. Only in match: {}.",
        list(&shared),
        list(&only_query),
        list(&only_match)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DimensionDef;

    #[tokio::test]
    async fn mechanical_narrator_is_deterministic() {
        let req = NarrationRequest {
            vector_a: vec![1.0],
            vector_b: vec![1.0],
            score: 0.98765,
            hint: "because".to_string(),
        };
        let a = MechanicalNarrator.narrate(&req).await.unwrap();
        assert_eq!(a, "Match score 0.988. because");
        assert_eq!(a, MechanicalNarrator.narrate(&req).await.unwrap());
    }

    #[test]
    fn justification_lists_sources() {
        let trace = vec![TraceEntry {
            pass: 1,
            source: "rule:is_dog->is_animal".to_string(),
            fact: "is_animal".to_string(),
        }];
        let provenance = BTreeMap::from([("is_dog".to_string(), "resnet".to_string())]);
        let text = mechanical_justification("A", 1.0, "cosine", &trace, &provenance);
        assert_eq!(
            text,
            "Best match 'A' under cosine similarity (score 1.000). Observed: is_dog (resnet). \
             Inferred: is_animal via rule:is_dog->is_animal."
        );
    }

    #[test]
    fn growth_summary_partitions_dimensions() {
        let reg = Registry::from_dimensions(vec![
            DimensionDef::new("a"),
            DimensionDef::new("b"),
            DimensionDef::new("c"),
        ])
        .unwrap();
        let text = growth_summary(&reg, &[1.0, 1.0, 0.0], &[1.0, 0.0, 0.0], 0.5);
        assert_eq!(text, "Shared: a. Only in query: b. Only in match: none.");
    }

    #[test]
    fn growth_summary_without_a_match_lists_the_query() {
        let reg = Registry::from_dimensions(vec![DimensionDef::new("a"), DimensionDef::new("b")]).unwrap();
        let text = growth_summary(&reg, &[1.0, 0.9], &[], 0.5);
        assert_eq!(text, "Shared: none. Only in query: a, b. Only in match: none.");
    }
}

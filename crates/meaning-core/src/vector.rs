//! FeatureVector and the builder that merges extractor outputs into registry order.

use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Index;
use tracing::warn;

/// Ordered values, one per registry dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub(crate) fn set(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    /// Raise a slot to 1.0 only when it currently holds exactly 0.0. Returns true if it changed.
    ///
    /// Inferred facts add evidence; they never overwrite a numeric observation.
    pub(crate) fn assert_additive(&mut self, index: usize) -> bool {
        match self.0.get_mut(index) {
            Some(slot) if *slot == 0.0 => {
                *slot = 1.0;
                true
            }
            _ => false,
        }
    }

    /// Partial vector for one layer, in registry order.
    pub fn layer_slice(&self, registry: &Registry, layer: &str) -> Vec<f64> {
        registry
            .indices_for_layer(layer)
            .into_iter()
            .filter_map(|i| self.get(i))
            .collect()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Index<usize> for FeatureVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// Raw output of one external feature extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractorOutput {
    /// Engine name recorded as provenance.
    pub engine: String,
    pub features: BTreeMap<String, f64>,
}

impl ExtractorOutput {
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            features: BTreeMap::new(),
        }
    }

    pub fn with(mut self, id: &str, value: f64) -> Self {
        self.features.insert(id.to_string(), value);
        self
    }
}

/// A contribution the builder refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedFeature {
    pub engine: String,
    pub dimension_id: String,
    pub reason: String,
}

/// Builder output: the vector plus where each value came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltVector {
    pub vector: FeatureVector,
    /// dimension id -> engine that wrote the final value
    pub provenance: BTreeMap<String, String>,
    pub dropped: Vec<DroppedFeature>,
}

/// Merge extractor maps into one vector keyed by registry order.
///
/// Unknown ids and non-finite values are dropped with a warning; missing ids stay 0.0.
/// When two engines write the same id the later one in the list wins. A value for an id
/// that occupies several registry slots is written to all of them.
pub fn build(registry: &Registry, outputs: &[ExtractorOutput]) -> BuiltVector {
    let mut vector = FeatureVector::zeros(registry.len());
    let mut provenance = BTreeMap::new();
    let mut dropped = Vec::new();

    for output in outputs {
        for (id, &value) in &output.features {
            let slots = registry.indices_of(id);
            let reason = if slots.is_empty() {
                Some("unknown dimension id")
            } else if !value.is_finite() {
                Some("non-finite value")
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!(
                    target: "meaning::builder",
                    engine = %output.engine,
                    dimension = %id,
                    reason,
                    "Dropping feature"
                );
                dropped.push(DroppedFeature {
                    engine: output.engine.clone(),
                    dimension_id: id.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }
            for slot in slots {
                vector.set(slot, value);
            }
            provenance.insert(id.clone(), output.engine.clone());
        }
    }

    BuiltVector {
        vector,
        provenance,
        dropped,
    }
}

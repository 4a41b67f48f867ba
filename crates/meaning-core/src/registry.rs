//! DimensionRegistry: the ordered catalogue of named semantic dimensions.
//!
//! Iteration order is the vector index order for the whole system. It follows file-list
//! order and then in-file order, and is never reshuffled. Duplicate ids across files are
//! kept as separate slots; lookups by id resolve to the first slot.

use crate::error::{MeaningError, MeaningResult};
use crate::files;
use crate::reasoning::logic::LogicalExpression;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_LAYER: &str = "general";

fn default_weight() -> f64 {
    1.0
}

/// One dimension as written in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub logical_rule: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl DimensionDef {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            layer: None,
            logical_rule: None,
            weight: 1.0,
        }
    }

    pub fn with_layer(mut self, layer: &str) -> Self {
        self.layer = Some(layer.to_string());
        self
    }

    pub fn with_rule(mut self, rule: &str) -> Self {
        self.logical_rule = Some(rule.to_string());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// A definition file holds either a bare list or `{ "dimensions": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DimensionFile {
    List(Vec<DimensionDef>),
    Wrapped { dimensions: Vec<DimensionDef> },
}

impl DimensionFile {
    fn into_defs(self) -> Vec<DimensionDef> {
        match self {
            DimensionFile::List(d) | DimensionFile::Wrapped { dimensions: d } => d,
        }
    }
}

/// A loaded, immutable dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    pub id: String,
    pub display_name: String,
    pub layer: String,
    pub logical_rule: Option<String>,
    pub weight: f64,
}

/// Ordered dimension catalogue with rules compiled at load time.
#[derive(Debug, Clone)]
pub struct Registry {
    dimensions: Vec<Dimension>,
    rules: Vec<Option<LogicalExpression>>,
    warnings: Vec<MeaningError>,
}

impl Registry {
    /// Load and concatenate definition files in the given order.
    ///
    /// An unreadable or malformed file is logged and skipped. Zero resulting dimensions
    /// is a hard `Config` error.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> MeaningResult<Self> {
        let mut defs = Vec::new();
        let mut warnings = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match files::read_definition::<DimensionFile>(path) {
                Ok(file) => {
                    let loaded = file.into_defs();
                    info!(
                        target: "meaning::registry",
                        path = %path.display(),
                        count = loaded.len(),
                        "Loaded dimension file"
                    );
                    defs.extend(loaded);
                }
                Err(e) => {
                    warn!(target: "meaning::registry", path = %path.display(), error = %e, "Skipping dimension file");
                    warnings.push(e);
                }
            }
        }
        let mut registry = Self::from_dimensions(defs)?;
        warnings.append(&mut registry.warnings);
        registry.warnings = warnings;
        Ok(registry)
    }

    /// Build a registry from in-memory definitions (same validation as file loading).
    pub fn from_dimensions(defs: Vec<DimensionDef>) -> MeaningResult<Self> {
        let mut dimensions = Vec::with_capacity(defs.len());
        let mut rules = Vec::with_capacity(defs.len());
        let mut warnings = Vec::new();

        for def in defs {
            let id = def.id.trim().to_string();
            if id.is_empty() {
                let e = MeaningError::Config("dimension with empty id".to_string());
                warn!(target: "meaning::registry", "Skipping dimension with empty id");
                warnings.push(e);
                continue;
            }
            let rule_src = def
                .logical_rule
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty());
            let compiled = match rule_src.as_deref().map(LogicalExpression::parse) {
                Some(Ok(expr)) => Some(expr),
                Some(Err(e)) => {
                    warn!(
                        target: "meaning::registry",
                        dimension = %id,
                        error = %e,
                        "Logical rule failed to parse; treating as always-false"
                    );
                    warnings.push(e);
                    None
                }
                None => None,
            };
            let weight = if def.weight.is_finite() { def.weight } else { 1.0 };
            dimensions.push(Dimension {
                display_name: def.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| id.clone()),
                layer: def
                    .layer
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_LAYER.to_string()),
                logical_rule: rule_src,
                weight,
                id,
            });
            rules.push(compiled);
        }

        if dimensions.is_empty() {
            return Err(MeaningError::Config(
                "registry is empty: no usable dimensions were loaded".to_string(),
            ));
        }

        Ok(Self {
            dimensions,
            rules,
            warnings,
        })
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// First dimension carrying this id.
    pub fn get_by_id(&self, id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    /// Index of the first dimension carrying this id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.id == id)
    }

    /// Every slot carrying this id (more than one only when files repeat an id).
    pub fn indices_of(&self, id: &str) -> Vec<usize> {
        self.dimensions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.id == id)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn indices_for_layer(&self, layer: &str) -> Vec<usize> {
        self.dimensions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.layer == layer)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.id.as_str()).collect()
    }

    /// Distinct layers in first-seen order.
    pub fn layers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for d in &self.dimensions {
            if !out.contains(&d.layer.as_str()) {
                out.push(&d.layer);
            }
        }
        out
    }

    /// Compiled rule for a slot; `None` when absent or when it failed to parse.
    pub fn compiled_rule(&self, index: usize) -> Option<&LogicalExpression> {
        self.rules.get(index).and_then(|r| r.as_ref())
    }

    /// Per-slot weights, clamped at zero.
    pub fn weights(&self) -> Vec<f64> {
        self.dimensions.iter().map(|d| d.weight.max(0.0)).collect()
    }

    /// Files skipped and rules rejected while loading.
    pub fn load_warnings(&self) -> &[MeaningError] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn loads_json_and_yaml_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "color.json",
            r#"[{"id": "is_red", "layer": "color"}, {"id": "is_blue", "layer": "color", "weight": 0.5}]"#,
        );
        let b = write(
            dir.path(),
            "shape.yaml",
            "dimensions:\n  - id: is_round\n    name: Round\n    layer: shape\n",
        );
        let reg = Registry::load(&[a, b]).unwrap();
        assert_eq!(reg.ids(), vec!["is_red", "is_blue", "is_round"]);
        assert_eq!(reg.index_of("is_round"), Some(2));
        assert_eq!(reg.get_by_id("is_round").unwrap().display_name, "Round");
        assert_eq!(reg.get_by_id("is_red").unwrap().display_name, "is_red");
        assert_eq!(reg.indices_for_layer("color"), vec![0, 1]);
        assert_eq!(reg.layers(), vec!["color", "shape"]);
        assert_eq!(reg.weights(), vec![1.0, 0.5, 1.0]);
    }

    #[test]
    fn skips_bad_file_but_keeps_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(dir.path(), "good.json", r#"[{"id": "is_dog"}]"#);
        let bad = write(dir.path(), "bad.json", "{ not json");
        let missing = dir.path().join("missing.json");
        let reg = Registry::load(&[bad, good, missing]).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.load_warnings().len(), 2);
        assert!(reg
            .load_warnings()
            .iter()
            .all(|w| matches!(w, MeaningError::Config(_))));
    }

    #[test]
    fn zero_dimensions_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write(dir.path(), "empty.json", "[]");
        let err = Registry::load(&[empty]).unwrap_err();
        assert!(matches!(err, MeaningError::Config(_)));
        assert!(Registry::from_dimensions(Vec::new()).is_err());
    }

    #[test]
    fn duplicate_ids_across_files_are_not_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.json", r#"[{"id": "is_cat", "layer": "animal"}]"#);
        let b = write(dir.path(), "b.json", r#"[{"id": "is_cat", "layer": "pet"}]"#);
        let reg = Registry::load(&[a, b]).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.index_of("is_cat"), Some(0));
        assert_eq!(reg.get_by_id("is_cat").unwrap().layer, "animal");
        assert_eq!(reg.indices_of("is_cat"), vec![0, 1]);
    }

    #[test]
    fn malformed_rule_is_recorded_and_treated_as_absent() {
        let reg = Registry::from_dimensions(vec![
            DimensionDef::new("a"),
            DimensionDef::new("b").with_rule("(a AND"),
            DimensionDef::new("c").with_rule("(a OR b)"),
        ])
        .unwrap();
        assert!(reg.compiled_rule(1).is_none());
        assert!(reg.compiled_rule(2).is_some());
        assert_eq!(reg.get_by_id("b").unwrap().logical_rule.as_deref(), Some("(a AND"));
        assert!(matches!(reg.load_warnings()[0], MeaningError::Parse { .. }));
    }

    #[test]
    fn missing_layer_defaults() {
        let reg = Registry::from_dimensions(vec![DimensionDef::new("x")]).unwrap();
        assert_eq!(reg.get_by_id("x").unwrap().layer, DEFAULT_LAYER);
        assert!(reg.get_by_id("y").is_none());
        assert!(reg.index_of("y").is_none());
    }
}

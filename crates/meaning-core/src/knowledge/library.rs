//! Library of previously processed meaning vectors.

use crate::error::MeaningResult;
use crate::files;
use crate::vector::FeatureVector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub meaning_vector: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

impl LibraryEntry {
    pub fn new(id: &str, meaning_vector: Vec<f64>) -> Self {
        Self {
            id: id.to_string(),
            meaning_vector,
            layer: None,
        }
    }

    pub fn from_vector(id: &str, vector: &FeatureVector) -> Self {
        Self::new(id, vector.values().to_vec())
    }
}

/// Stored vectors in file order. Shape is checked at comparison time, not here.
#[derive(Debug, Clone, Default)]
pub struct VectorLibrary {
    entries: Vec<LibraryEntry>,
}

impl VectorLibrary {
    pub fn new(entries: Vec<LibraryEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> MeaningResult<Self> {
        let entries: Vec<LibraryEntry> = files::read_definition(path)?;
        info!(target: "meaning::matcher", path = %path.display(), entries = entries.len(), "Loaded vector library");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&LibraryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

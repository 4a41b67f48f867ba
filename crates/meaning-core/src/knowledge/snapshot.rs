//! Immutable knowledge snapshot, swapped atomically between requests.
//!
//! A request takes one `Arc<KnowledgeSnapshot>` at its start and uses it to the end;
//! `publish` replaces the reference for later requests only.

use crate::error::MeaningResult;
use crate::files;
use crate::knowledge::library::VectorLibrary;
use crate::knowledge::rulebase::Rulebase;
use crate::knowledge::world_model::{ConceptGraph, WorldModel};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Confidential keywords for the publication gatekeeper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionProfile {
    #[serde(default)]
    pub confidential_keywords: Vec<String>,
}

impl MissionProfile {
    /// `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> MeaningResult<Option<Self>> {
        if !path.exists() {
            info!(target: "meaning::engine", path = %path.display(), "No mission profile; gatekeeper passes through");
            return Ok(None);
        }
        files::read_definition(path).map(Some)
    }
}

pub struct KnowledgeSnapshot {
    pub registry: Registry,
    pub rulebase: Rulebase,
    pub world_model: Arc<dyn WorldModel>,
    pub library: VectorLibrary,
    pub mission_profile: Option<MissionProfile>,
}

impl KnowledgeSnapshot {
    /// Registry only; empty rulebase, world model and library.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            rulebase: Rulebase::empty(),
            world_model: Arc::new(ConceptGraph::new()),
            library: VectorLibrary::default(),
            mission_profile: None,
        }
    }

    pub fn with_rulebase(mut self, rulebase: Rulebase) -> Self {
        self.rulebase = rulebase;
        self
    }

    pub fn with_world_model(mut self, world_model: Arc<dyn WorldModel>) -> Self {
        self.world_model = world_model;
        self
    }

    pub fn with_library(mut self, library: VectorLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn with_mission_profile(mut self, profile: Option<MissionProfile>) -> Self {
        self.mission_profile = profile;
        self
    }
}

impl std::fmt::Debug for KnowledgeSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeSnapshot")
            .field("dimensions", &self.registry.len())
            .field("rules", &self.rulebase.len())
            .field("library", &self.library.len())
            .field("mission_profile", &self.mission_profile.is_some())
            .finish()
    }
}

/// Shared holder for the current snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<KnowledgeSnapshot>>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: KnowledgeSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub fn current(&self) -> Arc<KnowledgeSnapshot> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the snapshot for subsequent requests. Returns the previous one.
    pub fn publish(&self, snapshot: KnowledgeSnapshot) -> Arc<KnowledgeSnapshot> {
        let next = Arc::new(snapshot);
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        info!(target: "meaning::engine", dimensions = next.registry.len(), "Publishing knowledge snapshot");
        std::mem::replace(&mut *guard, next)
    }
}

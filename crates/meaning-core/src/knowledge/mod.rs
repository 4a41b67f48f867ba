//! Read-only knowledge: world model, rulebase, vector library and the snapshot that bundles them.

pub mod library;
pub mod rulebase;
pub mod snapshot;
pub mod world_model;

pub use library::{LibraryEntry, VectorLibrary};
pub use rulebase::{Rule, Rulebase, Trigger};
pub use snapshot::{KnowledgeSnapshot, MissionProfile, SnapshotHandle};
pub use world_model::{ConceptEdge, ConceptGraph, ConceptNode, WorldModel, IS_A};

//! meaning-core: semantic matching and symbolic reasoning engine.
//!
//! Turns extractor feature maps into a registry-ordered meaning vector, adds facts by
//! forward chaining and per-dimension logical rules, finds the closest vector in a stored
//! library and wraps the result in a fixed narrative filter chain.

mod config;
mod engine;
mod error;
mod files;
mod handlers;
mod registry;
mod security;
mod vector;
pub mod knowledge;
pub mod matcher;
pub mod narrative;
pub mod narrator;
pub mod reasoning;

// Errors
pub use error::{MeaningError, MeaningResult};

// Configuration
pub use config::{EngineConfig, NarratorKind, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};

// Data model
pub use registry::{Dimension, DimensionDef, Registry, DEFAULT_LAYER};
pub use vector::{build as build_vector, BuiltVector, DroppedFeature, ExtractorOutput, FeatureVector};

// Knowledge
pub use knowledge::{
    ConceptGraph, KnowledgeSnapshot, LibraryEntry, MissionProfile, Rule, Rulebase, SnapshotHandle,
    VectorLibrary, WorldModel,
};

// Reasoning + logic
pub use reasoning::{
    apply_dimension_rules, Context, LogicalExpression, ReasoningOutcome, SymbolicReasoner,
    TraceEntry,
};

// Matching
pub use matcher::{find_best_match, rank, Metric, Ranking, ScoredMatch, SimilarityMatcher};

// Narrative
pub use narrative::{
    NarrativeHistory, NarrativePipeline, NarrativeRecord, NarrativeStage, NarrativeState,
    PipelineResult, PipelineSettings, PipelineStatus, RequestContext, StageOutcome,
};
pub use narrator::{MechanicalNarrator, NarrationRequest, Narrator};
#[cfg(feature = "openrouter")]
pub use narrator::OpenRouterNarrator;

// Security
pub use security::{KeywordRedactor, DEFAULT_REDACTION_MARKER};

// Handlers (capability registry)
pub use handlers::{Handler, HandlerRegistry, ProcessHandler};

// Engine
pub use engine::{
    load_features, load_snapshot, AnalysisReport, AnalysisRequest, AnalysisStatus, MatchResult,
    MeaningEngine, ReasonedVector,
};

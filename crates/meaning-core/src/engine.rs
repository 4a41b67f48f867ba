//! MeaningEngine: build → reason → evaluate → match → narrate for one request.
//!
//! `analyze` never returns an error. Every recoverable condition ends up in the report's
//! `warnings` and, where a stage produced it, in the audit log.

use crate::config::{EngineConfig, NarratorKind};
use crate::error::{MeaningError, MeaningResult};
use crate::knowledge::{ConceptGraph, KnowledgeSnapshot, MissionProfile, Rulebase, SnapshotHandle, VectorLibrary};
use crate::matcher::{Metric, SimilarityMatcher};
use crate::narrative::{
    InMemoryHistory, NarrativeHistory, NarrativePipeline, NarrativeRecord, NarrativeState,
    PipelineSettings, RequestContext, SledHistory,
};
use crate::narrator::{growth_summary, mechanical_justification, MechanicalNarrator, NarrationRequest, Narrator};
use crate::reasoning::{apply_dimension_rules, Context, SymbolicReasoner, TraceEntry};
use crate::registry::Registry;
use crate::vector::{self, DroppedFeature, ExtractorOutput, FeatureVector};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One analysis: extractor outputs plus an optional metric override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub features: Vec<ExtractorOutput>,
    #[serde(default)]
    pub metric: Option<Metric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Matched,
    NoMatch,
    Blocked,
}

/// Output of build → reason → evaluate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonedVector {
    /// Builder output before any inference.
    pub raw: FeatureVector,
    pub vector: FeatureVector,
    pub provenance: BTreeMap<String, String>,
    pub dropped: Vec<DroppedFeature>,
    pub context: Context,
    pub trace: Vec<TraceEntry>,
    pub passes: usize,
    #[serde(skip)]
    pub warnings: Vec<MeaningError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub best_id: String,
    pub score: f64,
    pub metric_used: Metric,
    pub vector: FeatureVector,
    pub reasoning_trace: Vec<TraceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub status: AnalysisStatus,
    pub best_id: Option<String>,
    pub score: f64,
    pub metric_used: Metric,
    pub vector: FeatureVector,
    pub reasoning_trace: Vec<TraceEntry>,
    pub intent_text: String,
    pub growth_text: String,
    pub audit_log: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct MeaningEngine {
    config: EngineConfig,
    snapshot: SnapshotHandle,
    reasoner: SymbolicReasoner,
    settings: PipelineSettings,
    narrator: Arc<dyn Narrator>,
    history: Arc<dyn NarrativeHistory>,
    load_warnings: Vec<MeaningError>,
}

fn recover<T>(result: MeaningResult<T>, fallback: T, what: &str, warnings: &mut Vec<MeaningError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "meaning::engine", what, error = %e, "Definition file skipped");
            warnings.push(e);
            fallback
        }
    }
}

/// Load every configured knowledge file. Only an unusable registry is fatal.
pub fn load_snapshot(config: &EngineConfig) -> MeaningResult<(KnowledgeSnapshot, Vec<MeaningError>)> {
    let registry = Registry::load(&config.dimension_paths)?;
    let mut warnings: Vec<MeaningError> = registry.load_warnings().to_vec();

    let rulebase = match &config.rulebase_path {
        Some(p) => recover(Rulebase::load(p), Rulebase::empty(), "rulebase", &mut warnings),
        None => Rulebase::empty(),
    };
    warnings.extend(rulebase.load_warnings().iter().cloned());

    let world_model = match &config.world_model_path {
        Some(p) => recover(ConceptGraph::load(p), ConceptGraph::new(), "world_model", &mut warnings),
        None => ConceptGraph::new(),
    };
    let library = match &config.library_path {
        Some(p) => recover(VectorLibrary::load(p), VectorLibrary::default(), "library", &mut warnings),
        None => VectorLibrary::default(),
    };
    let mission_profile = match &config.mission_profile_path {
        Some(p) => recover(MissionProfile::load(p), None, "mission_profile", &mut warnings),
        None => None,
    };

    let snapshot = KnowledgeSnapshot::new(registry)
        .with_rulebase(rulebase)
        .with_world_model(Arc::new(world_model))
        .with_library(library)
        .with_mission_profile(mission_profile);
    Ok((snapshot, warnings))
}

fn narrator_for(config: &EngineConfig) -> Arc<dyn Narrator> {
    match config.narrator {
        NarratorKind::Mechanical => Arc::new(MechanicalNarrator),
        #[cfg(feature = "openrouter")]
        NarratorKind::Openrouter => match crate::narrator::OpenRouterNarrator::from_env() {
            Some(n) => match &config.narrator_model {
                Some(model) => Arc::new(n.with_model(model)),
                None => Arc::new(n),
            },
            None => {
                warn!(target: "meaning::narrator", "OPENROUTER_API_KEY not set; using mechanical narrator");
                Arc::new(MechanicalNarrator)
            }
        },
        #[cfg(not(feature = "openrouter"))]
        NarratorKind::Openrouter => {
            warn!(target: "meaning::narrator", "Built without the openrouter feature; using mechanical narrator");
            Arc::new(MechanicalNarrator)
        }
    }
}

impl MeaningEngine {
    /// Engine over an already loaded snapshot, with the mechanical narrator and in-memory history.
    pub fn new(config: EngineConfig, snapshot: KnowledgeSnapshot) -> Self {
        let reasoner = SymbolicReasoner::new(config.activation_threshold, config.max_reasoning_passes)
            .with_min_rule_confidence(config.min_rule_confidence);
        let settings = config.pipeline_settings();
        Self {
            reasoner,
            settings,
            snapshot: SnapshotHandle::new(snapshot),
            narrator: Arc::new(MechanicalNarrator),
            history: Arc::new(InMemoryHistory::new(config.effective_history_capacity())),
            load_warnings: Vec::new(),
            config,
        }
    }

    pub fn from_config(config: &EngineConfig) -> MeaningResult<Self> {
        let (snapshot, load_warnings) = load_snapshot(config)?;
        let history: Arc<dyn NarrativeHistory> = match &config.history_path {
            Some(p) => Arc::new(SledHistory::open(p)?.with_capacity(config.effective_history_capacity())),
            None => Arc::new(InMemoryHistory::new(config.effective_history_capacity())),
        };
        let mut engine = Self::new(config.clone(), snapshot)
            .with_narrator(narrator_for(config))
            .with_history(history);
        engine.load_warnings = load_warnings;
        info!(
            target: "meaning::engine",
            dimensions = engine.snapshot.current().registry.len(),
            warnings = engine.load_warnings.len(),
            narrator = engine.narrator.name(),
            "Meaning engine ready"
        );
        Ok(engine)
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>) -> Self {
        self.narrator = narrator;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn NarrativeHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &SnapshotHandle {
        &self.snapshot
    }

    pub fn load_warnings(&self) -> &[MeaningError] {
        &self.load_warnings
    }

    /// Reload every knowledge file and publish the result; in-flight requests are unaffected.
    pub fn reload(&mut self) -> MeaningResult<()> {
        let (snapshot, warnings) = load_snapshot(&self.config)?;
        self.snapshot.publish(snapshot);
        self.load_warnings = warnings;
        Ok(())
    }

    /// build → reason → evaluate against the current snapshot. Pure and deterministic.
    pub fn reason_vector(&self, raw: &[ExtractorOutput]) -> ReasonedVector {
        self.reason_with(&self.snapshot.current(), raw)
    }

    fn reason_with(&self, snapshot: &KnowledgeSnapshot, raw: &[ExtractorOutput]) -> ReasonedVector {
        let registry = &snapshot.registry;
        let built = vector::build(registry, raw);
        let mut vector = built.vector.clone();

        let outcome = self.reasoner.reason(
            &vector,
            registry,
            &snapshot.rulebase,
            snapshot.world_model.as_ref(),
        );
        outcome.apply_to_vector(registry, &mut vector);

        let mut context = outcome.context.clone();
        let logic_trace = apply_dimension_rules(registry, &mut context, &mut vector, outcome.passes + 1);

        let mut trace = outcome.trace.clone();
        trace.extend(logic_trace);

        ReasonedVector {
            raw: built.vector,
            vector,
            provenance: built.provenance,
            dropped: built.dropped,
            context,
            trace,
            passes: outcome.passes,
            warnings: outcome.warning().into_iter().collect(),
        }
    }

    fn layer_activity(&self, registry: &Registry, vector: &FeatureVector) -> BTreeMap<String, usize> {
        let threshold = self.reasoner.activation_threshold();
        let mut activity: BTreeMap<String, usize> =
            registry.layers().into_iter().map(|l| (l.to_string(), 0)).collect();
        for (dim, value) in registry.iter().zip(vector.values()) {
            if *value > threshold {
                *activity.entry(dim.layer.clone()).or_default() += 1;
            }
        }
        activity
    }

    /// Run all five stages. Always returns a report.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisReport {
        let snapshot = self.snapshot.current();
        let registry = &snapshot.registry;
        let reasoned = self.reason_with(&snapshot, &request.features);

        let mut warnings: Vec<String> = reasoned
            .dropped
            .iter()
            .map(|d| format!("dropped {} from {}: {}", d.dimension_id, d.engine, d.reason))
            .collect();
        warnings.extend(reasoned.warnings.iter().map(|e| e.to_string()));

        let metric = request.metric.unwrap_or(self.config.metric);
        let mut matcher = SimilarityMatcher::new(metric).with_parallel_threshold(self.config.parallel_threshold);
        if self.config.apply_weights {
            matcher = matcher.with_weights(registry.weights());
        }
        let entries = snapshot.library.entries();
        let ranking = matcher.rank(reasoned.vector.values(), entries, 1);
        warnings.extend(ranking.warnings.iter().map(|e| e.to_string()));

        let mut audit_log = Vec::new();
        let (best_id, score, state) = match ranking.best() {
            Ok(best) => {
                let matched = &entries[best.index].meaning_vector;
                let hint = mechanical_justification(
                    &best.id,
                    best.score,
                    metric.as_str(),
                    &reasoned.trace,
                    &reasoned.provenance,
                );
                let narration = NarrationRequest {
                    vector_a: reasoned.vector.values().to_vec(),
                    vector_b: matched.clone(),
                    score: best.score,
                    hint,
                };
                let intent = match self.narrator.narrate(&narration).await {
                    Ok(text) => {
                        audit_log.push(format!("[narrator] {}", self.narrator.name()));
                        text
                    }
                    Err(e) => {
                        warn!(target: "meaning::narrator", narrator = self.narrator.name(), error = %e, "Narrator failed; using mechanical justification");
                        audit_log.push(format!("[narrator] {} failed, mechanical fallback: {}", self.narrator.name(), e));
                        warnings.push(e.to_string());
                        format!("Match score {:.3}. {}", narration.score, narration.hint)
                    }
                };
                let growth = growth_summary(
                    registry,
                    reasoned.vector.values(),
                    matched,
                    self.reasoner.activation_threshold(),
                );
                (Some(best.id.clone()), best.score, NarrativeState::new(intent, growth))
            }
            Err(e) => {
                warn!(target: "meaning::engine", error = %e, "No comparable library entry");
                warnings.push(e.to_string());
                audit_log.push("[matcher] no comparable library entry".to_string());
                let growth = growth_summary(
                    registry,
                    reasoned.vector.values(),
                    &[],
                    self.reasoner.activation_threshold(),
                );
                (None, 0.0, NarrativeState::new("No match: the library holds no comparable vector.", growth))
            }
        };
        let mut state = state;
        state.audit_log = audit_log;

        let history = match self.recent_history().await {
            Ok(records) => records,
            Err(e) => {
                warn!(target: "meaning::history", error = %e, "History unavailable");
                warnings.push(e.to_string());
                Vec::new()
            }
        };
        let ctx = RequestContext {
            best_id: best_id.clone(),
            score,
            metric,
            provenance: reasoned.provenance.clone(),
            trace: reasoned.trace.clone(),
            layer_activity: self.layer_activity(registry, &reasoned.vector),
            history,
        };

        let pipeline = NarrativePipeline::standard(&self.settings, snapshot.mission_profile.as_ref());
        let result = pipeline.run(state, &ctx);
        warnings.extend(result.warnings.iter().cloned());

        let status = if result.is_blocked() {
            AnalysisStatus::Blocked
        } else if best_id.is_some() {
            AnalysisStatus::Matched
        } else {
            AnalysisStatus::NoMatch
        };

        if status != AnalysisStatus::Blocked {
            let record = NarrativeRecord {
                recorded_at: Utc::now(),
                best_id: best_id.clone(),
                score,
                intent_text: result.state.intent_text.clone(),
                growth_text: result.state.growth_text.clone(),
            };
            if let Err(e) = self.record_history(record).await {
                warn!(target: "meaning::history", error = %e, "Failed to record narrative");
                warnings.push(e.to_string());
            }
        }

        info!(
            target: "meaning::engine",
            status = ?status,
            best_id = best_id.as_deref().unwrap_or("-"),
            score,
            warnings = warnings.len(),
            "Analysis complete"
        );

        AnalysisReport {
            status,
            best_id,
            score,
            metric_used: metric,
            vector: reasoned.vector,
            reasoning_trace: reasoned.trace,
            intent_text: result.state.intent_text,
            growth_text: result.state.growth_text,
            audit_log: result.state.audit_log,
            warnings,
        }
    }

    /// History stores may block on disk, so they run on the blocking pool.
    async fn recent_history(&self) -> MeaningResult<Vec<NarrativeRecord>> {
        let history = Arc::clone(&self.history);
        let window = self.config.history_window;
        tokio::task::spawn_blocking(move || history.recent(window))
            .await
            .map_err(|e| MeaningError::History(format!("history task failed: {}", e)))?
    }

    async fn record_history(&self, record: NarrativeRecord) -> MeaningResult<()> {
        let history = Arc::clone(&self.history);
        tokio::task::spawn_blocking(move || history.record(&record))
            .await
            .map_err(|e| MeaningError::History(format!("history task failed: {}", e)))?
    }

    /// `MatchResult` for a report that matched.
    pub fn match_result(report: &AnalysisReport) -> Option<MatchResult> {
        report.best_id.as_ref().map(|id| MatchResult {
            best_id: id.clone(),
            score: report.score,
            metric_used: report.metric_used,
            vector: report.vector.clone(),
            reasoning_trace: report.reasoning_trace.clone(),
        })
    }
}

/// Load extractor outputs (`[{engine, features}]`) from a JSON or YAML file.
pub fn load_features(path: &Path) -> MeaningResult<Vec<ExtractorOutput>> {
    crate::files::read_definition(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{LibraryEntry, Rule};
    use crate::registry::DimensionDef;

    fn engine() -> MeaningEngine {
        let registry = Registry::from_dimensions(vec![
            DimensionDef::new("is_dog"),
            DimensionDef::new("is_animal"),
        ])
        .unwrap();
        let snapshot = KnowledgeSnapshot::new(registry)
            .with_rulebase(Rulebase::new(vec![Rule::new(&["is_dog"], "is_animal")]))
            .with_library(VectorLibrary::new(vec![
                LibraryEntry::new("dog", vec![1.0, 1.0]),
                LibraryEntry::new("rock", vec![0.0, 0.0]),
            ]));
        MeaningEngine::new(EngineConfig::default(), snapshot)
    }

    #[test]
    fn reason_vector_applies_inference() {
        let out = engine().reason_vector(&[ExtractorOutput::new("resnet").with("is_dog", 0.9)]);
        assert_eq!(out.raw.values(), &[0.9, 0.0]);
        assert_eq!(out.vector.values(), &[0.9, 1.0]);
        assert_eq!(out.trace.len(), 1);
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn analyze_matches_and_records_history() {
        let history = Arc::new(InMemoryHistory::default());
        let engine = engine().with_history(history.clone());
        let report = engine
            .analyze(AnalysisRequest {
                features: vec![ExtractorOutput::new("resnet").with("is_dog", 1.0)],
                metric: None,
            })
            .await;
        assert_eq!(report.status, AnalysisStatus::Matched);
        assert_eq!(report.best_id.as_deref(), Some("dog"));
        assert!((report.score - 1.0).abs() < 1e-9);
        assert!(report.intent_text.contains("Sources:"));
        assert_eq!(history.len(), 1);
        assert!(MeaningEngine::match_result(&report).is_some());
    }

    #[tokio::test]
    async fn empty_library_is_no_match() {
        let registry = Registry::from_dimensions(vec![DimensionDef::new("x")]).unwrap();
        let engine = MeaningEngine::new(EngineConfig::default(), KnowledgeSnapshot::new(registry));
        let report = engine.analyze(AnalysisRequest::default()).await;
        assert_eq!(report.status, AnalysisStatus::NoMatch);
        assert!(report.best_id.is_none());
        assert!(report.warnings.iter().any(|w| w.contains("no comparable")));
        assert_eq!(report.audit_log[0], "[matcher] no comparable library entry");
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AnalysisStatus::NoMatch).unwrap(), "\"no_match\"");
    }
}

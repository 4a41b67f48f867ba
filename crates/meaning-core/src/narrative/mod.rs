//! NarrativePipeline: a fixed, ordered chain of filter/annotator stages wrapped around a match.
//!
//! Stages run in composition order. Only stages that declare themselves blocking may end
//! the chain; on a block both narrative texts are replaced by the redaction marker and no
//! later stage runs. Every stage that runs appends exactly one `[stage_name] ...` line to
//! the audit log.

pub mod history;
pub mod stages;

pub use history::{
    InMemoryHistory, NarrativeHistory, NarrativeRecord, SledHistory, DEFAULT_HISTORY_CAPACITY,
};
pub use stages::{
    AnomalyMonitor, BalanceChecker, EmotionalNuance, EthicsFilter, GrowthTracker,
    IntegrityTracker, PublicationGatekeeper, ToneAdjuster,
};

use crate::knowledge::snapshot::MissionProfile;
use crate::matcher::Metric;
use crate::reasoning::TraceEntry;
use crate::security::DEFAULT_REDACTION_MARKER;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// The two narrative texts plus the audit trail. Both texts are always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeState {
    pub intent_text: String,
    pub growth_text: String,
    pub audit_log: Vec<String>,
}

impl NarrativeState {
    pub fn new(intent_text: impl Into<String>, growth_text: impl Into<String>) -> Self {
        Self {
            intent_text: intent_text.into(),
            growth_text: growth_text.into(),
            audit_log: Vec::new(),
        }
    }

    pub fn combined_len(&self) -> usize {
        self.intent_text.chars().count() + self.growth_text.chars().count()
    }
}

/// Read-only request facts the stages may consult.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub best_id: Option<String>,
    pub score: f64,
    pub metric: Metric,
    /// dimension id -> extractor engine
    pub provenance: BTreeMap<String, String>,
    pub trace: Vec<TraceEntry>,
    /// Every registry layer with its count of active dimensions (zero included).
    pub layer_activity: BTreeMap<String, usize>,
    /// Most recent recorded narratives, newest first.
    pub history: Vec<NarrativeRecord>,
}

/// What one stage decided.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Pass(String),
    /// Advisory finding; the chain continues.
    Warn(String),
    /// Only honoured for blocking stages.
    Block(String),
}

pub trait NarrativeStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_blocking(&self) -> bool {
        false
    }

    fn apply(&self, state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    Passed,
    Blocked { stage: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub state: NarrativeState,
    pub status: PipelineStatus,
    /// Advisory findings, one per warning stage.
    pub warnings: Vec<String>,
}

impl PipelineResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self.status, PipelineStatus::Blocked { .. })
    }
}

/// Thresholds and word lists for the standard stage chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub redaction_marker: String,
    pub ethics_terms: Vec<String>,
    pub novelty_threshold: f64,
    pub balance_dominance: f64,
    pub anomaly_z_threshold: f64,
    pub anomaly_min_samples: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            redaction_marker: DEFAULT_REDACTION_MARKER.to_string(),
            ethics_terms: default_ethics_terms(),
            novelty_threshold: 0.9,
            balance_dominance: 0.7,
            anomaly_z_threshold: 3.0,
            anomaly_min_samples: 5,
        }
    }
}

pub fn default_ethics_terms() -> Vec<String> {
    ["violence", "weapon", "hate", "self-harm", "abuse", "exploit"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub struct NarrativePipeline {
    stages: Vec<Box<dyn NarrativeStage>>,
    redaction_marker: String,
}

impl NarrativePipeline {
    pub fn new(stages: Vec<Box<dyn NarrativeStage>>, redaction_marker: &str) -> Self {
        Self {
            stages,
            redaction_marker: redaction_marker.to_string(),
        }
    }

    /// ethics → gatekeeper → tone → emotional nuance → integrity → balance → growth → anomaly
    pub fn standard(settings: &PipelineSettings, mission: Option<&MissionProfile>) -> Self {
        let stages: Vec<Box<dyn NarrativeStage>> = vec![
            Box::new(EthicsFilter::new(&settings.ethics_terms)),
            Box::new(PublicationGatekeeper::new(mission)),
            Box::new(ToneAdjuster),
            Box::new(EmotionalNuance::default()),
            Box::new(IntegrityTracker),
            Box::new(BalanceChecker::new(settings.balance_dominance)),
            Box::new(GrowthTracker::new(settings.novelty_threshold)),
            Box::new(AnomalyMonitor::new(
                settings.anomaly_z_threshold,
                settings.anomaly_min_samples,
            )),
        ];
        Self::new(stages, &settings.redaction_marker)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn redaction_marker(&self) -> &str {
        &self.redaction_marker
    }

    pub fn run(&self, mut state: NarrativeState, ctx: &RequestContext) -> PipelineResult {
        let mut warnings = Vec::new();

        for stage in &self.stages {
            let name = stage.name();
            match stage.apply(&mut state, ctx) {
                StageOutcome::Pass(note) => {
                    state.audit_log.push(format!("[{}] {}", name, note));
                }
                StageOutcome::Warn(note) => {
                    warn!(target: "meaning::narrative", stage = name, note = %note, "Advisory stage warning");
                    state.audit_log.push(format!("[{}] WARNING: {}", name, note));
                    warnings.push(format!("{}: {}", name, note));
                }
                StageOutcome::Block(reason) if stage.is_blocking() => {
                    info!(target: "meaning::narrative", stage = name, reason = %reason, "Narrative blocked");
                    state.intent_text = self.redaction_marker.clone();
                    state.growth_text = self.redaction_marker.clone();
                    state.audit_log.push(format!("[{}] BLOCKED: {}", name, reason));
                    return PipelineResult {
                        state,
                        status: PipelineStatus::Blocked {
                            stage: name.to_string(),
                        },
                        warnings,
                    };
                }
                StageOutcome::Block(reason) => {
                    warn!(
                        target: "meaning::narrative",
                        stage = name,
                        reason = %reason,
                        "Advisory stage tried to block; ignored"
                    );
                    state
                        .audit_log
                        .push(format!("[{}] passed (block ignored: {})", name, reason));
                }
            }
        }

        PipelineResult {
            state,
            status: PipelineStatus::Passed,
            warnings,
        }
    }
}

impl std::fmt::Debug for NarrativePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrativePipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Lowercased alphanumeric tokens.
pub(crate) fn tokens(text: &str) -> std::collections::BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of the token sets; two empty texts are identical.
pub(crate) fn jaccard(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    let union = ta.union(&tb).count();
    if union == 0 {
        return 1.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, bool, StageOutcome);

    impl NarrativeStage for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn is_blocking(&self) -> bool {
            self.1
        }
        fn apply(&self, _state: &mut NarrativeState, _ctx: &RequestContext) -> StageOutcome {
            self.2.clone()
        }
    }

    #[test]
    fn advisory_block_is_ignored() {
        let pipeline = NarrativePipeline::new(
            vec![
                Box::new(Fixed("advisor", false, StageOutcome::Block("nope".into()))),
                Box::new(Fixed("after", false, StageOutcome::Pass("ran".into()))),
            ],
            "[X]",
        );
        let result = pipeline.run(NarrativeState::new("a", "b"), &RequestContext::default());
        assert_eq!(result.status, PipelineStatus::Passed);
        assert_eq!(result.state.intent_text, "a");
        assert_eq!(result.state.audit_log.len(), 2);
        assert_eq!(result.state.audit_log[1], "[after] ran");
    }

    #[test]
    fn blocking_stage_short_circuits() {
        let pipeline = NarrativePipeline::new(
            vec![
                Box::new(Fixed("first", false, StageOutcome::Warn("hm".into()))),
                Box::new(Fixed("guard", true, StageOutcome::Block("stop".into()))),
                Box::new(Fixed("never", false, StageOutcome::Pass("ran".into()))),
            ],
            "[X]",
        );
        let result = pipeline.run(NarrativeState::new("a", "b"), &RequestContext::default());
        assert!(result.is_blocked());
        assert_eq!(result.state.intent_text, "[X]");
        assert_eq!(result.state.growth_text, "[X]");
        assert_eq!(result.warnings, vec!["first: hm".to_string()]);
        assert_eq!(
            result.state.audit_log,
            vec!["[first] WARNING: hm".to_string(), "[guard] BLOCKED: stop".to_string()]
        );
    }

    #[test]
    fn standard_order_is_fixed() {
        let pipeline = NarrativePipeline::standard(&PipelineSettings::default(), None);
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "ethics_filter",
                "publication_gatekeeper",
                "tone_adjuster",
                "emotional_nuance",
                "integrity_tracker",
                "balance_checker",
                "growth_tracker",
                "anomaly_monitor",
            ]
        );
    }

    #[test]
    fn jaccard_bounds() {
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("a b", "a b"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert!((jaccard("A, b", "a c") - 1.0 / 3.0).abs() < 1e-12);
    }
}

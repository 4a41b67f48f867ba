//! Engine configuration: defaults, then an optional TOML file, then `MEANING__*` env vars.

use crate::error::MeaningResult;
use crate::matcher::{Metric, DEFAULT_PARALLEL_THRESHOLD};
use crate::narrative::{default_ethics_terms, PipelineSettings, DEFAULT_HISTORY_CAPACITY};
use crate::security::{read_terms, DEFAULT_REDACTION_MARKER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Env var naming the TOML file.
pub const CONFIG_PATH_ENV: &str = "MEANING_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/meaning.toml";
const ENV_PREFIX: &str = "MEANING";

fn default_activation_threshold() -> f64 {
    0.5
}

fn default_max_reasoning_passes() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    DEFAULT_PARALLEL_THRESHOLD
}

fn default_redaction_marker() -> String {
    DEFAULT_REDACTION_MARKER.to_string()
}

fn default_anomaly_z_threshold() -> f64 {
    3.0
}

fn default_anomaly_min_samples() -> usize {
    5
}

fn default_novelty_threshold() -> f64 {
    0.9
}

fn default_balance_dominance() -> f64 {
    0.7
}

fn default_history_window() -> usize {
    50
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarratorKind {
    #[default]
    Mechanical,
    #[serde(alias = "open_router")]
    Openrouter,
}

/// Engine configuration.
///
/// | Key | Default | Description |
/// |-----|---------|-------------|
/// | dimension_paths | [] | Dimension files, loaded and concatenated in this order. |
/// | rulebase_path / world_model_path / library_path | none | Optional knowledge files. |
/// | mission_profile_path | none | Confidential keywords; absent means the gatekeeper passes through. |
/// | activation_threshold | 0.5 | `value > threshold` makes a dimension true for reasoning. |
/// | max_reasoning_passes | 50 | Forward-chaining safety cap. |
/// | metric | cosine | `cosine`, `kl_divergence`, `wasserstein`. |
/// | history_path | none | Sled directory for narrative history; in-memory when unset. |
/// | history_capacity | 500 | Records kept by either history store; older ones are pruned. |
///
/// Env overrides use `MEANING__<KEY>`, e.g. `MEANING__METRIC=kl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dimension_paths: Vec<PathBuf>,
    #[serde(default)]
    pub rulebase_path: Option<PathBuf>,
    #[serde(default)]
    pub world_model_path: Option<PathBuf>,
    #[serde(default)]
    pub library_path: Option<PathBuf>,
    #[serde(default)]
    pub mission_profile_path: Option<PathBuf>,
    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: f64,
    #[serde(default = "default_max_reasoning_passes")]
    pub max_reasoning_passes: usize,
    /// Rules with a confidence below this never fire.
    #[serde(default)]
    pub min_rule_confidence: f64,
    #[serde(default)]
    pub metric: Metric,
    /// Multiply both vectors by registry weights before scoring.
    #[serde(default = "default_true")]
    pub apply_weights: bool,
    /// Library size above which scoring runs on the rayon pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_redaction_marker")]
    pub redaction_marker: String,
    #[serde(default = "default_ethics_terms")]
    pub ethics_terms: Vec<String>,
    /// Extra ethics terms, one per line.
    #[serde(default)]
    pub ethics_terms_path: Option<PathBuf>,
    #[serde(default = "default_anomaly_z_threshold")]
    pub anomaly_z_threshold: f64,
    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,
    #[serde(default = "default_novelty_threshold")]
    pub novelty_threshold: f64,
    #[serde(default = "default_balance_dominance")]
    pub balance_dominance: f64,
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    /// Records handed to the growth and anomaly stages.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub narrator: NarratorKind,
    #[serde(default)]
    pub narrator_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension_paths: Vec::new(),
            rulebase_path: None,
            world_model_path: None,
            library_path: None,
            mission_profile_path: None,
            activation_threshold: default_activation_threshold(),
            max_reasoning_passes: default_max_reasoning_passes(),
            min_rule_confidence: 0.0,
            metric: Metric::default(),
            apply_weights: true,
            parallel_threshold: default_parallel_threshold(),
            redaction_marker: default_redaction_marker(),
            ethics_terms: default_ethics_terms(),
            ethics_terms_path: None,
            anomaly_z_threshold: default_anomaly_z_threshold(),
            anomaly_min_samples: default_anomaly_min_samples(),
            novelty_threshold: default_novelty_threshold(),
            balance_dominance: default_balance_dominance(),
            history_path: None,
            history_window: default_history_window(),
            history_capacity: default_history_capacity(),
            narrator: NarratorKind::default(),
            narrator_model: None,
        }
    }
}

impl EngineConfig {
    /// Load from `$MEANING_CONFIG` (default `config/meaning.toml`) plus env overrides.
    pub fn load() -> MeaningResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit TOML path (skipped if absent) plus env overrides.
    pub fn load_from(path: &Path) -> MeaningResult<Self> {
        let builder = config::Config::builder();
        let builder = if path.exists() {
            info!(target: "meaning::engine", path = %path.display(), "Loading configuration file");
            builder.add_source(config::File::from(path).format(config::FileFormat::Toml))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("dimension_paths")
                    .with_list_parse_key("ethics_terms"),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Built-in ethics terms plus any listed in `ethics_terms_path`.
    pub fn all_ethics_terms(&self) -> Vec<String> {
        let mut terms = self.ethics_terms.clone();
        if let Some(path) = &self.ethics_terms_path {
            match read_terms(path) {
                Ok(extra) => terms.extend(extra),
                Err(e) => {
                    warn!(target: "meaning::engine", path = %path.display(), error = %e, "Ethics terms file unreadable");
                }
            }
        }
        terms
    }

    /// Stored records; never fewer than one read window.
    pub fn effective_history_capacity(&self) -> usize {
        self.history_capacity.max(self.history_window).max(1)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            redaction_marker: self.redaction_marker.clone(),
            ethics_terms: self.all_ethics_terms(),
            novelty_threshold: self.novelty_threshold,
            balance_dominance: self.balance_dominance,
            anomaly_z_threshold: self.anomaly_z_threshold,
            anomaly_min_samples: self.anomaly_min_samples,
        }
    }
}

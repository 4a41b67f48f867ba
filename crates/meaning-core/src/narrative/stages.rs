//! The standard narrative stages. Only the ethics filter and the gatekeeper block.

use super::{jaccard, NarrativeState, NarrativeStage, RequestContext, StageOutcome};
use crate::knowledge::snapshot::MissionProfile;
use crate::reasoning::{LOGIC_SOURCE, WORLD_MODEL_SOURCE};
use crate::security::KeywordRedactor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Hard block on forbidden terms in either text.
#[derive(Debug, Clone)]
pub struct EthicsFilter {
    redactor: KeywordRedactor,
}

impl EthicsFilter {
    pub fn new<S: AsRef<str>>(terms: &[S]) -> Self {
        Self {
            redactor: KeywordRedactor::from_terms(terms),
        }
    }
}

impl NarrativeStage for EthicsFilter {
    fn name(&self) -> &'static str {
        "ethics_filter"
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn apply(&self, state: &mut NarrativeState, _ctx: &RequestContext) -> StageOutcome {
        let mut hits = self.redactor.find_matches(&state.intent_text);
        for h in self.redactor.find_matches(&state.growth_text) {
            if !hits.contains(&h) {
                hits.push(h);
            }
        }
        if hits.is_empty() {
            StageOutcome::Pass("clear".to_string())
        } else {
            StageOutcome::Block(format!("forbidden term(s): {}", hits.join(", ")))
        }
    }
}

/// Blocks publication when a mission-profile confidential keyword appears in either text
/// or in the source attribution the integrity tracker appends later in the chain.
/// Without a profile (or with an empty keyword list) it passes everything through.
#[derive(Debug, Clone)]
pub struct PublicationGatekeeper {
    redactor: Option<KeywordRedactor>,
}

impl PublicationGatekeeper {
    pub fn new(profile: Option<&MissionProfile>) -> Self {
        Self {
            redactor: profile
                .map(|p| KeywordRedactor::from_terms(&p.confidential_keywords))
                .filter(KeywordRedactor::is_active),
        }
    }
}

impl NarrativeStage for PublicationGatekeeper {
    fn name(&self) -> &'static str {
        "publication_gatekeeper"
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn apply(&self, state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome {
        let Some(redactor) = &self.redactor else {
            return StageOutcome::Pass("no mission profile; pass-through".to_string());
        };
        let mut hits = redactor.find_matches(&state.intent_text);
        hits.extend(redactor.find_matches(&state.growth_text));
        hits.extend(redactor.find_matches(&IntegrityTracker::attribution(ctx)));
        hits.sort();
        hits.dedup();
        if hits.is_empty() {
            StageOutcome::Pass(format!(
                "no confidential keywords ({} checked)",
                redactor.terms().len()
            ))
        } else {
            StageOutcome::Block(format!("confidential keyword(s): {}", hits.join(", ")))
        }
    }
}

/// Harsh phrase -> compassionate replacement.
const TONE_TABLE: &[(&str, &str)] = &[
    ("completely wrong", "quite different from what was expected"),
    ("failed", "did not yet succeed"),
    ("failure", "setback"),
    ("useless", "of limited use here"),
    ("worthless", "of little value here"),
    ("terrible", "challenging"),
    ("stupid", "unexpected"),
    ("wrong", "different from expected"),
];

static TONE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    TONE_TABLE
        .iter()
        .filter_map(|(harsh, soft)| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(harsh)))
                .ok()
                .map(|r| (r, *soft))
        })
        .collect()
});

/// Rewrites harsh phrasing in both texts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToneAdjuster;

impl ToneAdjuster {
    fn soften(text: &str) -> (String, usize) {
        let mut out = text.to_string();
        let mut count = 0;
        for (pattern, soft) in TONE_PATTERNS.iter() {
            let n = pattern.find_iter(&out).count();
            if n > 0 {
                count += n;
                out = pattern.replace_all(&out, regex::NoExpand(soft)).into_owned();
            }
        }
        (out, count)
    }
}

impl NarrativeStage for ToneAdjuster {
    fn name(&self) -> &'static str {
        "tone_adjuster"
    }

    fn apply(&self, state: &mut NarrativeState, _ctx: &RequestContext) -> StageOutcome {
        let (intent, a) = Self::soften(&state.intent_text);
        let (growth, b) = Self::soften(&state.growth_text);
        state.intent_text = intent;
        state.growth_text = growth;
        match a + b {
            0 => StageOutcome::Pass("no harsh phrasing".to_string()),
            n => StageOutcome::Pass(format!("softened {} phrase(s)", n)),
        }
    }
}

const POSITIVE_WORDS: &[&str] = &[
    "strong", "clear", "close", "similar", "match", "matched", "confident", "consistent", "good",
];
const NEGATIVE_WORDS: &[&str] = &[
    "weak", "poor", "uncertain", "mismatch", "distant", "unlike", "no", "not", "unclear", "low",
];

pub const HEDGE_SENTENCE: &str =
    "This comparison is tentative; treat it as a starting point rather than a conclusion.";

/// Prepends a hedge to `growth_text` when the tone is strongly negative or the match is weak.
#[derive(Debug, Clone)]
pub struct EmotionalNuance {
    pub weak_score: f64,
    pub negative_valence: f64,
}

impl Default for EmotionalNuance {
    fn default() -> Self {
        Self {
            weak_score: 0.5,
            negative_valence: -0.5,
        }
    }
}

/// Lexicon valence in `[-1, 1]`; 0.0 when no lexicon word appears.
pub fn valence(text: &str) -> f64 {
    let tokens = super::tokens(text);
    let pos = tokens.iter().filter(|t| POSITIVE_WORDS.contains(&t.as_str())).count() as f64;
    let neg = tokens.iter().filter(|t| NEGATIVE_WORDS.contains(&t.as_str())).count() as f64;
    if pos + neg == 0.0 {
        0.0
    } else {
        (pos - neg) / (pos + neg)
    }
}

impl NarrativeStage for EmotionalNuance {
    fn name(&self) -> &'static str {
        "emotional_nuance"
    }

    fn apply(&self, state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome {
        let v = valence(&format!("{} {}", state.intent_text, state.growth_text));
        let weak = ctx.score < self.weak_score;
        if (v <= self.negative_valence || weak) && !state.growth_text.starts_with(HEDGE_SENTENCE) {
            state.growth_text = if state.growth_text.is_empty() {
                HEDGE_SENTENCE.to_string()
            } else {
                format!("{} {}", HEDGE_SENTENCE, state.growth_text)
            };
            StageOutcome::Pass(format!("hedged (valence {:.2}, score {:.3})", v, ctx.score))
        } else {
            StageOutcome::Pass(format!("valence {:.2}", v))
        }
    }
}

/// Appends source attribution to `intent_text`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityTracker;

impl IntegrityTracker {
    fn attribution(ctx: &RequestContext) -> String {
        let engines: BTreeSet<&str> = ctx.provenance.values().map(String::as_str).collect();
        let rules = ctx
            .trace
            .iter()
            .filter(|t| t.source.starts_with("rule:"))
            .count();
        let world = ctx
            .trace
            .iter()
            .filter(|t| t.source == WORLD_MODEL_SOURCE)
            .count();
        let logic = ctx
            .trace
            .iter()
            .filter(|t| t.source.starts_with(LOGIC_SOURCE))
            .count();
        let engines = if engines.is_empty() {
            "none".to_string()
        } else {
            engines.into_iter().collect::<Vec<_>>().join(", ")
        };
        format!(
            "Sources: extractors [{}]; rule inferences {}; world-model inferences {}; logical rules {}; matched {} ({}).",
            engines,
            rules,
            world,
            logic,
            ctx.best_id.as_deref().unwrap_or("none"),
            ctx.metric
        )
    }
}

impl NarrativeStage for IntegrityTracker {
    fn name(&self) -> &'static str {
        "integrity_tracker"
    }

    fn apply(&self, state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome {
        let attribution = Self::attribution(ctx);
        state.intent_text = if state.intent_text.is_empty() {
            attribution
        } else {
            format!("{} {}", state.intent_text.trim_end(), attribution)
        };
        StageOutcome::Pass(format!(
            "attributed {} extractor value(s), {} derivation(s)",
            ctx.provenance.len(),
            ctx.trace.len()
        ))
    }
}

/// Warns when one layer dominates the active dimensions or nothing is active.
#[derive(Debug, Clone)]
pub struct BalanceChecker {
    dominance: f64,
}

impl BalanceChecker {
    pub fn new(dominance: f64) -> Self {
        Self { dominance }
    }
}

impl NarrativeStage for BalanceChecker {
    fn name(&self) -> &'static str {
        "balance_checker"
    }

    fn apply(&self, _state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome {
        let total: usize = ctx.layer_activity.values().sum();
        if total == 0 {
            return StageOutcome::Warn("no active dimensions".to_string());
        }
        if ctx.layer_activity.len() < 2 {
            return StageOutcome::Pass(format!("{} active dimension(s) in a single layer", total));
        }
        // Ties go to the alphabetically first layer (BTreeMap order).
        let (layer, count) = ctx
            .layer_activity
            .iter()
            .fold(("", 0usize), |best, (l, c)| if *c > best.1 { (l.as_str(), *c) } else { best });
        let share = count as f64 / total as f64;
        if share > self.dominance {
            StageOutcome::Warn(format!(
                "layer '{}' carries {:.0}% of active dimensions",
                layer,
                share * 100.0
            ))
        } else {
            StageOutcome::Pass(format!("balanced (max layer share {:.0}%)", share * 100.0))
        }
    }
}

/// Warns when `growth_text` repeats a recent narrative.
#[derive(Debug, Clone)]
pub struct GrowthTracker {
    novelty_threshold: f64,
}

impl GrowthTracker {
    pub fn new(novelty_threshold: f64) -> Self {
        Self { novelty_threshold }
    }
}

impl NarrativeStage for GrowthTracker {
    fn name(&self) -> &'static str {
        "growth_tracker"
    }

    fn apply(&self, state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome {
        if ctx.history.is_empty() {
            return StageOutcome::Pass("no history".to_string());
        }
        let max = ctx
            .history
            .iter()
            .map(|h| jaccard(&state.growth_text, &h.growth_text))
            .fold(0.0_f64, f64::max);
        if max > self.novelty_threshold {
            StageOutcome::Warn(format!("growth text repeats a recent narrative (similarity {:.2})", max))
        } else {
            StageOutcome::Pass(format!("novel (max similarity {:.2})", max))
        }
    }
}

/// z-score check of narrative length and intent/growth self-correlation against history.
#[derive(Debug, Clone)]
pub struct AnomalyMonitor {
    z_threshold: f64,
    min_samples: usize,
}

impl AnomalyMonitor {
    pub fn new(z_threshold: f64, min_samples: usize) -> Self {
        Self {
            z_threshold,
            min_samples: min_samples.max(2),
        }
    }
}

/// z-score of `x` against `samples`. Zero spread: 0.0 when equal to the mean, else infinite.
pub fn z_score(x: f64, samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    if sd < 1e-12 {
        if (x - mean).abs() < 1e-12 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        (x - mean) / sd
    }
}

impl NarrativeStage for AnomalyMonitor {
    fn name(&self) -> &'static str {
        "anomaly_monitor"
    }

    fn apply(&self, state: &mut NarrativeState, ctx: &RequestContext) -> StageOutcome {
        if ctx.history.len() < self.min_samples {
            return StageOutcome::Pass(format!(
                "insufficient history ({}/{})",
                ctx.history.len(),
                self.min_samples
            ));
        }
        let lengths: Vec<f64> = ctx
            .history
            .iter()
            .map(|h| (h.intent_text.chars().count() + h.growth_text.chars().count()) as f64)
            .collect();
        let correlations: Vec<f64> = ctx
            .history
            .iter()
            .map(|h| jaccard(&h.intent_text, &h.growth_text))
            .collect();
        let z_len = z_score(state.combined_len() as f64, &lengths);
        let z_corr = z_score(jaccard(&state.intent_text, &state.growth_text), &correlations);

        let mut flags = Vec::new();
        if z_len.abs() > self.z_threshold {
            flags.push(format!("length z={:.2}", z_len));
        }
        if z_corr.abs() > self.z_threshold {
            flags.push(format!("self-correlation z={:.2}", z_corr));
        }
        if flags.is_empty() {
            StageOutcome::Pass(format!("within range (length z={:.2}, self-correlation z={:.2})", z_len, z_corr))
        } else {
            StageOutcome::Warn(format!("anomalous narrative: {}", flags.join("; ")))
        }
    }
}

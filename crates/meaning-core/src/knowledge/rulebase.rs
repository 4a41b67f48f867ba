//! Static forward-chaining rulebase: `trigger(s) -> conclusion`.

use crate::error::{MeaningError, MeaningResult};
use crate::files;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// A trigger is either a single concept id or a conjunction of ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    One(String),
    All(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
struct RawRule {
    trigger: Trigger,
    conclusion: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// A validated rule. Read-only after load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub triggers: Vec<String>,
    pub conclusion: String,
    pub confidence: Option<f64>,
}

impl Rule {
    pub fn new(triggers: &[&str], conclusion: &str) -> Self {
        Self {
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            conclusion: conclusion.to_string(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Source label recorded in the reasoning trace.
    pub fn label(&self) -> String {
        format!("rule:{}->{}", self.triggers.join("+"), self.conclusion)
    }
}

/// Ordered list of rules.
#[derive(Debug, Clone, Default)]
pub struct Rulebase {
    rules: Vec<Rule>,
    warnings: Vec<MeaningError>,
}

impl Rulebase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(rules: Vec<Rule>) -> Self {
        let mut rb = Self::empty();
        for (i, rule) in rules.into_iter().enumerate() {
            rb.push_checked(i, rule);
        }
        rb
    }

    pub fn load(path: &Path) -> MeaningResult<Self> {
        // Entries are decoded one by one so a single bad record does not reject the file.
        let raw: Vec<serde_json::Value> = files::read_definition(path)?;
        let mut rb = Self::empty();
        for (i, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<RawRule>(value) {
                Ok(r) => {
                    let triggers = match r.trigger {
                        Trigger::One(t) => vec![t],
                        Trigger::All(ts) => ts,
                    };
                    rb.push_checked(
                        i,
                        Rule {
                            triggers,
                            conclusion: r.conclusion,
                            confidence: r.confidence,
                        },
                    );
                }
                Err(e) => rb.skip(i, &e.to_string()),
            }
        }
        info!(target: "meaning::reasoner", path = %path.display(), rules = rb.len(), "Loaded rulebase");
        Ok(rb)
    }

    fn push_checked(&mut self, index: usize, mut rule: Rule) {
        rule.triggers = rule
            .triggers
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        rule.conclusion = rule.conclusion.trim().to_string();
        if rule.triggers.is_empty() {
            self.skip(index, "empty trigger");
        } else if rule.conclusion.is_empty() {
            self.skip(index, "empty conclusion");
        } else {
            self.rules.push(rule);
        }
    }

    fn skip(&mut self, index: usize, reason: &str) {
        warn!(target: "meaning::reasoner", index, reason, "Skipping malformed rule");
        self.warnings
            .push(MeaningError::Config(format!("rule #{}: {}", index, reason)));
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn load_warnings(&self) -> &[MeaningError] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_single_and_conjunctive_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[
                {"trigger": "is_dog", "conclusion": "is_animal"},
                {"trigger": ["has_fur", "barks"], "conclusion": "is_dog", "confidence": 0.8},
                {"trigger": [], "conclusion": "x"},
                {"conclusion": "missing_trigger"},
                {"trigger": "a", "conclusion": "  "}
            ]"#,
        )
        .unwrap();
        let rb = Rulebase::load(&path).unwrap();
        assert_eq!(rb.len(), 2);
        assert_eq!(rb.rules()[0].triggers, vec!["is_dog"]);
        assert_eq!(rb.rules()[1].triggers, vec!["has_fur", "barks"]);
        assert_eq!(rb.rules()[1].confidence, Some(0.8));
        assert_eq!(rb.load_warnings().len(), 3);
    }

    #[test]
    fn yaml_rulebase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, "- trigger: is_wolf\n  conclusion: is_canine\n").unwrap();
        let rb = Rulebase::load(&path).unwrap();
        assert_eq!(rb.rules()[0].label(), "rule:is_wolf->is_canine");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Rulebase::load(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, MeaningError::Config(_)));
    }
}

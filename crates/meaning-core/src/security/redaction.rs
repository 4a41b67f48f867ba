//! Keyword matching for the blocking narrative stages.
//!
//! Terms match case-insensitively when they are not flanked by a letter or digit, so
//! `orion` matches "Orion", "orion_prototype" and "deep-orion.v2" but not "orionid".
//! Used by the ethics filter (forbidden terms) and the gatekeeper (mission-profile
//! confidential keywords).

use regex::Regex;
use std::fs;
use std::io::BufRead;
use std::path::Path;
use tracing::warn;

/// Placeholder used in place of a blocked narrative.
pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct KeywordRedactor {
    terms: Vec<String>,
    /// Case-insensitive alternation of all terms; boundaries are checked per match.
    pattern: Option<Regex>,
}

fn is_boundary(c: Option<char>) -> bool {
    c.map_or(true, |c| !c.is_alphanumeric())
}

impl KeywordRedactor {
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let pattern = if terms.is_empty() {
            None
        } else {
            // Longest first; alternation is leftmost-first.
            let mut ordered: Vec<&String> = terms.iter().collect();
            ordered.sort_by_key(|t| std::cmp::Reverse(t.len()));
            let alternation = ordered
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&format!(r"(?i)(?:{})", alternation)) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(target: "meaning::narrative", error = %e, "Keyword pattern failed to compile");
                    None
                }
            }
        };
        Self { terms, pattern }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_active(&self) -> bool {
        self.pattern.is_some()
    }

    /// Distinct matched terms, lowercased, in order of first appearance.
    pub fn find_matches(&self, text: &str) -> Vec<String> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };
        let mut out: Vec<String> = Vec::new();
        let mut start = 0;
        while start <= text.len() {
            let Some(m) = pattern.find_at(text, start) else {
                break;
            };
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            if is_boundary(before) && is_boundary(after) {
                let hit = m.as_str().to_lowercase();
                if !out.contains(&hit) {
                    out.push(hit);
                }
                start = m.end().max(m.start() + 1);
            } else {
                // Retry one character later so a shorter term inside this match is not missed.
                start = m.start() + text[m.start()..].chars().next().map_or(1, char::len_utf8);
            }
        }
        out
    }
}

/// Read terms from a file (one per line; blank lines and `#` comments ignored).
/// A missing file yields no terms.
pub fn read_terms(path: &Path) -> std::io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let f = fs::File::open(path)?;
    let mut terms = Vec::new();
    for line in std::io::BufReader::new(f).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        terms.push(line.to_string());
    }
    Ok(terms)
}

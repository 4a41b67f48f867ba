//! SimilarityMatcher: full linear scan of the vector library under one metric.
//!
//! Every metric maps to `[0, 1]` with `1.0` meaning identical. Scoring fans out over
//! rayon once the library is larger than the parallel threshold; scores are collected in
//! library order and reduced sequentially so the result is the same either way.

use crate::error::{MeaningError, MeaningResult};
use crate::knowledge::library::LibraryEntry;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Two scores within this distance are a tie; the earlier library entry wins.
pub const TIE_EPSILON: f64 = 1e-9;

/// Smoothing added to every histogram bin before normalisation.
const HISTOGRAM_EPSILON: f64 = 1e-10;

pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    #[serde(alias = "kl")]
    KlDivergence,
    #[serde(alias = "emd")]
    Wasserstein,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cosine, Metric::KlDivergence, Metric::Wasserstein];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::KlDivergence => "kl_divergence",
            Metric::Wasserstein => "wasserstein",
        }
    }

    pub fn score(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::KlDivergence => 1.0 / (1.0 + kl_divergence(a, b)),
            Metric::Wasserstein => 1.0 / (1.0 + wasserstein_distance(a, b)),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = MeaningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "kl_divergence" | "kl" => Ok(Metric::KlDivergence),
            "wasserstein" | "emd" => Ok(Metric::Wasserstein),
            other => Err(MeaningError::Config(format!("unknown metric '{}'", other))),
        }
    }
}

/// Cosine similarity clipped to `[0, 1]`; zero norm scores 0.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let (dot, na, nb) = a
        .iter()
        .zip(b)
        .fold((0.0, 0.0, 0.0), |(d, x, y), (p, q)| (d + p * q, x + p * p, y + q * q));
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

/// Treat the vector as an unnormalised histogram and turn it into a distribution.
fn to_distribution(v: &[f64]) -> Vec<f64> {
    let smoothed: Vec<f64> = v.iter().map(|x| x.max(0.0) + HISTOGRAM_EPSILON).collect();
    let total: f64 = smoothed.iter().sum();
    smoothed.into_iter().map(|x| x / total).collect()
}

/// `D(p || q)` over the smoothed, normalised histograms.
pub fn kl_divergence(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let p = to_distribution(a);
    let q = to_distribution(b);
    p.iter()
        .zip(&q)
        .map(|(pi, qi)| pi * (pi / qi).ln())
        .sum::<f64>()
        .max(0.0)
}

/// 1-D earth mover's distance with dimension index as the support: the sum of absolute
/// CDF differences at unit spacing.
pub fn wasserstein_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let p = to_distribution(a);
    let q = to_distribution(b);
    let mut cdf_p = 0.0;
    let mut cdf_q = 0.0;
    let mut total = 0.0;
    for (pi, qi) in p.iter().zip(&q) {
        cdf_p += pi;
        cdf_q += qi;
        total += (cdf_p - cdf_q).abs();
    }
    total
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f64,
    /// Position in the library.
    pub index: usize,
}

/// Ranked matches plus every entry that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub metric: Metric,
    pub matches: Vec<ScoredMatch>,
    #[serde(skip)]
    pub warnings: Vec<MeaningError>,
}

impl Ranking {
    pub fn best(&self) -> MeaningResult<&ScoredMatch> {
        self.matches.first().ok_or(MeaningError::EmptyLibrary)
    }
}

#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    metric: Metric,
    weights: Option<Vec<f64>>,
    parallel_threshold: usize,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(Metric::Cosine)
    }
}

impl SimilarityMatcher {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            weights: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Per-dimension weights applied to both vectors before scoring. Negative weights count as 0.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights.into_iter().map(|w| w.max(0.0)).collect());
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    fn weighted(&self, v: &[f64]) -> Vec<f64> {
        match &self.weights {
            Some(w) if w.len() == v.len() => v.iter().zip(w).map(|(x, w)| x * w).collect(),
            _ => v.to_vec(),
        }
    }

    /// Top `k` entries by score (`k == 0` ranks everything). Ties keep library order.
    pub fn rank(&self, query: &[f64], library: &[LibraryEntry], k: usize) -> Ranking {
        let mut warnings = Vec::new();
        let usable: Vec<(usize, &LibraryEntry)> = library
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                let ok = entry.meaning_vector.len() == query.len()
                    && entry.meaning_vector.iter().all(|x| x.is_finite());
                if !ok {
                    warn!(
                        target: "meaning::matcher",
                        id = %entry.id,
                        expected = query.len(),
                        actual = entry.meaning_vector.len(),
                        "Skipping library entry with unusable vector"
                    );
                    warnings.push(MeaningError::VectorShapeMismatch {
                        id: entry.id.clone(),
                        expected: query.len(),
                        actual: entry.meaning_vector.len(),
                    });
                }
                ok
            })
            .collect();

        let q = self.weighted(query);
        let score_one = |(_, entry): &(usize, &LibraryEntry)| {
            self.metric.score(&q, &self.weighted(&entry.meaning_vector))
        };
        let scores: Vec<f64> = if usable.len() > self.parallel_threshold {
            debug!(target: "meaning::matcher", entries = usable.len(), "Scoring library in parallel");
            usable.par_iter().map(score_one).collect()
        } else {
            usable.iter().map(score_one).collect()
        };

        let limit = if k == 0 { usable.len() } else { k.min(usable.len()) };
        let mut taken = vec![false; usable.len()];
        let mut matches = Vec::with_capacity(limit);
        for _ in 0..limit {
            let mut best: Option<usize> = None;
            for (i, score) in scores.iter().enumerate() {
                if taken[i] {
                    continue;
                }
                match best {
                    Some(b) if *score <= scores[b] + TIE_EPSILON => {}
                    _ => best = Some(i),
                }
            }
            let Some(b) = best else { break };
            taken[b] = true;
            let (index, entry) = usable[b];
            matches.push(ScoredMatch {
                id: entry.id.clone(),
                score: scores[b],
                index,
            });
        }

        Ranking {
            metric: self.metric,
            matches,
            warnings,
        }
    }

    pub fn find_best_match(
        &self,
        query: &[f64],
        library: &[LibraryEntry],
    ) -> MeaningResult<(String, f64)> {
        let ranking = self.rank(query, library, 1);
        let best = ranking.best()?;
        Ok((best.id.clone(), best.score))
    }
}

/// Unweighted top-k ranking under `metric`.
pub fn rank(query: &[f64], library: &[LibraryEntry], metric: Metric, k: usize) -> Ranking {
    SimilarityMatcher::new(metric).rank(query, library, k)
}

/// Best library entry under `metric`; `EmptyLibrary` when nothing is comparable.
pub fn find_best_match(
    query: &[f64],
    library: &[LibraryEntry],
    metric: Metric,
) -> MeaningResult<(String, f64)> {
    SimilarityMatcher::new(metric).find_best_match(query, library)
}

//! Multivariate anomaly detection with an Isolation Forest
//!
//! Every district-week of an eligible district is one point in the space of
//! the three raw family totals. Outliers are judged against the whole
//! eligible population, not the district's own history.
//!
//! Global invariants enforced:
//! - Same points, parameters and seed yield identical scores
//! - Exactly `round(contamination * n)` eligible rows are flagged
//! - Ineligible rows are never flagged and carry no score

use crate::error::DataQualityWarning;
use crate::record::{DistrictKey, DistrictWeekRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation Forest parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnomalyParams {
    /// Expected fraction of eligible rows that are anomalous
    pub contamination: f64,
    /// Observed weeks a district needs before its rows are scored
    pub min_history_weeks: usize,
    pub seed: u64,
    pub trees: usize,
    pub max_samples: usize,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        AnomalyParams {
            contamination: 0.10,
            min_history_weeks: 5,
            seed: 42,
            trees: 100,
            max_samples: 256,
        }
    }
}

/// Anomaly columns for one district-week
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    /// Lower is more anomalous; `None` for ineligible rows
    pub anomaly_score: Option<f64>,
}

impl AnomalyResult {
    pub const NOT_SCORED: AnomalyResult = AnomalyResult {
        is_anomaly: false,
        anomaly_score: None,
    };
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelFitFailure {
    #[error("need at least 2 eligible district-weeks, found {0}")]
    TooFewPoints(usize),

    #[error("all {0} eligible district-weeks are identical")]
    NoVariation(usize),
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(points: &[[f64; 3]], sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        IsolationTree {
            root: grow(points, sample, 0, height_limit, rng),
        }
    }

    fn path_length(&self, point: &[f64; 3]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }

    fn is_single_leaf(&self) -> bool {
        matches!(self.root, Node::Leaf { .. })
    }
}

fn grow(
    points: &[[f64; 3]],
    rows: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    // Only features that still vary inside this node can separate points
    let mut splittable: Vec<(usize, f64, f64)> = Vec::with_capacity(3);
    for feature in 0..3 {
        let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            (lo.min(points[r][feature]), hi.max(points[r][feature]))
        });
        if hi > lo {
            splittable.push((feature, lo, hi));
        }
    }
    if splittable.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| points[r][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(points, left, depth + 1, height_limit, rng)),
        right: Box::new(grow(points, right, depth + 1, height_limit, rng)),
    }
}

/// Average path length of an unsuccessful search in a binary search tree of `n` nodes
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A fitted forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit on `points`; per-tree seeds are drawn sequentially from `params.seed`
    /// so the forest does not depend on thread scheduling
    pub fn fit(points: &[[f64; 3]], params: &AnomalyParams) -> Result<Self, ModelFitFailure> {
        let n = points.len();
        if n < 2 {
            return Err(ModelFitFailure::TooFewPoints(n));
        }

        let sample_size = params.max_samples.min(n).max(2);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let mut master = StdRng::seed_from_u64(params.seed);
        let tree_seeds: Vec<u64> = (0..params.trees.max(1)).map(|_| master.gen()).collect();

        let trees: Vec<IsolationTree> = tree_seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let sample = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::build(points, sample, height_limit, &mut rng)
            })
            .collect();

        if trees.iter().all(IsolationTree::is_single_leaf) {
            return Err(ModelFitFailure::NoVariation(n));
        }

        Ok(IsolationForest { trees, sample_size })
    }

    /// `-2^(-E[h(x)] / c(psi))`; lower means more anomalous
    pub fn score(&self, point: &[f64; 3]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
            / self.trees.len() as f64;
        -(2f64.powf(-mean_path / average_path_length(self.sample_size)))
    }
}

/// Indices of the `round(contamination * n)` lowest scores, ties by position
pub fn flag_lowest(scores: &[f64], contamination: f64) -> Vec<usize> {
    let k = (contamination * scores.len() as f64).round() as usize;
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    order.truncate(k.min(scores.len()));
    order
}

/// Anomaly columns for a batch (same order as `records`)
///
/// `records` are expected in canonical order so flag tie-breaking follows
/// `(state, district, week_start)`.
pub fn detect_anomalies(
    records: &[DistrictWeekRecord],
    params: &AnomalyParams,
) -> (Vec<AnomalyResult>, Option<DataQualityWarning>) {
    let mut history: BTreeMap<DistrictKey, usize> = BTreeMap::new();
    for record in records {
        *history.entry(record.key()).or_default() += 1;
    }

    let eligible: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| history.get(&r.key()).copied().unwrap_or(0) >= params.min_history_weeks)
        .map(|(idx, _)| idx)
        .collect();

    let mut results = vec![AnomalyResult::NOT_SCORED; records.len()];
    let points: Vec<[f64; 3]> = eligible
        .iter()
        .map(|&idx| records[idx].totals().to_array())
        .collect();

    let forest = match IsolationForest::fit(&points, params) {
        Ok(forest) => forest,
        Err(failure) => {
            tracing::warn!(eligible = eligible.len(), reason = %failure, "anomaly model skipped");
            return (
                results,
                Some(DataQualityWarning::AnomalyModelSkipped {
                    eligible_rows: eligible.len(),
                    reason: failure.to_string(),
                }),
            );
        }
    };

    let scores: Vec<f64> = points.par_iter().map(|p| forest.score(p)).collect();
    for (&idx, &score) in eligible.iter().zip(&scores) {
        results[idx].anomaly_score = Some(score);
    }
    for position in flag_lowest(&scores, params.contamination) {
        results[eligible[position]].is_anomaly = true;
    }

    tracing::debug!(
        eligible = eligible.len(),
        districts = history.values().filter(|&&n| n >= params.min_history_weeks).count(),
        "isolation forest scored"
    );

    (results, None)
}

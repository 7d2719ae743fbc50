//! Data-derived metric weights
//!
//! Each family's weight is its coefficient of variation over the whole
//! batch, normalized so the three weights sum to one.
//!
//! Global invariants enforced:
//! - Weights are non-negative and sum to 1.0 (within 1e-9)
//! - Identical batches yield identical weights
//! - A `WeightVector` is never mutated after construction

use crate::error::DataQualityWarning;
use crate::record::{DistrictWeekRecord, MetricFamily, MetricValues};
use serde::{Deserialize, Serialize};

/// Immutable per-family importance weights for one batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(MetricValues);

impl WeightVector {
    /// 1/3 per family
    pub fn equal() -> Self {
        WeightVector(MetricValues::from_fn(|_| 1.0 / 3.0))
    }

    /// Normalize non-negative raw importances; `None` when they sum to zero
    pub fn normalized(raw: MetricValues) -> Option<Self> {
        let total = raw.sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        Some(WeightVector(MetricValues::from_fn(|m| raw.get(m) / total)))
    }

    pub fn get(&self, family: MetricFamily) -> f64 {
        self.0.get(family)
    }

    pub fn values(&self) -> &MetricValues {
        &self.0
    }
}

/// One row of the weight justification table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WeightJustification {
    pub metric: MetricFamily,
    pub weight: f64,
    pub coefficient_of_variation: f64,
    pub rationale: String,
}

/// Result of weight estimation over a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WeightEstimate {
    pub weights: WeightVector,
    pub coefficients_of_variation: MetricValues,
    pub degenerate: bool,
}

impl WeightEstimate {
    pub fn justification(&self) -> Vec<WeightJustification> {
        let equal = self.weights == WeightVector::equal() && self.degenerate;
        MetricFamily::ALL
            .into_iter()
            .map(|metric| WeightJustification {
                metric,
                weight: self.weights.get(metric),
                coefficient_of_variation: self.coefficients_of_variation.get(metric),
                rationale: if equal {
                    "Equal weight (no variation in batch)".to_string()
                } else {
                    "Based on coefficient of variation".to_string()
                },
            })
            .collect()
    }
}

/// Sample mean and sample standard deviation (n - 1 denominator)
pub fn mean_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (Some(mean), None);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (Some(mean), Some(variance.sqrt()))
}

/// Coefficient of variation, undefined for an empty/zero-mean/single-point sample
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    match mean_std(values) {
        (Some(mean), Some(std)) if mean > 0.0 => Some(std / mean),
        _ => None,
    }
}

/// Estimate weights from the dispersion of each family's totals
pub fn estimate_weights(
    records: &[DistrictWeekRecord],
) -> (WeightEstimate, Option<DataQualityWarning>) {
    let mut undefined = Vec::new();
    let cvs = MetricFamily::ALL.map(|family| {
        let values: Vec<f64> = records.iter().map(|r| r.total(family) as f64).collect();
        coefficient_of_variation(&values).unwrap_or_else(|| {
            undefined.push(family);
            0.0
        })
    });
    let cvs = MetricValues::new(cvs[0], cvs[1], cvs[2]);

    let (weights, fell_back) = match WeightVector::normalized(cvs) {
        Some(weights) => (weights, false),
        None => (WeightVector::equal(), true),
    };

    let degenerate = fell_back || !undefined.is_empty();
    let warning = degenerate.then(|| DataQualityWarning::DegenerateWeights {
        undefined_metrics: undefined,
        fell_back_to_equal: fell_back,
    });

    (
        WeightEstimate {
            weights,
            coefficients_of_variation: cvs,
            degenerate,
        },
        warning,
    )
}

//! Error and data-quality types for the engine
//!
//! Schema violations are fatal and abort a run before any stage executes.
//! Data-quality warnings never interrupt control flow; they are collected
//! and returned next to the output table.

use crate::record::MetricFamily;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single reason a batch cannot be scored
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("duplicate key ({week_start}, {state}, {district})")]
    DuplicateKey {
        week_start: NaiveDate,
        state: String,
        district: String,
    },

    #[error("negative {family} value {value} at ({week_start}, {state}, {district})")]
    NegativeValue {
        week_start: NaiveDate,
        state: String,
        district: String,
        family: MetricFamily,
        value: i64,
    },

    #[error(
        "{family} age bands sum to {band_sum} but total is {total} at ({week_start}, {state}, {district})"
    )]
    AgeBandMismatch {
        week_start: NaiveDate,
        state: String,
        district: String,
        family: MetricFamily,
        band_sum: i64,
        total: i64,
    },

    #[error("{family} age bands overflow when summed at ({week_start}, {state}, {district})")]
    BandSumOverflow {
        week_start: NaiveDate,
        state: String,
        district: String,
        family: MetricFamily,
    },

    #[error("week_start {week_start} is not a Monday ({state}, {district})")]
    MisalignedWeek {
        week_start: NaiveDate,
        state: String,
        district: String,
    },
}

/// Fatal engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("batch rejected with {} schema violation(s), first: {}", .violations.len(), first_violation(.violations))]
    Schema { violations: Vec<SchemaViolation> },
}

fn first_violation(violations: &[SchemaViolation]) -> String {
    violations
        .first()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Pipeline stage that raised a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Weights,
    Severity,
    Anomaly,
    Trend,
    Forecast,
}

/// Non-fatal data-quality finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// One or more coefficients of variation were undefined or every one was zero
    DegenerateWeights {
        undefined_metrics: Vec<MetricFamily>,
        fell_back_to_equal: bool,
    },
    /// A week with fewer than two reporting districts; percentiles pinned to 50
    SparseWeek {
        week_start: NaiveDate,
        districts: usize,
    },
    /// A district with too few observed weeks for full trend/forecast fidelity
    ShortSeries {
        stage: Stage,
        state: String,
        district: String,
        observed_weeks: usize,
        required_weeks: usize,
    },
    /// The anomaly model could not be fit; every row is marked non-anomalous
    AnomalyModelSkipped {
        eligible_rows: usize,
        reason: String,
    },
}

impl DataQualityWarning {
    pub fn stage(&self) -> Stage {
        match self {
            DataQualityWarning::DegenerateWeights { .. } => Stage::Weights,
            DataQualityWarning::SparseWeek { .. } => Stage::Severity,
            DataQualityWarning::ShortSeries { stage, .. } => *stage,
            DataQualityWarning::AnomalyModelSkipped { .. } => Stage::Anomaly,
        }
    }
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityWarning::DegenerateWeights {
                undefined_metrics,
                fell_back_to_equal,
            } => {
                let names: Vec<&str> = undefined_metrics.iter().map(|m| m.as_str()).collect();
                write!(f, "degenerate weights")?;
                if !names.is_empty() {
                    write!(f, " (undefined CV for {})", names.join(", "))?;
                }
                if *fell_back_to_equal {
                    write!(f, "; no variation in any metric, using equal weights")?;
                }
                Ok(())
            }
            DataQualityWarning::SparseWeek {
                week_start,
                districts,
            } => write!(
                f,
                "week {} has {} reporting district(s); percentiles set to 50",
                week_start, districts
            ),
            DataQualityWarning::ShortSeries {
                stage,
                state,
                district,
                observed_weeks,
                required_weeks,
            } => write!(
                f,
                "{:?} stage: {}/{} has {} observed week(s), {} needed for full fidelity",
                stage, state, district, observed_weeks, required_weeks
            ),
            DataQualityWarning::AnomalyModelSkipped {
                eligible_rows,
                reason,
            } => write!(
                f,
                "anomaly model skipped over {} eligible row(s): {}",
                eligible_rows, reason
            ),
        }
    }
}

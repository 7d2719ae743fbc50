//! Per-row data completeness

use crate::record::{DistrictWeekRecord, MetricFamily};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse completeness bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Complete,
    Partial,
    Sparse,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Complete => "complete",
            QualityFlag::Partial => "partial",
            QualityFlag::Sparse => "sparse",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage of metric families with a non-zero total
pub fn data_completeness(record: &DistrictWeekRecord) -> f64 {
    let reporting = MetricFamily::ALL
        .into_iter()
        .filter(|&m| record.total(m) > 0)
        .count();
    reporting as f64 / MetricFamily::ALL.len() as f64 * 100.0
}

pub fn quality_flag(completeness: f64) -> QualityFlag {
    if completeness >= 100.0 {
        QualityFlag::Complete
    } else if completeness >= 33.0 {
        QualityFlag::Partial
    } else {
        QualityFlag::Sparse
    }
}

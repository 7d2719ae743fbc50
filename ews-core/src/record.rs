//! District-week input records and per-metric value containers
//!
//! Global invariants enforced:
//! - A record never carries anything finer-grained than a district
//! - Metric families are always visited in `MetricFamily::ALL` order

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three transaction families tracked per district-week
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    Enrolment,
    DemographicUpdate,
    BiometricUpdate,
}

impl MetricFamily {
    /// Canonical visiting order. Ties in dominant-signal selection resolve
    /// to the earliest family in this list.
    pub const ALL: [MetricFamily; 3] = [
        MetricFamily::Enrolment,
        MetricFamily::DemographicUpdate,
        MetricFamily::BiometricUpdate,
    ];

    pub fn index(self) -> usize {
        match self {
            MetricFamily::Enrolment => 0,
            MetricFamily::DemographicUpdate => 1,
            MetricFamily::BiometricUpdate => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::Enrolment => "enrolment",
            MetricFamily::DemographicUpdate => "demographic_update",
            MetricFamily::BiometricUpdate => "biometric_update",
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `f64` per metric family
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricValues {
    pub enrolment: f64,
    pub demographic_update: f64,
    pub biometric_update: f64,
}

impl MetricValues {
    pub fn new(enrolment: f64, demographic_update: f64, biometric_update: f64) -> Self {
        MetricValues {
            enrolment,
            demographic_update,
            biometric_update,
        }
    }

    /// Build by evaluating `f` once per family, in canonical order
    pub fn from_fn(mut f: impl FnMut(MetricFamily) -> f64) -> Self {
        MetricValues {
            enrolment: f(MetricFamily::Enrolment),
            demographic_update: f(MetricFamily::DemographicUpdate),
            biometric_update: f(MetricFamily::BiometricUpdate),
        }
    }

    pub fn get(&self, family: MetricFamily) -> f64 {
        match family {
            MetricFamily::Enrolment => self.enrolment,
            MetricFamily::DemographicUpdate => self.demographic_update,
            MetricFamily::BiometricUpdate => self.biometric_update,
        }
    }

    pub fn set(&mut self, family: MetricFamily, value: f64) {
        match family {
            MetricFamily::Enrolment => self.enrolment = value,
            MetricFamily::DemographicUpdate => self.demographic_update = value,
            MetricFamily::BiometricUpdate => self.biometric_update = value,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricFamily, f64)> + '_ {
        MetricFamily::ALL.into_iter().map(move |m| (m, self.get(m)))
    }

    pub fn sum(&self) -> f64 {
        self.enrolment + self.demographic_update + self.biometric_update
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.enrolment, self.demographic_update, self.biometric_update]
    }
}

/// Age-band breakdown of a family total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgeBands {
    /// 0-5 years
    pub child: i64,
    /// 5-17 years
    pub transition: i64,
    /// 18 years and over
    pub adult: i64,
}

impl AgeBands {
    pub fn new(child: i64, transition: i64, adult: i64) -> Self {
        AgeBands {
            child,
            transition,
            adult,
        }
    }

    /// Sum of the three bands; `None` if it does not fit in `i64`
    pub fn sum(&self) -> Option<i64> {
        self.child
            .checked_add(self.transition)?
            .checked_add(self.adult)
    }
}

/// Raw count for one family, optionally split by age band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricCounts {
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bands: Option<AgeBands>,
}

impl MetricCounts {
    pub fn total_only(total: i64) -> Self {
        MetricCounts { total, bands: None }
    }

    /// Counts whose total is derived from the bands; `None` on overflow
    pub fn from_bands(bands: AgeBands) -> Option<Self> {
        Some(MetricCounts {
            total: bands.sum()?,
            bands: Some(bands),
        })
    }
}

/// Canonical district identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistrictKey {
    pub state: String,
    pub district: String,
}

impl fmt::Display for DistrictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.state, self.district)
    }
}

/// One row of aggregated activity for a canonical district over one
/// Monday-aligned week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DistrictWeekRecord {
    pub week_start: NaiveDate,
    pub state: String,
    pub district: String,
    pub enrolment: MetricCounts,
    pub demographic_update: MetricCounts,
    pub biometric_update: MetricCounts,
}

impl DistrictWeekRecord {
    pub fn new(
        week_start: NaiveDate,
        state: impl Into<String>,
        district: impl Into<String>,
        enrolment: MetricCounts,
        demographic_update: MetricCounts,
        biometric_update: MetricCounts,
    ) -> Self {
        DistrictWeekRecord {
            week_start,
            state: state.into(),
            district: district.into(),
            enrolment,
            demographic_update,
            biometric_update,
        }
    }

    pub fn counts(&self, family: MetricFamily) -> &MetricCounts {
        match family {
            MetricFamily::Enrolment => &self.enrolment,
            MetricFamily::DemographicUpdate => &self.demographic_update,
            MetricFamily::BiometricUpdate => &self.biometric_update,
        }
    }

    pub fn total(&self, family: MetricFamily) -> i64 {
        self.counts(family).total
    }

    /// Family totals as floats, the feature vector used by scoring and
    /// anomaly detection
    pub fn totals(&self) -> MetricValues {
        MetricValues::from_fn(|m| self.total(m) as f64)
    }

    pub fn key(&self) -> DistrictKey {
        DistrictKey {
            state: self.state.clone(),
            district: self.district.clone(),
        }
    }

    /// Ordering used for every deterministic traversal of a batch
    pub fn canonical_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.state
            .cmp(&other.state)
            .then_with(|| self.district.cmp(&other.district))
            .then_with(|| self.week_start.cmp(&other.week_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_values_roundtrip_by_family() {
        let mut values = MetricValues::default();
        for (i, family) in MetricFamily::ALL.into_iter().enumerate() {
            values.set(family, i as f64 + 1.0);
        }
        assert_eq!(values.to_array(), [1.0, 2.0, 3.0]);
        assert_eq!(values.sum(), 6.0);
        assert_eq!(values.get(MetricFamily::DemographicUpdate), 2.0);
    }

    #[test]
    fn test_from_bands_sums_total() {
        let counts = MetricCounts::from_bands(AgeBands::new(3, 4, 5)).unwrap();
        assert_eq!(counts.total, 12);
        assert_eq!(counts.bands.and_then(|b| b.sum()), Some(12));
    }

    #[test]
    fn test_canonical_order_state_district_week() {
        let week = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap();
        let row = |state: &str, district: &str, day| {
            DistrictWeekRecord::new(
                week(day),
                state,
                district,
                MetricCounts::default(),
                MetricCounts::default(),
                MetricCounts::default(),
            )
        };
        let mut rows = vec![row("B", "X", 3), row("A", "Y", 10), row("A", "Y", 3)];
        rows.sort_by(|a, b| a.canonical_cmp(b));
        assert_eq!(rows[0].state, "A");
        assert_eq!(rows[0].week_start, week(3));
        assert_eq!(rows[1].week_start, week(10));
        assert_eq!(rows[2].state, "B");
    }
}

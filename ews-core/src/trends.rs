//! Trend semantics - rolling average, change and momentum per district
//!
//! Differences use positional adjacency within the *observed* series: the
//! previous value is always the immediately preceding observed week of the
//! same district, whatever the calendar gap. Missing weeks are never filled.
//!
//! Global invariants enforced:
//! - Deterministic ordering (by state, district, then week)
//! - A district's first observed week is `stable` with no change/momentum
//! - Label rules are evaluated in a fixed priority order

use crate::error::{DataQualityWarning, Stage};
use crate::record::{DistrictKey, DistrictWeekRecord};
use crate::severity::SeverityAssessment;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Rows in the rolling-average window (current row included)
pub const MA_WINDOW: usize = 4;

/// Observed rows required before the rolling average is defined
pub const MA_MIN_PERIODS: usize = 2;

/// Observed rows required before momentum is defined
pub const MOMENTUM_MIN_ROWS: usize = 3;

/// Trend label of a district-week
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    AcceleratingUp,
    AcceleratingDown,
    Rising,
    Declining,
    Stable,
}

impl TrendLabel {
    pub const ALL: [TrendLabel; 5] = [
        TrendLabel::AcceleratingUp,
        TrendLabel::AcceleratingDown,
        TrendLabel::Rising,
        TrendLabel::Declining,
        TrendLabel::Stable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::AcceleratingUp => "accelerating_up",
            TrendLabel::AcceleratingDown => "accelerating_down",
            TrendLabel::Rising => "rising",
            TrendLabel::Declining => "declining",
            TrendLabel::Stable => "stable",
        }
    }

    pub fn is_upward(&self) -> bool {
        matches!(self, TrendLabel::AcceleratingUp | TrendLabel::Rising)
    }

    pub fn is_downward(&self) -> bool {
        matches!(self, TrendLabel::AcceleratingDown | TrendLabel::Declining)
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change thresholds for trend labelling
///
/// `rising_change` and `declining_change` are deliberately asymmetric
/// (3 vs -5 by default).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrendThresholds {
    pub accelerating_change: f64,
    pub rising_change: f64,
    pub declining_change: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        TrendThresholds {
            accelerating_change: 5.0,
            rising_change: 3.0,
            declining_change: -5.0,
        }
    }
}

/// Trend columns for one district-week
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrendPoint {
    pub severity_ma4: Option<f64>,
    pub severity_change: Option<f64>,
    pub severity_momentum: Option<f64>,
    pub trend_label: TrendLabel,
}

/// Label a change/momentum pair, first matching rule wins
///
/// Undefined momentum satisfies neither acceleration rule.
pub fn classify_trend(
    change: Option<f64>,
    momentum: Option<f64>,
    thresholds: &TrendThresholds,
) -> TrendLabel {
    let Some(change) = change else {
        return TrendLabel::Stable;
    };
    let momentum = momentum.unwrap_or(0.0);

    if change > thresholds.accelerating_change && momentum > 0.0 {
        TrendLabel::AcceleratingUp
    } else if change < thresholds.declining_change && momentum < 0.0 {
        TrendLabel::AcceleratingDown
    } else if change > thresholds.rising_change {
        TrendLabel::Rising
    } else if change < thresholds.declining_change {
        TrendLabel::Declining
    } else {
        TrendLabel::Stable
    }
}

/// Trend columns for one district's observed scores, oldest first
pub fn analyze_series(scores: &[f64], thresholds: &TrendThresholds) -> Vec<TrendPoint> {
    let mut points = Vec::with_capacity(scores.len());
    let mut previous_change: Option<f64> = None;

    for (i, &score) in scores.iter().enumerate() {
        let window_start = (i + 1).saturating_sub(MA_WINDOW);
        let window = &scores[window_start..=i];
        let severity_ma4 = (window.len() >= MA_MIN_PERIODS)
            .then(|| window.iter().sum::<f64>() / window.len() as f64);

        let severity_change = i.checked_sub(1).map(|prev| score - scores[prev]);
        let severity_momentum = match (severity_change, previous_change) {
            (Some(current), Some(previous)) => Some(current - previous),
            _ => None,
        };

        points.push(TrendPoint {
            severity_ma4,
            severity_change,
            severity_momentum,
            trend_label: classify_trend(severity_change, severity_momentum, thresholds),
        });
        previous_change = severity_change;
    }

    points
}

/// Trend columns for a batch (same order as `records`)
pub fn analyze_trends(
    records: &[DistrictWeekRecord],
    severities: &[SeverityAssessment],
    thresholds: &TrendThresholds,
) -> (Vec<TrendPoint>, Vec<DataQualityWarning>) {
    let series = district_series(records);

    let analyzed: Vec<(DistrictKey, Vec<usize>, Vec<TrendPoint>)> = series
        .into_par_iter()
        .map(|(key, rows)| {
            let scores: Vec<f64> = rows.iter().map(|&idx| severities[idx].score).collect();
            let points = analyze_series(&scores, thresholds);
            (key, rows, points)
        })
        .collect();

    let mut out = vec![None; records.len()];
    let mut warnings = Vec::new();
    for (key, rows, points) in analyzed {
        if rows.len() < MOMENTUM_MIN_ROWS {
            tracing::warn!(district = %key, weeks = rows.len(), "short series for trend");
            warnings.push(DataQualityWarning::ShortSeries {
                stage: Stage::Trend,
                state: key.state,
                district: key.district,
                observed_weeks: rows.len(),
                required_weeks: MOMENTUM_MIN_ROWS,
            });
        }
        for (idx, point) in rows.into_iter().zip(points) {
            out[idx] = Some(point);
        }
    }

    (out.into_iter().flatten().collect(), warnings)
}

/// Row indices of each district's observed weeks, oldest first
pub fn district_series(records: &[DistrictWeekRecord]) -> BTreeMap<DistrictKey, Vec<usize>> {
    let mut series: BTreeMap<DistrictKey, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        series.entry(record.key()).or_default().push(idx);
    }
    for rows in series.values_mut() {
        rows.sort_by_key(|&idx| records[idx].week_start);
    }
    series
}

/// Count of rows per label, in `TrendLabel::ALL` order
pub fn label_distribution(points: &[TrendPoint]) -> Vec<(TrendLabel, usize)> {
    TrendLabel::ALL
        .into_iter()
        .map(|label| (label, points.iter().filter(|p| p.trend_label == label).count()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MetricCounts, MetricFamily, MetricValues};
    use chrono::{Duration, NaiveDate};

    fn labels(scores: &[f64]) -> Vec<TrendLabel> {
        analyze_series(scores, &TrendThresholds::default())
            .into_iter()
            .map(|p| p.trend_label)
            .collect()
    }

    #[test]
    fn test_first_week_is_stable_and_undefined() {
        let points = analyze_series(&[77.0, 90.0], &TrendThresholds::default());
        assert_eq!(points[0].trend_label, TrendLabel::Stable);
        assert!(points[0].severity_change.is_none());
        assert!(points[0].severity_momentum.is_none());
        assert!(points[0].severity_ma4.is_none());
        assert!(points[1].severity_momentum.is_none());
    }

    #[test]
    fn test_flat_series_scenario() {
        let points = analyze_series(&[40.0, 42.0, 41.0, 43.0], &TrendThresholds::default());
        let last = points[3];
        assert_eq!(last.trend_label, TrendLabel::Stable);
        assert!((last.severity_ma4.unwrap() - 41.5).abs() < 1e-9);
        assert_eq!(last.severity_change, Some(2.0));
        assert_eq!(last.severity_momentum, Some(3.0));
    }

    #[test]
    fn test_rolling_average_caps_at_four_rows() {
        let points = analyze_series(&[10.0, 20.0, 30.0, 40.0, 50.0], &TrendThresholds::default());
        assert_eq!(points[1].severity_ma4, Some(15.0));
        assert_eq!(points[4].severity_ma4, Some(35.0));
    }

    #[test]
    fn test_accelerating_up_needs_positive_momentum() {
        // +6 then +8: momentum +2
        assert_eq!(labels(&[10.0, 16.0, 24.0])[2], TrendLabel::AcceleratingUp);
        // +10 then +6: still rising but decelerating
        assert_eq!(labels(&[10.0, 20.0, 26.0])[2], TrendLabel::Rising);
        // Second week has no momentum, so a large jump is only rising
        assert_eq!(labels(&[10.0, 30.0])[1], TrendLabel::Rising);
    }

    #[test]
    fn test_accelerating_down_and_declining() {
        assert_eq!(labels(&[50.0, 44.0, 36.0])[2], TrendLabel::AcceleratingDown);
        assert_eq!(labels(&[50.0, 40.0, 34.0])[2], TrendLabel::Declining);
    }

    #[test]
    fn test_asymmetric_thresholds() {
        let t = TrendThresholds::default();
        assert_eq!(classify_trend(Some(3.5), Some(0.0), &t), TrendLabel::Rising);
        assert_eq!(classify_trend(Some(-3.5), Some(0.0), &t), TrendLabel::Stable);
        assert_eq!(classify_trend(Some(-5.5), None, &t), TrendLabel::Declining);
        assert_eq!(classify_trend(Some(3.0), Some(9.0), &t), TrendLabel::Stable);
        assert_eq!(classify_trend(None, Some(9.0), &t), TrendLabel::Stable);
    }

    #[test]
    fn test_gaps_use_previous_observed_week() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let mk = |week: i64| {
            DistrictWeekRecord::new(
                start + Duration::weeks(week),
                "KERALA",
                "WAYANAD",
                MetricCounts::total_only(1),
                MetricCounts::total_only(1),
                MetricCounts::total_only(1),
            )
        };
        // Week 1 and 2 missing; input deliberately out of order
        let records = vec![mk(3), mk(0)];
        let severities = vec![
            SeverityAssessment {
                score: 70.0,
                percentiles: MetricValues::default(),
                dominant_signal: MetricFamily::Enrolment,
            },
            SeverityAssessment {
                score: 60.0,
                percentiles: MetricValues::default(),
                dominant_signal: MetricFamily::Enrolment,
            },
        ];
        let ((points, warnings), logs) = crate::test_utils::capture_logs(|| {
            analyze_trends(&records, &severities, &TrendThresholds::default())
        });
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(logs.contains("short series for trend"), "{}", logs);
        assert_eq!(points[1].severity_change, None);
        assert_eq!(points[0].severity_change, Some(10.0));
        assert_eq!(points[0].trend_label, TrendLabel::Rising);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].stage(), Stage::Trend);
    }

    #[test]
    fn test_label_distribution_counts_every_label() {
        let points = analyze_series(&[10.0, 20.0, 30.0, 30.0], &TrendThresholds::default());
        let dist = label_distribution(&points);
        assert_eq!(dist.len(), TrendLabel::ALL.len());
        assert_eq!(dist.iter().map(|(_, n)| n).sum::<usize>(), 4);
    }
}

//! Within-week percentile scoring
//!
//! Every family total is ranked against all districts reporting the same
//! week, and the percentiles are combined through the batch weight vector.
//!
//! Scores are batch-and-week relative: rescoring one week on its own, or in
//! a batch with other districts, can legitimately change a district's score.
//!
//! Global invariants enforced:
//! - Scores lie in [0, 100]
//! - Tied raw values receive the averaged rank
//! - Raising one district's value never lowers its percentile

use crate::error::DataQualityWarning;
use crate::record::{DistrictWeekRecord, MetricFamily, MetricValues};
use crate::weights::WeightVector;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Percentile assigned when a week has a single reporting district
pub const NEUTRAL_PERCENTILE: f64 = 50.0;

/// Severity columns for one district-week
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SeverityAssessment {
    pub score: f64,
    pub percentiles: MetricValues,
    pub dominant_signal: MetricFamily,
}

/// Percentile rank of each value within `values`
///
/// `percentile = average_rank / n * 100` with 1-based ranks, so the single
/// largest value scores 100. A lone value scores `NEUTRAL_PERCENTILE`.
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![NEUTRAL_PERCENTILE],
        _ => {}
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        // 1-based positions start+1 ..= end+1
        let average_rank = (start + end + 2) as f64 / 2.0;
        for &idx in &order[start..=end] {
            ranks[idx] = average_rank / n as f64 * 100.0;
        }
        start = end + 1;
    }
    ranks
}

/// Combine percentiles into a score and pick the dominant family
pub fn combine(percentiles: MetricValues, weights: &WeightVector) -> SeverityAssessment {
    let mut score = 0.0;
    let mut dominant = MetricFamily::Enrolment;
    let mut best = f64::NEG_INFINITY;
    for (family, pct) in percentiles.iter() {
        let contribution = pct * weights.get(family);
        score += contribution;
        if contribution > best {
            best = contribution;
            dominant = family;
        }
    }

    SeverityAssessment {
        score: score.clamp(0.0, 100.0),
        percentiles,
        dominant_signal: dominant,
    }
}

/// Score every record, returning one assessment per input row (same order)
pub fn score_batch(
    records: &[DistrictWeekRecord],
    weights: &WeightVector,
) -> (Vec<SeverityAssessment>, Vec<DataQualityWarning>) {
    let mut weeks: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        weeks.entry(record.week_start).or_default().push(idx);
    }

    let scored: Vec<(NaiveDate, Vec<usize>, Vec<SeverityAssessment>)> = weeks
        .into_par_iter()
        .map(|(week, rows)| {
            let assessments = score_week(records, &rows, weights);
            (week, rows, assessments)
        })
        .collect();

    let mut out = vec![None; records.len()];
    let mut warnings = Vec::new();
    for (week, rows, assessments) in scored {
        if rows.len() < 2 {
            tracing::warn!(week = %week, districts = rows.len(), "sparse week, percentiles neutral");
            warnings.push(DataQualityWarning::SparseWeek {
                week_start: week,
                districts: rows.len(),
            });
        }
        for (idx, assessment) in rows.into_iter().zip(assessments) {
            out[idx] = Some(assessment);
        }
    }

    let assessments = out.into_iter().flatten().collect();
    (assessments, warnings)
}

fn score_week(
    records: &[DistrictWeekRecord],
    rows: &[usize],
    weights: &WeightVector,
) -> Vec<SeverityAssessment> {
    let mut percentiles = vec![MetricValues::default(); rows.len()];
    for family in MetricFamily::ALL {
        let values: Vec<f64> = rows
            .iter()
            .map(|&idx| records[idx].total(family) as f64)
            .collect();
        for (slot, pct) in percentiles.iter_mut().zip(percentile_ranks(&values)) {
            slot.set(family, pct);
        }
    }
    percentiles
        .into_iter()
        .map(|p| combine(p, weights))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MetricCounts;

    fn week(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn row(day: u32, district: &str, e: i64, d: i64, b: i64) -> DistrictWeekRecord {
        DistrictWeekRecord::new(
            week(day),
            "BIHAR",
            district,
            MetricCounts::total_only(e),
            MetricCounts::total_only(d),
            MetricCounts::total_only(b),
        )
    }

    #[test]
    fn test_highest_value_gets_100() {
        let ranks = percentile_ranks(&[10.0, 30.0, 20.0, 5.0]);
        assert_eq!(ranks, vec![50.0, 100.0, 75.0, 25.0]);
    }

    #[test]
    fn test_ties_get_averaged_rank() {
        let ranks = percentile_ranks(&[7.0, 7.0, 1.0]);
        // ranks 2 and 3 averaged to 2.5 over n = 3
        assert!((ranks[0] - 2.5 / 3.0 * 100.0).abs() < 1e-12);
        assert_eq!(ranks[0], ranks[1]);
        assert!((ranks[2] - 100.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_value_is_neutral() {
        assert_eq!(percentile_ranks(&[42.0]), vec![NEUTRAL_PERCENTILE]);
        assert!(percentile_ranks(&[]).is_empty());
    }

    #[test]
    fn test_increasing_value_never_lowers_percentile() {
        let mut values = vec![3.0, 8.0, 8.0, 12.0, 1.0];
        let mut previous = percentile_ranks(&values)[0];
        for step in 1..=15 {
            values[0] = 3.0 + step as f64;
            let current = percentile_ranks(&values)[0];
            assert!(current >= previous, "{} < {} at step {}", current, previous, step);
            previous = current;
        }
        assert_eq!(previous, 100.0);
    }

    #[test]
    fn test_dominant_signal_uses_weighted_contribution() {
        let weights = WeightVector::normalized(MetricValues::new(0.1, 0.1, 0.8)).unwrap();
        let assessment = combine(MetricValues::new(100.0, 90.0, 40.0), &weights);
        assert_eq!(assessment.dominant_signal, MetricFamily::BiometricUpdate);
        assert!((assessment.score - (10.0 + 9.0 + 32.0)).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_signal_tie_prefers_canonical_order() {
        let assessment = combine(MetricValues::new(60.0, 60.0, 60.0), &WeightVector::equal());
        assert_eq!(assessment.dominant_signal, MetricFamily::Enrolment);
    }

    #[test]
    fn test_score_batch_groups_by_week() {
        let records = vec![
            row(2, "A", 10, 10, 10),
            row(2, "B", 20, 20, 20),
            row(9, "A", 99, 99, 99),
        ];
        let (scores, warnings) = score_batch(&records, &WeightVector::equal());
        assert_eq!(scores.len(), 3);
        assert!((scores[0].score - 50.0).abs() < 1e-9);
        assert!((scores[1].score - 100.0).abs() < 1e-9);
        // Lone district in week 9
        assert!((scores[2].score - NEUTRAL_PERCENTILE).abs() < 1e-9);
        assert_eq!(
            warnings,
            vec![DataQualityWarning::SparseWeek {
                week_start: week(9),
                districts: 1,
            }]
        );
    }

    #[test]
    fn test_scores_within_bounds() {
        let records: Vec<_> = (0..20)
            .map(|i| row(2, &format!("D{}", i), i * 7 % 13, i * 3 % 5, 100 - i))
            .collect();
        let weights = WeightVector::normalized(MetricValues::new(0.5, 0.3, 0.2)).unwrap();
        let (scores, _) = score_batch(&records, &weights);
        for s in scores {
            assert!((0.0..=100.0).contains(&s.score));
        }
    }
}

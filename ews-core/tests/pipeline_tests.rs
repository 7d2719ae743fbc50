//! Integration tests for the full scoring pipeline

use chrono::{Duration, NaiveDate};
use ews_core::error::Stage;
use ews_core::forecast::{forecast_series, ForecastParams, ObservedWeek};
use ews_core::record::MetricValues;
use ews_core::risk::{classify_risk, RiskCategory, RiskThresholds};
use ews_core::trends::{analyze_series, TrendLabel, TrendThresholds};
use ews_core::{
    run, AgeBands, DataQualityWarning, DistrictWeekRecord, EngineError, MetricCounts,
    ResolvedConfig, SchemaViolation,
};

fn monday(week: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 5).unwrap() + Duration::weeks(week)
}

fn row(week: i64, district: &str, e: i64, d: i64, b: i64) -> DistrictWeekRecord {
    DistrictWeekRecord::new(
        monday(week),
        "RAJASTHAN",
        district,
        MetricCounts::total_only(e),
        MetricCounts::total_only(d),
        MetricCounts::total_only(b),
    )
}

fn schema_violations(records: Vec<DistrictWeekRecord>) -> Vec<SchemaViolation> {
    match run(records, &ResolvedConfig::defaults()) {
        Err(EngineError::Schema { violations }) => violations,
        Ok(_) => panic!("batch should have been rejected"),
    }
}

#[test]
fn test_negative_value_aborts_run() {
    let violations = schema_violations(vec![row(0, "AJMER", 5, -1, 3), row(0, "ALWAR", 1, 1, 1)]);
    assert!(matches!(
        violations.as_slice(),
        [SchemaViolation::NegativeValue { value: -1, .. }]
    ));
}

#[test]
fn test_age_band_mismatch_aborts_run() {
    let mut bad = row(0, "AJMER", 0, 1, 1);
    bad.enrolment = MetricCounts {
        total: 10,
        bands: Some(AgeBands::new(2, 3, 4)),
    };
    let violations = schema_violations(vec![bad]);
    assert!(matches!(
        violations.as_slice(),
        [SchemaViolation::AgeBandMismatch {
            band_sum: 9,
            total: 10,
            ..
        }]
    ));
}

#[test]
fn test_overflowing_age_bands_abort_run() {
    let mut bad = row(0, "AJMER", 5, 1, 1);
    bad.enrolment = MetricCounts {
        total: 5,
        bands: Some(AgeBands::new(i64::MAX, 1, 0)),
    };
    let violations = schema_violations(vec![bad]);
    assert!(matches!(
        violations.as_slice(),
        [SchemaViolation::BandSumOverflow { .. }]
    ));
}

#[test]
fn test_every_violation_is_reported() {
    let mut misaligned = row(0, "BIKANER", 1, 1, 1);
    misaligned.week_start = monday(0) + Duration::days(2);
    let violations = schema_violations(vec![
        row(0, "AJMER", 1, 1, 1),
        row(0, "AJMER", 2, 2, 2),
        misaligned,
        row(1, "ALWAR", -3, 1, 1),
    ]);
    assert_eq!(violations.len(), 3);
}

#[test]
fn test_sparse_week_warns_and_scores_neutral() {
    let records = vec![
        row(0, "AJMER", 10, 20, 30),
        row(0, "ALWAR", 30, 20, 10),
        row(1, "AJMER", 50, 60, 70),
    ];
    let output = run(records, &ResolvedConfig::defaults()).unwrap();
    let lone = output
        .records
        .iter()
        .find(|r| r.week_start == monday(1))
        .unwrap();
    assert!((lone.severity_score - 50.0).abs() < 1e-9);
    assert!(output.warnings.contains(&DataQualityWarning::SparseWeek {
        week_start: monday(1),
        districts: 1,
    }));
}

#[test]
fn test_short_history_downgrades_anomaly_model() {
    let records: Vec<_> = (0..3)
        .flat_map(|w| vec![row(w, "AJMER", 10 + w, 5, 7), row(w, "ALWAR", 4, 9 + w, 2)])
        .collect();
    let output = run(records, &ResolvedConfig::defaults()).unwrap();
    assert!(output.records.iter().all(|r| !r.is_anomaly));
    assert!(output
        .warnings
        .iter()
        .any(|w| matches!(w, DataQualityWarning::AnomalyModelSkipped { .. })));
    let forecast_short = output
        .warnings
        .iter()
        .filter(|w| w.stage() == Stage::Forecast)
        .count();
    assert_eq!(forecast_short, 2);
    assert!(output.forecasts.iter().all(|f| f.reduced_fidelity));
}

#[test]
fn test_warnings_follow_stage_order() {
    let records = vec![row(0, "AJMER", 0, 5, 5), row(1, "AJMER", 0, 6, 5)];
    let output = run(records, &ResolvedConfig::defaults()).unwrap();
    let stages: Vec<Stage> = output.warnings.iter().map(|w| w.stage()).collect();
    let mut sorted = stages.clone();
    sorted.sort_by_key(|s| *s as u8);
    assert_eq!(stages, sorted);
    assert_eq!(stages.first(), Some(&Stage::Weights));
}

#[test]
fn test_flat_series_scenario() {
    let points = analyze_series(&[40.0, 42.0, 41.0, 43.0], &TrendThresholds::default());
    let last = points.last().unwrap();
    assert_eq!(last.trend_label, TrendLabel::Stable);
    assert!((last.severity_ma4.unwrap() - 41.5).abs() < 1e-9);
    assert_eq!(
        classify_risk(43.0, last.trend_label, false),
        RiskCategory::Stable
    );
}

#[test]
fn test_classifier_priorities() {
    assert_eq!(
        classify_risk(95.0, TrendLabel::Declining, false),
        RiskCategory::Critical
    );
    assert_eq!(
        classify_risk(80.0, TrendLabel::Rising, false),
        RiskCategory::EmergingRisk
    );
}

#[test]
fn test_forecast_clamp_scenario() {
    let observed: Vec<ObservedWeek> = [98.0, 97.0, 99.0, 98.0]
        .iter()
        .enumerate()
        .map(|(i, &score)| ObservedWeek {
            week_start: monday(i as i64),
            totals: MetricValues::new(1.0, 1.0, 1.0),
            severity_score: score,
        })
        .collect();
    let forecast = forecast_series(
        "RAJASTHAN",
        "JAIPUR",
        &observed,
        TrendLabel::Rising,
        false,
        &ForecastParams::default(),
        &RiskThresholds::default(),
    )
    .unwrap();
    assert_eq!(forecast.forecast_severity_score, 100.0);
    assert_eq!(forecast.forecast_risk_category, RiskCategory::Critical);
    assert_eq!(forecast.target_week, monday(5));
}

#[test]
fn test_risk_category_consistent_with_columns() {
    let records: Vec<_> = (0..6)
        .flat_map(|w| {
            (0..5).map(move |d| {
                row(
                    w,
                    &format!("D{}", d),
                    10 + (d * 13 + w * 7) % 23,
                    30 + (d * 5 + w * 3) % 17,
                    20 + (d * 11 + w) % 19,
                )
            })
        })
        .collect();
    let output = run(records, &ResolvedConfig::defaults()).unwrap();
    for r in &output.records {
        assert_eq!(
            r.risk_category,
            classify_risk(r.severity_score, r.trend_label, r.is_anomaly)
        );
    }
}

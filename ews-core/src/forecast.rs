//! Short-horizon district forecasts
//!
//! The forecast is the mean of the trailing observed window, with a fixed
//! multiplier applied to the severity score according to the latest trend.
//! Trend and anomaly flag are carried forward unchanged from the latest
//! observed week; neither is predicted. This naive carry-forward is a
//! modelling simplification, not an estimate of future trend.

use crate::anomaly::AnomalyResult;
use crate::error::{DataQualityWarning, Stage};
use crate::record::{DistrictWeekRecord, MetricFamily, MetricValues};
use crate::risk::{classify_risk_with_thresholds, RiskCategory, RiskThresholds};
use crate::severity::SeverityAssessment;
use crate::trends::{district_series, TrendLabel, TrendPoint};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Forecast parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ForecastParams {
    /// Trailing observed rows averaged into the forecast
    pub window: usize,
    /// Weeks between the last observed week and the forecast target
    pub horizon_weeks: u32,
    pub rising_multiplier: f64,
    pub declining_multiplier: f64,
}

impl Default for ForecastParams {
    fn default() -> Self {
        ForecastParams {
            window: 4,
            horizon_weeks: 2,
            rising_multiplier: 1.10,
            declining_multiplier: 0.90,
        }
    }
}

impl ForecastParams {
    /// Severity multiplier for the latest observed trend
    pub fn trend_multiplier(&self, trend: TrendLabel) -> f64 {
        if trend.is_upward() {
            self.rising_multiplier
        } else if trend.is_downward() {
            self.declining_multiplier
        } else {
            1.0
        }
    }
}

/// One observed week fed to the forecaster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedWeek {
    pub week_start: NaiveDate,
    pub totals: MetricValues,
    pub severity_score: f64,
}

/// Forecast for one district
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DistrictForecast {
    pub state: String,
    pub district: String,
    pub last_observed_week: NaiveDate,
    pub target_week: NaiveDate,
    pub window_weeks: usize,
    /// The window held fewer rows than configured
    pub reduced_fidelity: bool,
    pub forecast_totals: MetricValues,
    /// Window mean before the trend adjustment
    pub baseline_severity_score: f64,
    pub forecast_severity_score: f64,
    pub current_trend: TrendLabel,
    pub current_is_anomaly: bool,
    pub forecast_risk_category: RiskCategory,
}

/// Forecast from a district's observed weeks (oldest first, at least one)
pub fn forecast_series(
    state: &str,
    district: &str,
    observed: &[ObservedWeek],
    current_trend: TrendLabel,
    current_is_anomaly: bool,
    params: &ForecastParams,
    thresholds: &RiskThresholds,
) -> Option<DistrictForecast> {
    let last = observed.last()?;
    let window = &observed[observed.len().saturating_sub(params.window.max(1))..];
    let n = window.len() as f64;

    let forecast_totals = MetricValues::from_fn(|family: MetricFamily| {
        window.iter().map(|w| w.totals.get(family)).sum::<f64>() / n
    });
    let baseline = window.iter().map(|w| w.severity_score).sum::<f64>() / n;
    let adjusted = (baseline * params.trend_multiplier(current_trend)).clamp(0.0, 100.0);

    Some(DistrictForecast {
        state: state.to_string(),
        district: district.to_string(),
        last_observed_week: last.week_start,
        target_week: last.week_start + Duration::weeks(i64::from(params.horizon_weeks)),
        window_weeks: window.len(),
        reduced_fidelity: window.len() < params.window,
        forecast_totals,
        baseline_severity_score: baseline,
        forecast_severity_score: adjusted,
        current_trend,
        current_is_anomaly,
        forecast_risk_category: classify_risk_with_thresholds(
            adjusted,
            current_trend,
            current_is_anomaly,
            thresholds,
        ),
    })
}

/// Forecast every district in the batch, sorted by (state, district)
pub fn forecast_districts(
    records: &[DistrictWeekRecord],
    severities: &[SeverityAssessment],
    trends: &[TrendPoint],
    anomalies: &[AnomalyResult],
    params: &ForecastParams,
    thresholds: &RiskThresholds,
) -> (Vec<DistrictForecast>, Vec<DataQualityWarning>) {
    let series: Vec<_> = district_series(records).into_iter().collect();

    let forecasts: Vec<DistrictForecast> = series
        .par_iter()
        .filter_map(|(key, rows)| {
            let observed: Vec<ObservedWeek> = rows
                .iter()
                .map(|&idx| ObservedWeek {
                    week_start: records[idx].week_start,
                    totals: records[idx].totals(),
                    severity_score: severities[idx].score,
                })
                .collect();
            let latest = *rows.last()?;
            forecast_series(
                &key.state,
                &key.district,
                &observed,
                trends[latest].trend_label,
                anomalies[latest].is_anomaly,
                params,
                thresholds,
            )
        })
        .collect();

    let warnings = series
        .iter()
        .filter(|(_, rows)| rows.len() < params.window)
        .map(|(key, rows)| {
            tracing::warn!(district = %key, weeks = rows.len(), "short series for forecast");
            DataQualityWarning::ShortSeries {
                stage: Stage::Forecast,
                state: key.state.clone(),
                district: key.district.clone(),
                observed_weeks: rows.len(),
                required_weeks: params.window,
            }
        })
        .collect();

    (forecasts, warnings)
}

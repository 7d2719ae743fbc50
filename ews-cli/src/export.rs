//! File exports for `run` and `aggregate`
//!
//! Every export is written in the order the engine produced it, which is
//! already canonical.

use crate::aggregate::GeoCleaningSummary;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use ews_core::forecast::DistrictForecast;
use ews_core::risk::RiskCategory;
use ews_core::trends::TrendLabel;
use ews_core::EngineOutput;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const WEEKLY_DISTRICT_FILE: &str = "ews_weekly_district.csv";
pub const FORECASTS_FILE: &str = "district_forecasts.csv";
pub const WEIGHTS_FILE: &str = "weight_justification.csv";
pub const WARNINGS_FILE: &str = "data_quality_warnings.json";

/// Flat CSV row for a district forecast
#[derive(Debug, Serialize)]
struct ForecastRow<'a> {
    state: &'a str,
    district: &'a str,
    last_observed_week: NaiveDate,
    target_week: NaiveDate,
    window_weeks: usize,
    reduced_fidelity: bool,
    forecast_enrol_total: f64,
    forecast_demo_total: f64,
    forecast_bio_total: f64,
    baseline_severity_score: f64,
    forecast_severity_score: f64,
    current_trend: TrendLabel,
    current_is_anomaly: bool,
    forecast_risk_category: RiskCategory,
}

impl<'a> From<&'a DistrictForecast> for ForecastRow<'a> {
    fn from(f: &'a DistrictForecast) -> Self {
        ForecastRow {
            state: &f.state,
            district: &f.district,
            last_observed_week: f.last_observed_week,
            target_week: f.target_week,
            window_weeks: f.window_weeks,
            reduced_fidelity: f.reduced_fidelity,
            forecast_enrol_total: f.forecast_totals.enrolment,
            forecast_demo_total: f.forecast_totals.demographic_update,
            forecast_bio_total: f.forecast_totals.biometric_update,
            baseline_severity_score: f.baseline_severity_score,
            forecast_severity_score: f.forecast_severity_score,
            current_trend: f.current_trend,
            current_is_anomaly: f.current_is_anomaly,
            forecast_risk_category: f.forecast_risk_category,
        }
    }
}

/// Write any serializable rows as CSV with a header
pub fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Write every `run` export into `out_dir`, returning the files written
pub fn write_run_outputs(out_dir: &Path, output: &EngineOutput) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;

    let weekly = out_dir.join(WEEKLY_DISTRICT_FILE);
    write_csv(&weekly, &output.records)?;

    let forecasts = out_dir.join(FORECASTS_FILE);
    write_csv(&forecasts, output.forecasts.iter().map(ForecastRow::from))?;

    let weights = out_dir.join(WEIGHTS_FILE);
    write_csv(&weights, output.weights.justification())?;

    let warnings = out_dir.join(WARNINGS_FILE);
    let json = serde_json::to_string_pretty(&output.warnings)
        .context("failed to serialize data-quality warnings")?;
    std::fs::write(&warnings, json)
        .with_context(|| format!("failed to write {}", warnings.display()))?;

    let written = vec![weekly, forecasts, weights, warnings];
    for path in &written {
        tracing::debug!("wrote {}", path.display());
    }
    Ok(written)
}

/// Write the geo-cleaning summary table
pub fn write_geo_summary(path: &Path, summaries: &[GeoCleaningSummary]) -> Result<()> {
    write_csv(path, summaries)
}

/// Render the geo-cleaning summary for the terminal
pub fn render_geo_summary(summaries: &[GeoCleaningSummary]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<20} {:>9} {:>8} {:>11} {:>10} {:>13}\n",
        "FAMILY", "RECORDS", "SKIPPED", "UNRESOLVED", "STATES", "DISTRICTS"
    ));
    for s in summaries {
        output.push_str(&format!(
            "{:<20} {:>9} {:>8} {:>11} {:>10} {:>13}\n",
            s.family.as_str(),
            s.records,
            s.skipped_dates,
            s.unresolved_pins,
            format!("{}->{}", s.states_before, s.states_after),
            format!("{}->{}", s.districts_before, s.districts_after),
        ));
    }
    output
}

//! EWS core library - district early-warning analytics over weekly
//! identity-service transaction tables

#![deny(warnings)]

// Global invariants enforced in this crate:
// - A batch with any schema violation is rejected before any stage runs
// - The weight vector is an explicit immutable value, never a global
// - All randomness flows from the configured seed
// - Deterministic traversal order must be explicit (state, district, week)
// - Identical input yields byte-for-byte identical output

pub mod anomaly;
pub mod config;
pub mod error;
pub mod forecast;
pub mod quality;
pub mod record;
pub mod report;
pub mod risk;
pub mod severity;
#[cfg(test)]
mod test_utils;
pub mod trends;
pub mod validate;
pub mod weights;

pub use config::ResolvedConfig;
pub use error::{DataQualityWarning, EngineError, SchemaViolation};
pub use forecast::DistrictForecast;
pub use record::{AgeBands, DistrictWeekRecord, MetricCounts, MetricFamily};
pub use report::{render_json, render_text, sort_reports, DistrictWeekReport};
pub use weights::{WeightEstimate, WeightVector};

use serde::Serialize;

/// Everything produced by one engine run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineOutput {
    /// One row per input record, sorted by (state, district, week_start)
    pub records: Vec<DistrictWeekReport>,
    /// One forecast per district, sorted by (state, district)
    pub forecasts: Vec<DistrictForecast>,
    pub weights: WeightEstimate,
    /// Data-quality findings in pipeline-stage order
    pub warnings: Vec<DataQualityWarning>,
}

/// Run every stage over one closed weekly batch
pub fn run(
    mut records: Vec<DistrictWeekRecord>,
    config: &ResolvedConfig,
) -> error::Result<EngineOutput> {
    let violations = validate::validate_batch(&records);
    if !violations.is_empty() {
        tracing::error!(violations = violations.len(), "schema validation failed");
        return Err(EngineError::Schema { violations });
    }

    records.sort_by(|a, b| a.canonical_cmp(b));
    let mut warnings = Vec::new();

    let (estimate, weight_warning) = weights::estimate_weights(&records);
    if let Some(warning) = weight_warning {
        tracing::warn!("{}", warning);
        warnings.push(warning);
    }
    tracing::info!(
        enrolment = %format!("{:.1}%", estimate.weights.get(MetricFamily::Enrolment) * 100.0),
        demographic_update = %format!(
            "{:.1}%",
            estimate.weights.get(MetricFamily::DemographicUpdate) * 100.0
        ),
        biometric_update = %format!(
            "{:.1}%",
            estimate.weights.get(MetricFamily::BiometricUpdate) * 100.0
        ),
        "weights estimated"
    );

    let (severities, severity_warnings) = severity::score_batch(&records, &estimate.weights);
    warnings.extend(severity_warnings);
    if !severities.is_empty() {
        let mean = severities.iter().map(|s| s.score).sum::<f64>() / severities.len() as f64;
        tracing::info!(rows = severities.len(), mean = %format!("{:.2}", mean), "severity scored");
    }

    // Anomaly detection and trend analysis only read severity output
    let ((anomalies, anomaly_warning), (trends, trend_warnings)) = rayon::join(
        || anomaly::detect_anomalies(&records, &config.anomaly),
        || trends::analyze_trends(&records, &severities, &config.trend),
    );
    warnings.extend(anomaly_warning);
    warnings.extend(trend_warnings);

    let flagged = anomalies.iter().filter(|a| a.is_anomaly).count();
    let scored = anomalies.iter().filter(|a| a.anomaly_score.is_some()).count();
    tracing::info!(
        flagged,
        eligible = scored,
        share = %format!("{:.1}%", report::percent(flagged, scored)),
        "anomalies detected"
    );
    tracing::info!(
        distribution = %format_distribution(trends::label_distribution(&trends)),
        "trends labelled"
    );

    let rows: Vec<DistrictWeekReport> = records
        .iter()
        .zip(&severities)
        .zip(&anomalies)
        .zip(&trends)
        .map(|(((record, severity), anomaly), trend)| {
            let category = risk::classify_risk_with_thresholds(
                severity.score,
                trend.trend_label,
                anomaly.is_anomaly,
                &config.risk,
            );
            DistrictWeekReport::new(record, severity, anomaly, trend, category)
        })
        .collect();
    tracing::info!(
        distribution = %format_distribution(
            risk::RiskCategory::ALL
                .into_iter()
                .map(|c| (c, rows.iter().filter(|r| r.risk_category == c).count()))
        ),
        "risk classified"
    );

    let (forecasts, forecast_warnings) = forecast::forecast_districts(
        &records,
        &severities,
        &trends,
        &anomalies,
        &config.forecast,
        &config.risk,
    );
    let short = forecast_warnings.len();
    warnings.extend(forecast_warnings);
    tracing::info!(
        districts = forecasts.len(),
        reduced_fidelity = short,
        "forecasts generated"
    );

    Ok(EngineOutput {
        records: sort_reports(rows),
        forecasts,
        weights: estimate,
        warnings,
    })
}

fn format_distribution<T: std::fmt::Display>(
    counts: impl IntoIterator<Item = (T, usize)>,
) -> String {
    counts
        .into_iter()
        .map(|(label, n)| format!("{}={}", label, n))
        .collect::<Vec<_>>()
        .join(" ")
}

//! Output table rows, batch summary and rendering
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs
//! - No field finer-grained than a district

use crate::anomaly::AnomalyResult;
use crate::quality::{data_completeness, quality_flag, QualityFlag};
use crate::record::{DistrictWeekRecord, MetricFamily};
use crate::risk::RiskCategory;
use crate::severity::SeverityAssessment;
use crate::trends::{TrendLabel, TrendPoint};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of the engine's output table
///
/// Flat so it can be written to CSV as-is; undefined values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DistrictWeekReport {
    pub week_start: NaiveDate,
    pub state: String,
    pub district: String,
    pub enrol_total: i64,
    pub enrol_age_0_5: Option<i64>,
    pub enrol_age_5_17: Option<i64>,
    pub enrol_age_18_plus: Option<i64>,
    pub demo_total: i64,
    pub demo_age_5_17: Option<i64>,
    pub demo_age_18_plus: Option<i64>,
    pub bio_total: i64,
    pub bio_age_5_17: Option<i64>,
    pub bio_age_18_plus: Option<i64>,
    pub enrolment_percentile: f64,
    pub demographic_update_percentile: f64,
    pub biometric_update_percentile: f64,
    pub severity_score: f64,
    pub dominant_signal: MetricFamily,
    pub is_anomaly: bool,
    pub anomaly_score: Option<f64>,
    pub severity_ma4: Option<f64>,
    pub severity_change: Option<f64>,
    pub severity_momentum: Option<f64>,
    pub trend_label: TrendLabel,
    pub risk_category: RiskCategory,
    pub data_completeness: f64,
    pub data_quality_flag: QualityFlag,
}

impl DistrictWeekReport {
    /// Join a record with the columns derived for it
    pub fn new(
        record: &DistrictWeekRecord,
        severity: &SeverityAssessment,
        anomaly: &AnomalyResult,
        trend: &TrendPoint,
        risk_category: RiskCategory,
    ) -> Self {
        let enrol = record.enrolment.bands;
        let demo = record.demographic_update.bands;
        let bio = record.biometric_update.bands;
        let completeness = data_completeness(record);

        DistrictWeekReport {
            week_start: record.week_start,
            state: record.state.clone(),
            district: record.district.clone(),
            enrol_total: record.enrolment.total,
            enrol_age_0_5: enrol.map(|b| b.child),
            enrol_age_5_17: enrol.map(|b| b.transition),
            enrol_age_18_plus: enrol.map(|b| b.adult),
            demo_total: record.demographic_update.total,
            demo_age_5_17: demo.map(|b| b.transition),
            demo_age_18_plus: demo.map(|b| b.adult),
            bio_total: record.biometric_update.total,
            bio_age_5_17: bio.map(|b| b.transition),
            bio_age_18_plus: bio.map(|b| b.adult),
            enrolment_percentile: severity.percentiles.enrolment,
            demographic_update_percentile: severity.percentiles.demographic_update,
            biometric_update_percentile: severity.percentiles.biometric_update,
            severity_score: severity.score,
            dominant_signal: severity.dominant_signal,
            is_anomaly: anomaly.is_anomaly,
            anomaly_score: anomaly.anomaly_score,
            severity_ma4: trend.severity_ma4,
            severity_change: trend.severity_change,
            severity_momentum: trend.severity_momentum,
            trend_label: trend.trend_label,
            risk_category,
            data_completeness: completeness,
            data_quality_flag: quality_flag(completeness),
        }
    }
}

/// Sort rows by (state, district, week_start)
pub fn sort_reports(mut reports: Vec<DistrictWeekReport>) -> Vec<DistrictWeekReport> {
    reports.sort_by(|a, b| {
        a.state
            .cmp(&b.state)
            .then_with(|| a.district.cmp(&b.district))
            .then_with(|| a.week_start.cmp(&b.week_start))
    });
    reports
}

/// Render rows as text output
pub fn render_text(reports: &[DistrictWeekReport]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:<11} {:<20} {:<20} {:>8} {:<18} {:<14} {:<8} {}\n",
        "WEEK", "STATE", "DISTRICT", "SCORE", "TREND", "RISK", "ANOMALY", "DOMINANT"
    ));

    for report in reports {
        output.push_str(&format!(
            "{:<11} {:<20} {:<20} {:>8.2} {:<18} {:<14} {:<8} {}\n",
            report.week_start.to_string(),
            truncate_or_pad(&report.state, 20),
            truncate_or_pad(&report.district, 20),
            report.severity_score,
            report.trend_label.as_str(),
            report.risk_category.as_str(),
            if report.is_anomaly { "yes" } else { "-" },
            report.dominant_signal.as_str(),
        ));
    }

    output
}

/// Render rows as JSON output
pub fn render_json(reports: &[DistrictWeekReport]) -> String {
    serde_json::to_string_pretty(reports).unwrap_or_else(|_| "[]".to_string())
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        format!("{:<width$}", s, width = width)
    }
}

/// Batch-level counts derived from the output table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchSummary {
    pub rows: usize,
    pub districts: usize,
    pub weeks: usize,
    pub latest_week: Option<NaiveDate>,
    pub anomalies: usize,
    pub mean_severity: Option<f64>,
    pub risk_distribution: BTreeMap<RiskCategory, usize>,
    pub trend_distribution: BTreeMap<TrendLabel, usize>,
    pub dominant_signal_distribution: BTreeMap<MetricFamily, usize>,
    /// Districts classified Critical in the latest week, as `STATE/DISTRICT`
    pub latest_critical: Vec<String>,
}

/// Summarize an output table
pub fn summarize(reports: &[DistrictWeekReport]) -> BatchSummary {
    let districts: BTreeSet<(&str, &str)> = reports
        .iter()
        .map(|r| (r.state.as_str(), r.district.as_str()))
        .collect();
    let weeks: BTreeSet<NaiveDate> = reports.iter().map(|r| r.week_start).collect();
    let latest_week = weeks.iter().next_back().copied();

    let mut risk_distribution: BTreeMap<RiskCategory, usize> =
        RiskCategory::ALL.into_iter().map(|c| (c, 0)).collect();
    let mut trend_distribution: BTreeMap<TrendLabel, usize> =
        TrendLabel::ALL.into_iter().map(|t| (t, 0)).collect();
    let mut dominant_signal_distribution: BTreeMap<MetricFamily, usize> =
        MetricFamily::ALL.into_iter().map(|m| (m, 0)).collect();
    for report in reports {
        *risk_distribution.entry(report.risk_category).or_default() += 1;
        *trend_distribution.entry(report.trend_label).or_default() += 1;
        *dominant_signal_distribution
            .entry(report.dominant_signal)
            .or_default() += 1;
    }

    let mean_severity = (!reports.is_empty()).then(|| {
        reports.iter().map(|r| r.severity_score).sum::<f64>() / reports.len() as f64
    });

    let latest_critical = reports
        .iter()
        .filter(|r| Some(r.week_start) == latest_week && r.risk_category == RiskCategory::Critical)
        .map(|r| format!("{}/{}", r.state, r.district))
        .collect();

    BatchSummary {
        rows: reports.len(),
        districts: districts.len(),
        weeks: weeks.len(),
        latest_week,
        anomalies: reports.iter().filter(|r| r.is_anomaly).count(),
        mean_severity,
        risk_distribution,
        trend_distribution,
        dominant_signal_distribution,
        latest_critical,
    }
}

/// Share of `count` in `total` as a percentage; 0 for an empty total
pub(crate) fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Render a summary as text output
pub fn render_summary_text(summary: &BatchSummary) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{} district-weeks, {} districts, {} weeks",
        summary.rows, summary.districts, summary.weeks
    ));
    if let Some(week) = summary.latest_week {
        output.push_str(&format!(" (latest {})", week));
    }
    output.push('\n');
    if let Some(mean) = summary.mean_severity {
        output.push_str(&format!("Mean severity: {:.2}\n", mean));
    }
    output.push_str(&format!(
        "Anomalies: {} ({:.1}%)\n",
        summary.anomalies,
        percent(summary.anomalies, summary.rows)
    ));

    output.push_str("\nRisk categories:\n");
    for (category, count) in &summary.risk_distribution {
        output.push_str(&format!(
            "  {:<14} {:>6} ({:.1}%)\n",
            category.as_str(),
            count,
            percent(*count, summary.rows)
        ));
    }

    output.push_str("\nTrend labels:\n");
    for (label, count) in &summary.trend_distribution {
        output.push_str(&format!("  {:<18} {:>6}\n", label.as_str(), count));
    }

    output.push_str("\nDominant signal:\n");
    for (family, count) in &summary.dominant_signal_distribution {
        output.push_str(&format!("  {:<18} {:>6}\n", family.as_str(), count));
    }

    if !summary.latest_critical.is_empty() {
        output.push_str("\nCritical in latest week:\n");
        for district in &summary.latest_critical {
            output.push_str(&format!("  {}\n", district));
        }
    }

    output
}

/// Render a summary as JSON output
pub fn render_summary_json(summary: &BatchSummary) -> String {
    serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
}

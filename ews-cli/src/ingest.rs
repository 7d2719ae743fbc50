//! Weekly district table CSV
//!
//! The same row layout is read by `run` and written by `aggregate`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use ews_core::{AgeBands, DistrictWeekRecord, MetricCounts};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// One CSV row of the weekly table; age-band columns are optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRow {
    pub week_start: NaiveDate,
    pub state: String,
    pub district: String,
    #[serde(default)]
    pub enrol_total: Option<i64>,
    #[serde(default)]
    pub enrol_age_0_5: Option<i64>,
    #[serde(default)]
    pub enrol_age_5_17: Option<i64>,
    #[serde(default)]
    pub enrol_age_18_plus: Option<i64>,
    #[serde(default)]
    pub demo_total: Option<i64>,
    #[serde(default)]
    pub demo_age_5_17: Option<i64>,
    #[serde(default)]
    pub demo_age_18_plus: Option<i64>,
    #[serde(default)]
    pub bio_total: Option<i64>,
    #[serde(default)]
    pub bio_age_5_17: Option<i64>,
    #[serde(default)]
    pub bio_age_18_plus: Option<i64>,
}

impl WeeklyRow {
    /// Convert to an engine record; `line` is used for error messages only
    pub fn into_record(self, line: usize) -> Result<DistrictWeekRecord> {
        let enrolment = family_counts(
            "enrol",
            line,
            self.enrol_total,
            [self.enrol_age_0_5, self.enrol_age_5_17, self.enrol_age_18_plus],
        )?;
        let demographic_update = family_counts(
            "demo",
            line,
            self.demo_total,
            [None, self.demo_age_5_17, self.demo_age_18_plus],
        )?;
        let biometric_update = family_counts(
            "bio",
            line,
            self.bio_total,
            [None, self.bio_age_5_17, self.bio_age_18_plus],
        )?;

        Ok(DistrictWeekRecord::new(
            self.week_start,
            self.state.trim(),
            self.district.trim(),
            enrolment,
            demographic_update,
            biometric_update,
        ))
    }

    pub fn from_record(record: &DistrictWeekRecord) -> Self {
        let enrol = record.enrolment.bands;
        let demo = record.demographic_update.bands;
        let bio = record.biometric_update.bands;
        WeeklyRow {
            week_start: record.week_start,
            state: record.state.clone(),
            district: record.district.clone(),
            enrol_total: Some(record.enrolment.total),
            enrol_age_0_5: enrol.map(|b| b.child),
            enrol_age_5_17: enrol.map(|b| b.transition),
            enrol_age_18_plus: enrol.map(|b| b.adult),
            demo_total: Some(record.demographic_update.total),
            demo_age_5_17: demo.map(|b| b.transition),
            demo_age_18_plus: demo.map(|b| b.adult),
            bio_total: Some(record.biometric_update.total),
            bio_age_5_17: bio.map(|b| b.transition),
            bio_age_18_plus: bio.map(|b| b.adult),
        }
    }
}

/// Build counts from a total and optional (child, transition, adult) columns
///
/// Bands are attached when any band column is present; absent bands count
/// as zero. A missing total is derived from the bands.
fn family_counts(
    prefix: &str,
    line: usize,
    total: Option<i64>,
    bands: [Option<i64>; 3],
) -> Result<MetricCounts> {
    let bands = bands.iter().any(Option::is_some).then(|| {
        AgeBands::new(
            bands[0].unwrap_or(0),
            bands[1].unwrap_or(0),
            bands[2].unwrap_or(0),
        )
    });

    match (total, bands) {
        (Some(total), bands) => Ok(MetricCounts { total, bands }),
        (None, Some(bands)) => MetricCounts::from_bands(bands).ok_or_else(|| {
            anyhow::anyhow!("line {}: {} age bands overflow when summed", line, prefix)
        }),
        (None, None) => anyhow::bail!("line {}: missing {}_total", line, prefix),
    }
}

/// Parse weekly rows from any reader
pub fn parse_weekly<R: Read>(reader: R) -> Result<Vec<DistrictWeekRecord>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (i, result) in rdr.deserialize::<WeeklyRow>().enumerate() {
        // Header is line 1
        let line = i + 2;
        let row = result.with_context(|| format!("line {}: malformed weekly row", line))?;
        records.push(row.into_record(line)?);
    }

    tracing::debug!("Parsed {} weekly rows", records.len());
    Ok(records)
}

/// Load the weekly table from a CSV file
pub fn load_weekly(path: &Path) -> Result<Vec<DistrictWeekRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open weekly table: {}", path.display()))?;
    parse_weekly(file).with_context(|| format!("failed to parse weekly table: {}", path.display()))
}

/// Write weekly rows as CSV
pub fn write_weekly<W: Write>(writer: W, records: &[DistrictWeekRecord]) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    for record in records {
        wtr.serialize(WeeklyRow::from_record(record))?;
    }
    wtr.flush()?;
    Ok(())
}

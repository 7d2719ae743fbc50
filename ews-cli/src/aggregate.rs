//! Daily PIN-level logs to the weekly district table
//!
//! Each daily record is mapped to a canonical (state, district) through the
//! PIN reference, aligned to the Monday of its ISO week and summed per
//! family. The three families are outer-joined with zero fill. PIN codes
//! never leave this module.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use csv::ReaderBuilder;
use ews_core::{AgeBands, DistrictWeekRecord, MetricCounts, MetricFamily};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

/// Date format of the daily logs
pub const DAILY_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Deserialize)]
struct PinRow {
    pincode: String,
    district: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct EnrolmentDay {
    date: String,
    state: String,
    district: String,
    pincode: String,
    age_0_5: i64,
    age_5_17: i64,
    age_18_greater: i64,
}

#[derive(Debug, Deserialize)]
struct DemographicDay {
    date: String,
    state: String,
    district: String,
    pincode: String,
    demo_age_5_17: i64,
    demo_age_17_: i64,
}

#[derive(Debug, Deserialize)]
struct BiometricDay {
    date: String,
    state: String,
    district: String,
    pincode: String,
    bio_age_5_17: i64,
    bio_age_17_: i64,
}

/// A daily row reduced to what aggregation needs
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRecord {
    pub date: Option<NaiveDate>,
    pub state: String,
    pub district: String,
    pub pincode: String,
    pub bands: AgeBands,
}

/// PIN code to canonical (state, district)
#[derive(Debug, Default)]
pub struct PinDirectory {
    entries: HashMap<String, (String, String)>,
}

fn canonical_name(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl PinDirectory {
    /// First reference row per PIN wins
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = HashMap::new();
        for result in rdr.deserialize::<PinRow>() {
            let row = result.context("malformed PIN reference row")?;
            entries
                .entry(row.pincode.trim().to_string())
                .or_insert_with(|| (canonical_name(&row.state), canonical_name(&row.district)));
        }

        tracing::debug!("PIN reference: {} unique PINs", entries.len());
        Ok(PinDirectory { entries })
    }

    pub fn resolve(&self, pincode: &str) -> Option<&(String, String)> {
        self.entries.get(pincode.trim())
    }
}

/// Geo-cleaning outcome for one family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoCleaningSummary {
    pub family: MetricFamily,
    pub records: usize,
    pub skipped_dates: usize,
    pub unresolved_pins: usize,
    pub states_before: usize,
    pub states_after: usize,
    pub districts_before: usize,
    pub districts_after: usize,
}

/// Monday of the ISO week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DAILY_DATE_FORMAT).ok()
}

fn read_daily<R, T, F>(reader: R, convert: F) -> Result<Vec<DailyRecord>>
where
    R: Read,
    T: serde::de::DeserializeOwned,
    F: Fn(T) -> DailyRecord,
{
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<T>().enumerate() {
        let row = result.with_context(|| format!("line {}: malformed daily row", i + 2))?;
        rows.push(convert(row));
    }
    Ok(rows)
}

/// Parse a daily log for `family`
pub fn parse_daily<R: Read>(family: MetricFamily, reader: R) -> Result<Vec<DailyRecord>> {
    match family {
        MetricFamily::Enrolment => read_daily(reader, |r: EnrolmentDay| DailyRecord {
            date: parse_date(&r.date),
            state: r.state,
            district: r.district,
            pincode: r.pincode,
            bands: AgeBands::new(r.age_0_5, r.age_5_17, r.age_18_greater),
        }),
        MetricFamily::DemographicUpdate => read_daily(reader, |r: DemographicDay| DailyRecord {
            date: parse_date(&r.date),
            state: r.state,
            district: r.district,
            pincode: r.pincode,
            bands: AgeBands::new(0, r.demo_age_5_17, r.demo_age_17_),
        }),
        MetricFamily::BiometricUpdate => read_daily(reader, |r: BiometricDay| DailyRecord {
            date: parse_date(&r.date),
            state: r.state,
            district: r.district,
            pincode: r.pincode,
            bands: AgeBands::new(0, r.bio_age_5_17, r.bio_age_17_),
        }),
    }
}

type WeekKey = (NaiveDate, String, String);

/// Weekly band sums for one family plus its geo-cleaning summary
pub fn canonicalize_and_sum(
    family: MetricFamily,
    daily: &[DailyRecord],
    pins: &PinDirectory,
) -> Result<(BTreeMap<WeekKey, AgeBands>, GeoCleaningSummary)> {
    let mut weekly: BTreeMap<WeekKey, AgeBands> = BTreeMap::new();
    let mut unresolved: HashSet<&str> = HashSet::new();
    let mut states_before: HashSet<&str> = HashSet::new();
    let mut districts_before: HashSet<&str> = HashSet::new();
    let mut states_after: HashSet<String> = HashSet::new();
    let mut districts_after: HashSet<String> = HashSet::new();
    let mut skipped_dates = 0;

    for record in daily {
        states_before.insert(record.state.as_str());
        districts_before.insert(record.district.as_str());

        let (state, district) = match pins.resolve(&record.pincode) {
            Some((state, district)) => (state.clone(), district.clone()),
            None => {
                unresolved.insert(record.pincode.trim());
                (canonical_name(&record.state), canonical_name(&record.district))
            }
        };
        states_after.insert(state.clone());
        districts_after.insert(district.clone());

        let Some(date) = record.date else {
            skipped_dates += 1;
            continue;
        };

        let key = (week_start(date), state, district);
        let entry = weekly.entry(key.clone()).or_default();
        *entry = add_bands(entry, &record.bands).with_context(|| {
            format!(
                "{} counts overflow for week {} ({}/{})",
                family, key.0, key.1, key.2
            )
        })?;
    }

    let summary = GeoCleaningSummary {
        family,
        records: daily.len(),
        skipped_dates,
        unresolved_pins: unresolved.len(),
        states_before: states_before.len(),
        states_after: states_after.len(),
        districts_before: districts_before.len(),
        districts_after: districts_after.len(),
    };
    if skipped_dates > 0 {
        tracing::warn!(family = %family, skipped = skipped_dates, "rows with unparseable dates skipped");
    }
    tracing::info!(
        family = %family,
        states = %format!("{}->{}", summary.states_before, summary.states_after),
        districts = %format!("{}->{}", summary.districts_before, summary.districts_after),
        unresolved_pins = summary.unresolved_pins,
        "geography canonicalized"
    );

    Ok((weekly, summary))
}

fn add_bands(acc: &AgeBands, row: &AgeBands) -> Option<AgeBands> {
    Some(AgeBands::new(
        acc.child.checked_add(row.child)?,
        acc.transition.checked_add(row.transition)?,
        acc.adult.checked_add(row.adult)?,
    ))
}

/// Outer-join the three families into district-week records
///
/// A family with no rows for a key contributes zero bands. Fails when a
/// family's bands cannot be summed into a total.
pub fn join_families(
    enrolment: BTreeMap<WeekKey, AgeBands>,
    demographic: BTreeMap<WeekKey, AgeBands>,
    biometric: BTreeMap<WeekKey, AgeBands>,
) -> Result<Vec<DistrictWeekRecord>> {
    let keys: BTreeSet<&WeekKey> = enrolment
        .keys()
        .chain(demographic.keys())
        .chain(biometric.keys())
        .collect();

    keys.into_iter()
        .map(|key| {
            let counts = |family: MetricFamily, map: &BTreeMap<WeekKey, AgeBands>| {
                MetricCounts::from_bands(map.get(key).copied().unwrap_or_default()).with_context(
                    || {
                        format!(
                            "{} total overflows for week {} ({}/{})",
                            family, key.0, key.1, key.2
                        )
                    },
                )
            };
            Ok(DistrictWeekRecord::new(
                key.0,
                key.1.clone(),
                key.2.clone(),
                counts(MetricFamily::Enrolment, &enrolment)?,
                counts(MetricFamily::DemographicUpdate, &demographic)?,
                counts(MetricFamily::BiometricUpdate, &biometric)?,
            ))
        })
        .collect()
}

/// Input files for one aggregation run
pub struct DailyInputs<'a> {
    pub enrolment: &'a Path,
    pub demographic: &'a Path,
    pub biometric: &'a Path,
    pub pincode: &'a Path,
}

/// Aggregate daily files into the weekly table
pub fn aggregate_files(
    inputs: &DailyInputs<'_>,
) -> Result<(Vec<DistrictWeekRecord>, Vec<GeoCleaningSummary>)> {
    let pin_file = std::fs::File::open(inputs.pincode)
        .with_context(|| format!("failed to open PIN reference: {}", inputs.pincode.display()))?;
    let pins = PinDirectory::parse(pin_file)
        .with_context(|| format!("failed to parse PIN reference: {}", inputs.pincode.display()))?;

    let progress = ProgressBar::new(MetricFamily::ALL.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:20}] {pos}/{len} {msg}") {
        progress.set_style(style.progress_chars("=> "));
    }
    progress.set_message("daily logs");

    let families = [
        (MetricFamily::Enrolment, inputs.enrolment),
        (MetricFamily::DemographicUpdate, inputs.demographic),
        (MetricFamily::BiometricUpdate, inputs.biometric),
    ];
    // Families are independent until the join; results keep input order
    let per_family: Vec<(BTreeMap<WeekKey, AgeBands>, GeoCleaningSummary)> = families
        .into_par_iter()
        .map(|(family, path)| -> Result<_> {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {} log: {}", family, path.display()))?;
            let daily = parse_daily(family, file)
                .with_context(|| format!("failed to parse {} log: {}", family, path.display()))?;
            let result = canonicalize_and_sum(family, &daily, &pins)?;
            progress.inc(1);
            Ok(result)
        })
        .collect::<Result<_>>()?;
    progress.finish_and_clear();

    let (mut weekly, summaries): (Vec<_>, Vec<_>) = per_family.into_iter().unzip();
    let biometric = weekly.pop().unwrap_or_default();
    let demographic = weekly.pop().unwrap_or_default();
    let enrolment = weekly.pop().unwrap_or_default();
    let records = join_families(enrolment, demographic, biometric)?;

    let districts: BTreeSet<(&str, &str)> = records
        .iter()
        .map(|r| (r.state.as_str(), r.district.as_str()))
        .collect();
    let weeks: BTreeSet<NaiveDate> = records.iter().map(|r| r.week_start).collect();
    tracing::info!(
        rows = records.len(),
        districts = districts.len(),
        weeks = weeks.len(),
        "weekly table aggregated"
    );

    Ok((records, summaries))
}

//! Batch schema validation
//!
//! Runs before any scoring stage. Every violation in the batch is collected
//! so a rejected input can be fixed in one pass.

use crate::error::SchemaViolation;
use crate::record::{DistrictWeekRecord, MetricFamily};
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

/// Check a batch against the input contract
///
/// Returns every violation found, in input order. An empty vector means the
/// batch may be scored.
pub fn validate_batch(records: &[DistrictWeekRecord]) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    let mut seen: HashSet<(NaiveDate, &str, &str)> = HashSet::with_capacity(records.len());

    for record in records {
        if !seen.insert((
            record.week_start,
            record.state.as_str(),
            record.district.as_str(),
        )) {
            violations.push(SchemaViolation::DuplicateKey {
                week_start: record.week_start,
                state: record.state.clone(),
                district: record.district.clone(),
            });
        }

        if record.week_start.weekday() != Weekday::Mon {
            violations.push(SchemaViolation::MisalignedWeek {
                week_start: record.week_start,
                state: record.state.clone(),
                district: record.district.clone(),
            });
        }

        for family in MetricFamily::ALL {
            check_family(record, family, &mut violations);
        }
    }

    violations
}

fn check_family(
    record: &DistrictWeekRecord,
    family: MetricFamily,
    violations: &mut Vec<SchemaViolation>,
) {
    let counts = record.counts(family);
    let negative = |value: i64| SchemaViolation::NegativeValue {
        week_start: record.week_start,
        state: record.state.clone(),
        district: record.district.clone(),
        family,
        value,
    };

    if counts.total < 0 {
        violations.push(negative(counts.total));
    }

    let Some(bands) = counts.bands else {
        return;
    };

    for value in [bands.child, bands.transition, bands.adult] {
        if value < 0 {
            violations.push(negative(value));
        }
    }

    match bands.sum() {
        None => violations.push(SchemaViolation::BandSumOverflow {
            week_start: record.week_start,
            state: record.state.clone(),
            district: record.district.clone(),
            family,
        }),
        Some(band_sum) if band_sum != counts.total => {
            violations.push(SchemaViolation::AgeBandMismatch {
                week_start: record.week_start,
                state: record.state.clone(),
                district: record.district.clone(),
                family,
                band_sum,
                total: counts.total,
            })
        }
        Some(_) => {}
    }
}

//! Activity-based backfill for a sector with poor direct coverage.
//!
//! A single global emission factor per (gas, year) is derived from countries
//! that report both a non-zero emission and an activity level, then applied
//! to countries whose gap-filled value is exactly zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{EmissionsRow, YearSeries, COMP_YEARS, N_YEARS};

/// Per-country activity levels, keyed by country id.
pub type ActivityTable = BTreeMap<String, YearSeries>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityOptions {
    pub sector: String,
    pub gases: Vec<String>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            sector: "lime".to_string(),
            gases: vec!["co2".to_string(), "ch4".to_string(), "n2o".to_string()],
        }
    }
}

/// Global emission factor per comparison year for `sector`/`gas`.
///
/// The numerator sums every present emission of the sector/gas rows; the
/// denominator sums the activity of those rows' countries, zero emitters
/// included. A year whose summed activity is zero, or whose ratio is not
/// finite, has no factor.
pub fn global_emission_factors(
    rows: &[EmissionsRow],
    activity: &ActivityTable,
    sector: &str,
    gas: &str,
) -> YearSeries {
    let mut emissions = [0.0_f64; N_YEARS];
    let mut levels = [0.0_f64; N_YEARS];

    for row in rows.iter().filter(|r| r.sector == sector && r.gas == gas) {
        for (e, v) in emissions.iter_mut().zip(row.values.cells()) {
            *e += v.unwrap_or(0.0);
        }
        if let Some(act) = activity.get(&row.id) {
            for (l, a) in levels.iter_mut().zip(act.cells()) {
                *l += a.unwrap_or(0.0);
            }
        }
    }

    let mut factors = [None; N_YEARS];
    for (i, f) in factors.iter_mut().enumerate() {
        if levels[i] != 0.0 {
            *f = Some(emissions[i] / levels[i]).filter(|v| v.is_finite());
        }
    }
    YearSeries::from_cells(factors)
}

/// Replaces zero cells of the configured sector with activity × global factor.
///
/// Non-zero and absent cells are left as they are. A zero cell with an
/// activity value but no finite estimate becomes absent.
pub fn update_based_on_activity(
    rows: &[EmissionsRow],
    activity: &ActivityTable,
    opts: &ActivityOptions,
) -> Vec<EmissionsRow> {
    let mut out = rows.to_vec();

    for gas in &opts.gases {
        let factors = global_emission_factors(rows, activity, &opts.sector, gas);
        debug!(gas = %gas, sector = %opts.sector, ?factors, "global emission factors");

        let mut inferred = 0usize;
        let mut undefined = 0usize;
        for row in out
            .iter_mut()
            .filter(|r| r.sector == opts.sector && &r.gas == gas)
        {
            let Some(act) = activity.get(&row.id) else {
                continue;
            };
            for year in COMP_YEARS {
                if row.values.get(year) != Some(0.0) {
                    continue;
                }
                let Some(a) = act.get(year) else {
                    continue;
                };
                let estimate = factors.get(year).map(|ef| a * ef).filter(|v| v.is_finite());
                if estimate.is_none() {
                    undefined += 1;
                } else {
                    inferred += 1;
                }
                row.values.set(year, estimate);
            }
        }
        debug!(gas = %gas, cells = inferred, undefined, "cells inferred from activity");
    }
    out
}

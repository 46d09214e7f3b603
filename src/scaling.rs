//! Country scaling factors estimated from paired national inventory series.
//!
//! A direct-emissions sector is derived from a reported combustion sector by
//! a per-country factor. The factor is the regression slope of target on
//! reference when the fit is positive and significant over enough years, and
//! the mean of the yearly ratios otherwise.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::debug;

use crate::error::{GapFillError, Result};

/// Slope is used only below this two-sided p-value.
pub const SLOPE_P_VALUE: f64 = 0.1;

/// Slope needs at least this many paired years.
pub const MIN_SLOPE_POINTS: usize = 5;

/// Notation keys national inventories use in place of a number.
pub const NOT_REPORTED: [&str; 5] = ["NE", "NO", "IE", "NA", "NO,IE"];

const PARTY_COL: &str = "Party";
const SECTOR_COL: &str = "Sector";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorMethod {
    Slope,
    MeanRatio,
}

/// Ordinary least squares fit of y on x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    /// Two-sided p-value for a zero slope.
    pub p_value: f64,
    pub points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingEstimate {
    pub factor: f64,
    pub method: FactorMethod,
    pub points: usize,
}

/// Where to estimate factors from, and for which countries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingEstimation {
    /// National series CSV (`Party, Sector, <years>`).
    pub path: PathBuf,
    pub reference_sector: String,
    pub target_sector: String,
    pub first_year: i32,
    pub last_year: i32,
    /// ISO3 code to party name in the national series.
    pub parties: BTreeMap<String, String>,
}

impl Default for ScalingEstimation {
    fn default() -> Self {
        let parties = [
            ("AUS", "Australia"),
            ("IRL", "Ireland"),
            ("JPN", "Japan"),
            ("LVA", "Latvia"),
            ("NLD", "Netherlands"),
            ("NOR", "Norway"),
        ]
        .into_iter()
        .map(|(iso, party)| (iso.to_string(), party.to_string()))
        .collect();

        Self {
            path: PathBuf::from("CO2_annual_1A2e_2H2_emissions_in_kt.csv"),
            reference_sector: "1.A.2.e  Food Processing, Beverages and Tobacco".to_string(),
            target_sector: "2.H.2  Food and Beverages Industry".to_string(),
            first_year: 1990,
            last_year: 2021,
            parties,
        }
    }
}

/// One party/sector row of a national inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct NationalSeries {
    pub party: String,
    pub sector: String,
    pub values: BTreeMap<i32, Option<f64>>,
}

pub fn linear_regression(pairs: &[(f64, f64)]) -> Option<Regression> {
    let n = pairs.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let x_mean = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let y_mean = pairs.iter().map(|p| p.1).sum::<f64>() / nf;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let (dx, dy) = (x - x_mean, y - y_mean);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    // All x identical: no slope.
    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let r_value = if syy == 0.0 {
        0.0
    } else {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    };

    let p_value = if n == 2 {
        if syy == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        let df = nf - 2.0;
        let t = r_value * (df / ((1.0 - r_value) * (1.0 + r_value) + 1e-20)).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df).ok()?;
        2.0 * (1.0 - dist.cdf(t.abs()))
    };

    Some(Regression {
        slope,
        intercept,
        r_value,
        p_value,
        points: n,
    })
}

/// Factor turning `reference` values into `target` values.
///
/// Only years present and finite in both series are used. Returns `None`
/// when no year pairs up or no ratio is finite.
pub fn estimate_scaling_factor(reference: &[Option<f64>], target: &[Option<f64>]) -> Option<ScalingEstimate> {
    let pairs: Vec<(f64, f64)> = reference
        .iter()
        .zip(target)
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((*x, *y)),
            _ => None,
        })
        .collect();
    if pairs.is_empty() {
        return None;
    }

    if let Some(reg) = linear_regression(&pairs) {
        if reg.slope > 0.0 && reg.p_value < SLOPE_P_VALUE && reg.points >= MIN_SLOPE_POINTS {
            return Some(ScalingEstimate {
                factor: reg.slope,
                method: FactorMethod::Slope,
                points: reg.points,
            });
        }
    }

    let ratios: Vec<f64> = pairs
        .iter()
        .map(|(x, y)| y / x)
        .filter(|r| r.is_finite())
        .collect();
    if ratios.is_empty() {
        return None;
    }
    let factor = ratios.iter().sum::<f64>() / ratios.len() as f64;
    Some(ScalingEstimate {
        factor,
        method: FactorMethod::MeanRatio,
        points: pairs.len(),
    })
}

/// Estimates a factor for every configured country with both series.
pub fn estimate_country_factors(series: &[NationalSeries], opts: &ScalingEstimation) -> BTreeMap<String, f64> {
    let find = |party: &str, sector: &str| {
        series
            .iter()
            .find(|s| s.party == party && s.sector == sector)
    };
    let years: Vec<i32> = (opts.first_year..=opts.last_year).collect();

    let mut out = BTreeMap::new();
    for (iso3, party) in &opts.parties {
        let (Some(reference), Some(target)) =
            (find(party, &opts.reference_sector), find(party, &opts.target_sector))
        else {
            debug!(party = %party, "no paired national series");
            continue;
        };
        let cells = |s: &NationalSeries| -> Vec<Option<f64>> {
            years.iter().map(|y| s.values.get(y).copied().flatten()).collect()
        };
        match estimate_scaling_factor(&cells(reference), &cells(target)) {
            Some(est) => {
                debug!(country = %iso3, factor = est.factor, method = ?est.method, points = est.points, "scaling factor");
                out.insert(iso3.clone(), est.factor);
            }
            None => debug!(country = %iso3, "no usable years for scaling factor"),
        }
    }
    out
}

fn parse_national_cell(path: &Path, year: i32, raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() || NOT_REPORTED.contains(&raw) {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(|v| Some(v).filter(|v| v.is_finite()))
        .map_err(|_| GapFillError::InvalidNumber {
            path: path.to_path_buf(),
            column: year.to_string(),
            value: raw.to_string(),
        })
}

/// Reads a national inventory table. Party and sector names are trimmed.
pub fn read_national_series(path: &Path) -> Result<Vec<NationalSeries>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = rdr.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| GapFillError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let party_col = column(PARTY_COL)?;
    let sector_col = column(SECTOR_COL)?;
    let year_cols: Vec<(usize, i32)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.parse::<i32>().ok().map(|y| (i, y)))
        .collect();

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut values = BTreeMap::new();
        for &(i, year) in &year_cols {
            let raw = record.get(i).unwrap_or("");
            values.insert(year, parse_national_cell(path, year, raw)?);
        }
        out.push(NationalSeries {
            party: record.get(party_col).unwrap_or("").to_string(),
            sector: record.get(sector_col).unwrap_or("").to_string(),
            values,
        });
    }
    Ok(out)
}

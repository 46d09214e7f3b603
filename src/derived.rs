//! Synthetic sectors of the combustion-derived inventory.
//!
//! A combustion sector reported in aggregate by one inventory is split
//! between process sectors in proportion to their share in another
//! inventory. Country scaling factors derive direct emissions from a
//! reported combustion sector.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GapFillError, Result};
use crate::scaling::ScalingEstimation;
use crate::types::{EmissionsRow, YearSeries, N_YEARS, TONNES};

pub const DERIVED_SOURCE: &str = "ceds-derived";

/// Tolerance of the apportionment closure check.
pub const CLOSURE_TOLERANCE: f64 = 1e-5;

/// One apportioned sector written to the derived inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apportionment {
    pub contributing_sector: String,
    pub new_sector: String,
}

/// Country-specific scaling of one sector/gas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub source_sector: String,
    pub gas: String,
    pub new_sector: String,
    /// Fixed factors. These override estimated ones.
    #[serde(default)]
    pub factors: BTreeMap<String, f64>,
    /// Estimate further factors from national inventory series.
    #[serde(default)]
    pub estimate: Option<ScalingEstimation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationOptions {
    /// Process sectors whose shares split the base sector.
    pub add_sectors: Vec<String>,
    /// Aggregate combustion sector being split.
    pub base_sector: String,
    pub apportion: Vec<Apportionment>,
    pub scaling: Option<Scaling>,
}

impl Default for DerivationOptions {
    fn default() -> Self {
        let apportion = [
            ("2.A.2 Lime production", "lime-combustion"),
            ("2.A.3 Glass Production", "glass-combustion"),
            ("2.A.4 Other Process Uses of Carbonates", "misc-mineral-industry-combustion"),
        ]
        .into_iter()
        .map(|(c, n)| Apportionment {
            contributing_sector: c.to_string(),
            new_sector: n.to_string(),
        })
        .collect();

        Self {
            add_sectors: [
                "2.A.3 Glass Production",
                "2.A.1 Cement production",
                "2.A.2 Lime production",
                "2.A.4 Other Process Uses of Carbonates",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            base_sector: "1A2f_Ind-Comb-Non-metalic-minerals".to_string(),
            apportion,
            scaling: None,
        }
    }
}

type CountryGas = (String, String);

fn by_country_gas<'a>(
    rows: impl IntoIterator<Item = &'a EmissionsRow>,
) -> BTreeMap<CountryGas, &'a EmissionsRow> {
    let mut out = BTreeMap::new();
    for row in rows {
        out.entry((row.id.clone(), row.gas.clone())).or_insert(row);
    }
    out
}

/// Share of `contributing_sector` in the sum of `add_sectors`, applied to
/// the base sector rows.
///
/// Absent cells count as zero in the sum. An undefined share (zero total or
/// absent contribution) is zero, as is an absent base value. Only countries
/// and gases present in all three inputs produce a row.
pub fn sector_fractional_contribution(
    inventory: &[EmissionsRow],
    add_sectors: &[String],
    contributing_sector: &str,
    base_rows: &[EmissionsRow],
    new_sector: &str,
) -> Vec<EmissionsRow> {
    let mut totals: BTreeMap<CountryGas, [f64; N_YEARS]> = BTreeMap::new();
    for row in inventory.iter().filter(|r| add_sectors.contains(&r.sector)) {
        let total = totals
            .entry((row.id.clone(), row.gas.clone()))
            .or_insert([0.0; N_YEARS]);
        for (t, v) in total.iter_mut().zip(row.values.cells()) {
            *t += v.unwrap_or(0.0);
        }
    }

    let contributing = by_country_gas(inventory.iter().filter(|r| r.sector == contributing_sector));
    let base = by_country_gas(base_rows);

    let mut out = Vec::new();
    for (key, total) in &totals {
        let (Some(part), Some(base_row)) = (contributing.get(key), base.get(key)) else {
            continue;
        };
        let mut cells = [None; N_YEARS];
        for (i, cell) in cells.iter_mut().enumerate() {
            let share = match part.values.cells()[i] {
                Some(p) if total[i] != 0.0 => p / total[i],
                _ => 0.0,
            };
            let value = base_row.values.cells()[i].map_or(0.0, |b| share * b);
            *cell = Some(if value.is_finite() { value } else { 0.0 });
        }
        out.push(EmissionsRow::new(
            key.0.as_str(),
            new_sector,
            key.1.as_str(),
            DERIVED_SOURCE,
            TONNES,
            YearSeries::from_cells(cells),
        ));
    }
    debug!(sector = new_sector, rows = out.len(), "apportioned sector");
    out
}

/// Checks that apportioned parts add back up to the base sector.
///
/// Per year, the differences summed over every (country, gas) present in all
/// parts and in the base must stay within `tolerance`. Absent cells are
/// skipped.
pub fn fractions_close(parts: &[Vec<EmissionsRow>], base_rows: &[EmissionsRow], tolerance: f64) -> bool {
    let part_maps: Vec<_> = parts.iter().map(|p| by_country_gas(p)).collect();
    let base = by_country_gas(base_rows);

    let mut residual = [0.0_f64; N_YEARS];
    for (key, base_row) in &base {
        let rows: Option<Vec<&EmissionsRow>> = part_maps.iter().map(|m| m.get(key).copied()).collect();
        let Some(rows) = rows else {
            continue;
        };
        for (i, r) in residual.iter_mut().enumerate() {
            let Some(b) = base_row.values.cells()[i] else {
                continue;
            };
            let summed: f64 = rows.iter().filter_map(|row| row.values.cells()[i]).sum();
            *r += summed - b;
        }
    }
    residual.iter().all(|r| r.abs() < tolerance)
}

/// Multiplies `source_sector`/`gas` rows by a per-country factor.
/// Countries without a factor are left out.
pub fn apply_scaling_factors(rows: &[EmissionsRow], scaling: &Scaling) -> Vec<EmissionsRow> {
    rows.iter()
        .filter(|r| r.sector == scaling.source_sector && r.gas == scaling.gas)
        .filter_map(|r| {
            let factor = scaling.factors.get(&r.id)?;
            Some(EmissionsRow::new(
                r.id.as_str(),
                scaling.new_sector.as_str(),
                r.gas.as_str(),
                DERIVED_SOURCE,
                TONNES,
                r.values.scale(*factor),
            ))
        })
        .collect()
}

/// Builds the derived inventory from the process inventory (`inventory`)
/// and the combustion inventory (`combustion`).
///
/// Every add-sector is apportioned for the closure check; only the
/// configured apportionments are returned. Fails if the parts do not add
/// back to the base sector.
pub fn derive_sectors(
    inventory: &[EmissionsRow],
    combustion: &[EmissionsRow],
    opts: &DerivationOptions,
) -> Result<Vec<EmissionsRow>> {
    let base: Vec<EmissionsRow> = combustion
        .iter()
        .filter(|r| r.sector == opts.base_sector)
        .cloned()
        .collect();

    let mut parts: HashMap<&str, Vec<EmissionsRow>> = HashMap::new();
    for sector in &opts.add_sectors {
        let rows = sector_fractional_contribution(inventory, &opts.add_sectors, sector, &base, sector);
        parts.insert(sector.as_str(), rows);
    }

    let all_parts: Vec<Vec<EmissionsRow>> = parts.values().cloned().collect();
    if !fractions_close(&all_parts, &base, CLOSURE_TOLERANCE) {
        return Err(GapFillError::Apportionment {
            base_sector: opts.base_sector.clone(),
        });
    }

    let mut out = Vec::new();
    for a in &opts.apportion {
        let rows = match parts.get(a.contributing_sector.as_str()) {
            Some(rows) => rows.clone(),
            None => sector_fractional_contribution(
                inventory,
                &opts.add_sectors,
                &a.contributing_sector,
                &base,
                &a.new_sector,
            ),
        };
        out.extend(rows.into_iter().map(|mut r| {
            r.sector = a.new_sector.clone();
            r
        }));
    }
    if let Some(scaling) = &opts.scaling {
        out.extend(apply_scaling_factors(combustion, scaling));
    }

    out.sort_by(|a, b| (&a.id, &a.sector, &a.gas).cmp(&(&b.id, &b.sector, &b.gas)));
    info!(rows = out.len(), "derived sectors");
    Ok(out)
}

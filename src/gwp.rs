//! CO2-equivalent aggregation over 20- and 100-year horizons.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reference::{GasFactor, ReferenceData};
use crate::types::{gas, EmissionsRow, YearSeries};

pub const FOSSIL: &str = "fossil";
pub const NON_FOSSIL: &str = "non-fossil";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Horizon {
    Twenty,
    Hundred,
}

impl Horizon {
    pub const ALL: [Horizon; 2] = [Horizon::Twenty, Horizon::Hundred];

    pub fn years(self) -> u32 {
        match self {
            Horizon::Twenty => 20,
            Horizon::Hundred => 100,
        }
    }

    /// Gas label of the aggregated series, e.g. `co2e_100yr`.
    pub fn output_gas(self) -> &'static str {
        match self {
            Horizon::Twenty => gas::CO2E_20YR,
            Horizon::Hundred => gas::CO2E_100YR,
        }
    }

    pub fn multiplier(self, factor: &GasFactor) -> f64 {
        match self {
            Horizon::Twenty => factor.co2e_20,
            Horizon::Hundred => factor.co2e_100,
        }
    }
}

impl TryFrom<u32> for Horizon {
    type Error = String;

    fn try_from(years: u32) -> Result<Self, Self::Error> {
        match years {
            20 => Ok(Horizon::Twenty),
            100 => Ok(Horizon::Hundred),
            other => Err(format!("unsupported GWP horizon {other}, expected 20 or 100")),
        }
    }
}

impl From<Horizon> for u32 {
    fn from(h: Horizon) -> u32 {
        h.years()
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}yr", self.years())
    }
}

/// Outcome of mapping a row's gas onto the gas table.
#[derive(Debug, PartialEq)]
pub enum GasResolution<'a> {
    Resolved(&'a GasFactor),
    Unknown,
    Ambiguous(Vec<&'a str>),
}

/// Maps `gas` to a single gas-table entry.
///
/// Candidates are the entry named `gas` and any `<gas>_<variant>` entry.
/// Methane is narrowed to its fossil or non-fossil variant by sector.
pub fn resolve_gas<'a>(refs: &'a ReferenceData, row_gas: &str, sector: &str) -> GasResolution<'a> {
    let name = row_gas.trim().to_lowercase();
    let prefix = format!("{name}_");
    let mut candidates: Vec<&'a GasFactor> = refs
        .gases
        .factors()
        .iter()
        .filter(|f| f.gas == name || f.gas.starts_with(&prefix))
        .collect();

    if name == gas::CH4 && candidates.len() > 1 {
        let variant = if refs.is_non_fossil(sector) {
            NON_FOSSIL
        } else {
            FOSSIL
        };
        let wanted = format!("{prefix}{variant}");
        candidates.retain(|f| f.gas == wanted);
    }

    match candidates.as_slice() {
        [] => GasResolution::Unknown,
        [single] => GasResolution::Resolved(*single),
        many => GasResolution::Ambiguous(many.iter().copied().map(|f| f.gas.as_str()).collect()),
    }
}

/// Sums every gas of each (country, sector, source, unit) into one CO2e row.
///
/// An absent cell in any contributing gas makes the aggregate cell absent.
/// Rows whose gas cannot be resolved to one factor are left out.
pub fn generate_carbon_equivalencies(
    refs: &ReferenceData,
    rows: &[EmissionsRow],
    horizon: Horizon,
) -> Vec<EmissionsRow> {
    let mut groups: BTreeMap<(&str, &str, &str, &str), YearSeries> = BTreeMap::new();
    let mut skipped = 0usize;

    for row in rows.iter().filter(|r| !gas::is_co2e(&r.gas)) {
        let factor = match resolve_gas(refs, &row.gas, &row.sector) {
            GasResolution::Resolved(f) => f,
            GasResolution::Ambiguous(names) => {
                debug!(gas = %row.gas, sector = %row.sector, ?names, "ambiguous gas mapping, row skipped");
                skipped += 1;
                continue;
            }
            GasResolution::Unknown => {
                skipped += 1;
                continue;
            }
        };
        let weighted = row.values.scale(horizon.multiplier(factor));
        let key = (
            row.id.as_str(),
            row.sector.as_str(),
            row.data_source.as_str(),
            row.unit.as_str(),
        );
        groups
            .entry(key)
            .and_modify(|sum| *sum = sum.poisoned_add(&weighted))
            .or_insert(weighted);
    }

    debug!(%horizon, groups = groups.len(), skipped, "carbon equivalencies");

    groups
        .into_iter()
        .map(|((id, sector, source, unit), values)| {
            EmissionsRow::new(id, sector, horizon.output_gas(), source, unit, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{CountryCodes, EquationTable, GasTable};
    use approx::assert_abs_diff_eq;

    fn refs() -> ReferenceData {
        let gases = GasTable::new(vec![
            GasFactor { gas: "co2".into(), co2e_20: 1.0, co2e_100: 1.0 },
            GasFactor { gas: "n2o".into(), co2e_20: 273.0, co2e_100: 273.0 },
            GasFactor { gas: "ch4_fossil".into(), co2e_20: 82.5, co2e_100: 29.8 },
            GasFactor { gas: "ch4_non-fossil".into(), co2e_20: 80.8, co2e_100: 27.0 },
            GasFactor { gas: "hfc".into(), co2e_20: 10.0, co2e_100: 5.0 },
            GasFactor { gas: "hfc_a".into(), co2e_20: 20.0, co2e_100: 6.0 },
        ]);
        ReferenceData::new(EquationTable::default(), gases, CountryCodes::default())
    }

    fn row(sector: &str, gas_name: &str, value: f64) -> EmissionsRow {
        EmissionsRow::new("USA", sector, gas_name, "climate-trace", "tonnes", YearSeries::filled(value))
    }

    #[test]
    fn hundred_year_sum_matches_hand_computation() {
        let rows = vec![
            row("coal-mining", "co2", 1234.5),
            row("coal-mining", "n2o", 0.75),
            row("coal-mining", "ch4", 12.125),
        ];
        let out = generate_carbon_equivalencies(&refs(), &rows, Horizon::Hundred);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].gas, "co2e_100yr");
        let expected = 1234.5 * 1.0 + 0.75 * 273.0 + 12.125 * 29.8;
        for (_, v) in out[0].values.iter() {
            assert_abs_diff_eq!(v.unwrap(), expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn methane_multiplier_depends_on_sector() {
        let rows = vec![row("rice-cultivation", "ch4", 10.0), row("coal-mining", "ch4", 10.0)];
        let out = generate_carbon_equivalencies(&refs(), &rows, Horizon::Twenty);
        assert_eq!(out.len(), 2);
        let coal = out.iter().find(|r| r.sector == "coal-mining").unwrap();
        let rice = out.iter().find(|r| r.sector == "rice-cultivation").unwrap();
        assert_abs_diff_eq!(coal.values.get(2015).unwrap(), 825.0, epsilon = 1e-9);
        assert_abs_diff_eq!(rice.values.get(2015).unwrap(), 808.0, epsilon = 1e-9);
        assert_eq!(rice.gas, "co2e_20yr");
    }

    #[test]
    fn ambiguous_and_unknown_gases_are_skipped() {
        let refs = refs();
        assert!(matches!(
            resolve_gas(&refs, "hfc", "x"),
            GasResolution::Ambiguous(_)
        ));
        assert_eq!(resolve_gas(&refs, "sf6", "x"), GasResolution::Unknown);

        let rows = vec![row("x", "hfc", 1.0), row("x", "sf6", 1.0)];
        assert!(generate_carbon_equivalencies(&refs, &rows, Horizon::Hundred).is_empty());
    }

    #[test]
    fn gas_names_resolve_case_insensitively() {
        let refs = refs();
        match resolve_gas(&refs, "CO2", "x") {
            GasResolution::Resolved(f) => assert_eq!(f.gas, "co2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn absent_gas_cell_poisons_aggregate() {
        let mut n2o = row("s", "n2o", 1.0);
        n2o.values.set(2018, None);
        let rows = vec![row("s", "co2", 5.0), n2o];
        let out = generate_carbon_equivalencies(&refs(), &rows, Horizon::Hundred);
        assert_eq!(out[0].values.get(2018), None);
        assert_eq!(out[0].values.get(2019), Some(278.0));
    }

    #[test]
    fn existing_co2e_rows_are_not_reaggregated() {
        let rows = vec![row("s", "co2", 5.0), row("s", "co2e_100yr", 99.0)];
        let out = generate_carbon_equivalencies(&refs(), &rows, Horizon::Hundred);
        assert_eq!(out[0].values.get(2015), Some(5.0));
    }

    #[test]
    fn horizon_round_trips_through_years() {
        assert_eq!(Horizon::try_from(20u32), Ok(Horizon::Twenty));
        assert!(Horizon::try_from(50u32).is_err());
        assert_eq!(u32::from(Horizon::Hundred), 100);
        assert_eq!(Horizon::Twenty.to_string(), "20yr");
    }
}

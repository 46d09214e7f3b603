//! Gap-filling engine.
//!
//! Every target sector of the equation table is the signed sum of sectors of
//! other inventories. For each (country, gas) with evidence for a target, the
//! engine sums the scaled contributor series; a contributor without an
//! observed row makes the whole sum absent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GapFillError, Result};
use crate::normalize::{merge_projected, GF_SOURCES};
use crate::reference::{EquationRow, EquationTable};
use crate::types::{EmissionsRow, YearSeries};

/// Values below this are data-quality failures; values between it and zero
/// are rounding noise.
pub const NOISE_FLOOR: f64 = -2.0;

/// Label carried by every gap-filled row.
pub const OUTPUT_SOURCE: &str = "climate-trace";

/// What a quality-failure cell becomes after cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFailure {
    #[default]
    Absent,
    Zero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillOptions {
    pub output_source: String,
    pub allowed_sources: Vec<String>,
    pub noise_floor: f64,
    pub quality_failure: QualityFailure,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            output_source: OUTPUT_SOURCE.to_string(),
            allowed_sources: GF_SOURCES.iter().map(|s| s.to_string()).collect(),
            noise_floor: NOISE_FLOOR,
            quality_failure: QualityFailure::default(),
        }
    }
}

/// (country id, gas)
type GroupKey = (String, String);

/// What one equation term found for a (country, gas).
enum Evidence<'a> {
    Observed(&'a EmissionsRow),
    Missing,
}

impl Evidence<'_> {
    fn contribution(&self, term: &EquationRow) -> YearSeries {
        match self {
            Evidence::Observed(row) => row.values.scale(term.coefficient),
            Evidence::Missing => YearSeries::absent(),
        }
    }
}

/// Resolves the equation table against `observed` and cleans the result.
pub fn fill_gaps(
    observed: &[EmissionsRow],
    equations: &EquationTable,
    opts: &FillOptions,
) -> Result<Vec<EmissionsRow>> {
    let mut rows = resolve_equations(observed, equations, opts)?;
    data_cleaning(&mut rows, opts.noise_floor, opts.quality_failure);
    Ok(rows)
}

/// Equation resolution without the cleaning pass.
pub fn resolve_equations(
    observed: &[EmissionsRow],
    equations: &EquationTable,
    opts: &FillOptions,
) -> Result<Vec<EmissionsRow>> {
    let equations = equations.restricted_to(&opts.allowed_sources);
    let observed = merge_projected(observed.to_vec());

    // (data source, sector) -> (id, gas) -> row
    let mut index: HashMap<(String, String), BTreeMap<GroupKey, &EmissionsRow>> = HashMap::new();
    for row in &observed {
        index
            .entry((row.data_source.clone(), row.sector.clone()))
            .or_default()
            .entry((row.id.clone(), row.gas.clone()))
            .or_insert(row);
    }
    let lookup = |term: &EquationRow| {
        index.get(&(term.data_source.clone(), term.source_sector.clone()))
    };

    // Every matched row counts, including ones the index dropped as duplicates.
    let term_keys: BTreeSet<(&str, &str)> = equations
        .rows()
        .iter()
        .map(|term| (term.data_source.as_str(), term.source_sector.as_str()))
        .collect();
    let units: BTreeSet<&str> = observed
        .iter()
        .filter(|row| term_keys.contains(&(row.data_source.as_str(), row.sector.as_str())))
        .map(|row| row.unit.as_str())
        .collect();
    if units.len() > 1 {
        return Err(GapFillError::UnitMismatch {
            units: units.into_iter().map(str::to_string).collect(),
        });
    }
    let Some(unit) = units.into_iter().next() else {
        debug!("no observed row matches any equation term");
        return Ok(Vec::new());
    };

    let mut filled: BTreeMap<(GroupKey, String), YearSeries> = BTreeMap::new();
    let mut incomplete = 0usize;

    for (target, terms) in equations.by_target() {
        let groups: BTreeSet<&GroupKey> = terms
            .iter()
            .copied()
            .filter_map(|term| lookup(term))
            .flat_map(|rows| rows.keys())
            .collect();

        for group in groups {
            let mut sum = YearSeries::zeros();
            for term in terms.iter().copied() {
                let evidence = match lookup(term).and_then(|rows| rows.get(group)) {
                    Some(&row) => Evidence::Observed(row),
                    None => Evidence::Missing,
                };
                if matches!(evidence, Evidence::Missing) {
                    incomplete += 1;
                }
                sum = sum.poisoned_add(&evidence.contribution(term));
            }
            filled.insert((group.clone(), target.to_string()), sum);
        }
    }

    debug!(
        groups = filled.len(),
        missing_terms = incomplete,
        "resolved gap equations"
    );

    Ok(filled
        .into_iter()
        .map(|(((id, gas), target), values)| {
            EmissionsRow::new(id, target, gas, opts.output_source.as_str(), unit, values)
        })
        .collect())
}

/// Cleaning rule for one computed value.
pub fn clean_value(value: f64, noise_floor: f64, policy: QualityFailure) -> Option<f64> {
    if value < noise_floor {
        match policy {
            QualityFailure::Absent => None,
            QualityFailure::Zero => Some(0.0),
        }
    } else if value < 0.0 {
        Some(0.0)
    } else {
        Some(value)
    }
}

/// Clamps negative noise to zero and handles quality failures in place.
pub fn data_cleaning(rows: &mut [EmissionsRow], noise_floor: f64, policy: QualityFailure) {
    for row in rows.iter_mut() {
        row.values = row.values.map(|v| clean_value(v, noise_floor, policy));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::COMP_YEARS;
    use approx::assert_relative_eq;

    const OIL_GAS: &str = "Oil and Natural Gas";
    const REFINING: &str = "Petroleum Refining - Manufacture of Solid Fuels and Other Energy Industries";
    const CT_PRODUCTION: &str = "oil-and-gas-production-and-transport";
    const CT_REFINING: &str = "oil-and-gas-refining";
    const TARGET: &str = "other-fossil-fuel-operations";

    fn equations() -> EquationTable {
        EquationTable::new(vec![
            EquationRow::new(TARGET, "edgar", OIL_GAS, 1.0),
            EquationRow::new(TARGET, "edgar", REFINING, 1.0),
            EquationRow::new(TARGET, "climate-trace", CT_PRODUCTION, -1.0),
            EquationRow::new(TARGET, "climate-trace", CT_REFINING, -1.0),
        ])
    }

    fn six_years(value: f64) -> YearSeries {
        let mut s = YearSeries::absent();
        for year in 2015..=2020 {
            s.set(year, Some(value));
        }
        s
    }

    fn row(source: &str, sector: &str, value: f64) -> EmissionsRow {
        EmissionsRow::new("USA", sector, "co2", source, "tonnes", six_years(value))
    }

    fn observed(ct_production: f64, ct_refining: f64, edgar: f64) -> Vec<EmissionsRow> {
        vec![
            row("climate-trace", CT_PRODUCTION, ct_production),
            row("climate-trace", CT_REFINING, ct_refining),
            row("edgar", OIL_GAS, edgar),
            row("edgar", REFINING, edgar),
        ]
    }

    fn assert_years(row: &EmissionsRow, expected: Option<f64>) {
        for year in 2015..=2020 {
            assert_eq!(row.values.get(year), expected, "year {year}");
        }
    }

    #[test]
    fn scenario_other_fossil_fuel_operations() {
        let out = fill_gaps(&observed(10.0, 10.0, 110.0), &equations(), &FillOptions::default()).unwrap();
        assert_eq!(out.len(), 1);
        let filled = &out[0];
        assert_eq!(filled.sector, TARGET);
        assert_eq!(filled.data_source, "climate-trace");
        assert_eq!(filled.gas, "co2");
        assert_eq!(filled.unit, "tonnes");
        assert_years(filled, Some(200.0));
        // Years with no input at all stay absent.
        assert_eq!(filled.values.get(2024), None);
    }

    #[test]
    fn exact_cancellation_is_zero() {
        let out = fill_gaps(&observed(10.0, 10.0, 10.0), &equations(), &FillOptions::default()).unwrap();
        assert_years(&out[0], Some(0.0));
    }

    #[test]
    fn large_negative_result_is_quality_failure() {
        // 10 + 10 - 100 - 10 = -90
        let out = fill_gaps(&observed(100.0, 10.0, 10.0), &equations(), &FillOptions::default()).unwrap();
        assert_years(&out[0], None);
    }

    #[test]
    fn zero_policy_replaces_quality_failures() {
        let opts = FillOptions {
            quality_failure: QualityFailure::Zero,
            ..FillOptions::default()
        };
        let out = fill_gaps(&observed(100.0, 10.0, 10.0), &equations(), &opts).unwrap();
        assert_years(&out[0], Some(0.0));
    }

    #[test]
    fn mixed_units_are_rejected() {
        let mut rows = observed(10.0, 10.0, 110.0);
        rows[2].unit = "kilotonnes".into();
        let err = fill_gaps(&rows, &equations(), &FillOptions::default()).unwrap_err();
        match err {
            GapFillError::UnitMismatch { units } => {
                assert_eq!(units, vec!["kilotonnes".to_string(), "tonnes".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rows_differing_only_in_unit_are_rejected() {
        let eqs = EquationTable::new(vec![EquationRow::new("t", "edgar", "A", 1.0)]);
        let rows = vec![
            EmissionsRow::new("USA", "A", "co2", "edgar", "tonnes", YearSeries::filled(1.0)),
            EmissionsRow::new("USA", "A", "co2", "edgar", "kt", YearSeries::filled(1.0)),
        ];
        let err = fill_gaps(&rows, &eqs, &FillOptions::default()).unwrap_err();
        assert!(matches!(err, GapFillError::UnitMismatch { ref units } if units.len() == 2));
    }

    #[test]
    fn units_of_unrelated_rows_do_not_matter() {
        let mut rows = observed(10.0, 10.0, 110.0);
        rows.push(EmissionsRow::new("USA", "unrelated", "co2", "edgar", "kt", six_years(1.0)));
        assert!(fill_gaps(&rows, &equations(), &FillOptions::default()).is_ok());
    }

    #[test]
    fn missing_subtrahend_makes_target_absent() {
        let eqs = EquationTable::new(vec![
            EquationRow::new("a-minus-b", "edgar", "A", 1.0),
            EquationRow::new("a-minus-b", "edgar", "B", -1.0),
        ]);
        let rows = vec![row("edgar", "A", 50.0)];
        let out = fill_gaps(&rows, &eqs, &FillOptions::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].values.is_all_absent());
    }

    #[test]
    fn absent_year_poisons_only_that_year() {
        let mut rows = observed(10.0, 10.0, 110.0);
        rows[0].values.set(2017, None);
        let out = fill_gaps(&rows, &equations(), &FillOptions::default()).unwrap();
        assert_eq!(out[0].values.get(2016), Some(200.0));
        assert_eq!(out[0].values.get(2017), None);
    }

    #[test]
    fn sum_is_independent_of_row_order() {
        let forward = observed(3.25, 1.5, 20.125);
        let mut reversed = forward.clone();
        reversed.reverse();
        let a = fill_gaps(&forward, &equations(), &FillOptions::default()).unwrap();
        let b = fill_gaps(&reversed, &equations(), &FillOptions::default()).unwrap();
        assert_eq!(a, b);
        for year in 2015..=2020 {
            assert_relative_eq!(a[0].values.get(year).unwrap(), 20.125 * 2.0 - 3.25 - 1.5);
        }
    }

    #[test]
    fn arbitrary_coefficients_scale_contributions() {
        let eqs = EquationTable::new(vec![
            EquationRow::new("t", "ceds", "x", 0.25),
            EquationRow::new("t", "faostat", "y", 2.0),
        ]);
        let rows = vec![row("ceds", "x", 8.0), row("faostat", "y", 1.5)];
        let out = fill_gaps(&rows, &eqs, &FillOptions::default()).unwrap();
        assert_years(&out[0], Some(5.0));
    }

    #[test]
    fn projected_rows_count_as_base_inventory() {
        let mut rows = observed(10.0, 10.0, 110.0);
        for r in rows.iter_mut().filter(|r| r.data_source == "edgar") {
            r.data_source = "edgar-projected".into();
        }
        let out = fill_gaps(&rows, &equations(), &FillOptions::default()).unwrap();
        assert_years(&out[0], Some(200.0));
    }

    #[test]
    fn projected_years_complete_observed_series() {
        let eqs = EquationTable::new(vec![
            EquationRow::new("t", "edgar", "A", 1.0),
            EquationRow::new("t", "climate-trace", "B", -1.0),
        ]);
        let mut observed_years = YearSeries::absent();
        let mut projected_years = YearSeries::absent();
        for year in COMP_YEARS {
            if year <= 2022 {
                observed_years.set(year, Some(30.0));
            } else {
                projected_years.set(year, Some(40.0));
            }
        }
        let rows = vec![
            EmissionsRow::new("USA", "A", "co2", "edgar", "tonnes", observed_years),
            EmissionsRow::new("USA", "A", "co2", "edgar-projected", "tonnes", projected_years),
            EmissionsRow::new("USA", "B", "co2", "climate-trace", "tonnes", YearSeries::filled(10.0)),
        ];
        let out = fill_gaps(&rows, &eqs, &FillOptions::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].values.get(2015), Some(20.0));
        assert_eq!(out[0].values.get(2022), Some(20.0));
        assert_eq!(out[0].values.get(2023), Some(30.0));
        assert_eq!(out[0].values.get(2024), Some(30.0));
        assert!(out[0].values.cells().iter().all(Option::is_some));
    }

    #[test]
    fn terms_outside_allow_list_are_ignored() {
        let mut eqs = equations().rows().to_vec();
        eqs.push(EquationRow::new(TARGET, "unfccc", "whatever", 1.0));
        let out = fill_gaps(&observed(10.0, 10.0, 110.0), &EquationTable::new(eqs), &FillOptions::default())
            .unwrap();
        assert_years(&out[0], Some(200.0));
    }

    #[test]
    fn no_evidence_yields_empty_table() {
        let rows = vec![row("edgar", "unrelated", 1.0)];
        let out = fill_gaps(&rows, &equations(), &FillOptions::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn groups_are_split_by_country_and_gas() {
        let mut rows = observed(10.0, 10.0, 110.0);
        let mut fra = observed(1.0, 1.0, 2.0);
        for r in fra.iter_mut() {
            r.id = "FRA".into();
            r.gas = "ch4".into();
        }
        rows.extend(fra);
        let out = fill_gaps(&rows, &equations(), &FillOptions::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].id.as_str(), out[0].gas.as_str()), ("FRA", "ch4"));
        assert_years(&out[0], Some(2.0));
        assert_years(&out[1], Some(200.0));
    }

    #[test]
    fn cleaning_thresholds() {
        let floor = NOISE_FLOOR;
        assert_eq!(clean_value(-1.5, floor, QualityFailure::Absent), Some(0.0));
        assert_eq!(clean_value(-2.5, floor, QualityFailure::Absent), None);
        assert_eq!(clean_value(-2.5, floor, QualityFailure::Zero), Some(0.0));
        assert_eq!(clean_value(-2.0, floor, QualityFailure::Absent), Some(0.0));
        assert_eq!(clean_value(5.0, floor, QualityFailure::Absent), Some(5.0));
        assert_eq!(clean_value(0.0, floor, QualityFailure::Absent), Some(0.0));
    }

    #[test]
    fn data_cleaning_keeps_absent_cells() {
        let mut values = YearSeries::filled(-1.5);
        values.set(2015, None);
        values.set(2016, Some(-2.5));
        values.set(2017, Some(5.0));
        let mut rows = vec![EmissionsRow::new("USA", "t", "co2", "climate-trace", "tonnes", values)];
        data_cleaning(&mut rows, NOISE_FLOOR, QualityFailure::Absent);
        let v = &rows[0].values;
        assert_eq!(v.get(2015), None);
        assert_eq!(v.get(2016), None);
        assert_eq!(v.get(2017), Some(5.0));
        assert_eq!(v.get(2018), Some(0.0));
    }
}

use serde::{Deserialize, Serialize};

/// Comparison years carried by every wide row, oldest first.
pub const COMP_YEARS: [i32; 10] = [2015, 2016, 2017, 2018, 2019, 2020, 2021, 2022, 2023, 2024];

pub const N_YEARS: usize = COMP_YEARS.len();

/// Canonical mass unit of every assembled row.
pub const TONNES: &str = "tonnes";

/// Gas labels used by the output cube.
pub mod gas {
    pub const CO2: &str = "co2";
    pub const N2O: &str = "n2o";
    pub const CH4: &str = "ch4";
    pub const CO2E_20YR: &str = "co2e_20yr";
    pub const CO2E_100YR: &str = "co2e_100yr";

    /// Every gas the dense output carries for each (country, sector).
    pub const OUTPUT_GASES: [&str; 5] = [CO2, N2O, CH4, CO2E_20YR, CO2E_100YR];

    pub fn is_co2e(gas: &str) -> bool {
        gas.starts_with("co2e")
    }
}

/// One optional value per comparison year.
///
/// `None` marks an absent cell: never observed, or computed from an absent
/// input. It is kept apart from `Some(0.0)` all the way to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct YearSeries([Option<f64>; N_YEARS]);

impl YearSeries {
    pub fn absent() -> Self {
        Self([None; N_YEARS])
    }

    pub fn zeros() -> Self {
        Self::filled(0.0)
    }

    pub fn filled(value: f64) -> Self {
        Self([Some(value); N_YEARS])
    }

    pub fn from_cells(cells: [Option<f64>; N_YEARS]) -> Self {
        Self(cells)
    }

    /// Position of `year` in [`COMP_YEARS`].
    pub fn year_index(year: i32) -> Option<usize> {
        COMP_YEARS.iter().position(|y| *y == year)
    }

    pub fn get(&self, year: i32) -> Option<f64> {
        Self::year_index(year).and_then(|i| self.0[i])
    }

    /// Sets the cell for `year`; returns false if the year is not compared.
    pub fn set(&mut self, year: i32, value: Option<f64>) -> bool {
        match Self::year_index(year) {
            Some(i) => {
                self.0[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn cells(&self) -> &[Option<f64>; N_YEARS] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, Option<f64>)> + '_ {
        COMP_YEARS.iter().copied().zip(self.0.iter().copied())
    }

    pub fn is_all_absent(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Applies `f` to every present cell; `f` may turn a cell absent.
    pub fn map(&self, f: impl Fn(f64) -> Option<f64>) -> Self {
        let mut out = self.0;
        for cell in out.iter_mut() {
            *cell = cell.and_then(&f);
        }
        Self(out)
    }

    pub fn scale(&self, coefficient: f64) -> Self {
        self.map(|v| Some(v * coefficient))
    }

    /// Cell-wise sum where an absent cell on either side poisons the result.
    pub fn poisoned_add(&self, other: &Self) -> Self {
        let mut out = [None; N_YEARS];
        for (i, cell) in out.iter_mut().enumerate() {
            *cell = match (self.0[i], other.0[i]) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            };
        }
        Self(out)
    }

    /// Keeps present cells of `self`, filling absent ones from `fallback`.
    pub fn coalesce(&self, fallback: &Self) -> Self {
        let mut out = self.0;
        for (i, cell) in out.iter_mut().enumerate() {
            if cell.is_none() {
                *cell = fallback.0[i];
            }
        }
        Self(out)
    }
}

/// Identity of a wide row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub id: String,
    pub sector: String,
    pub gas: String,
    pub data_source: String,
    pub unit: String,
}

/// Analytic wide row: one per (country, sector, gas, source, unit).
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionsRow {
    /// Three-letter country or entity code; blank when unresolved.
    pub id: String,
    pub sector: String,
    pub gas: String,
    pub data_source: String,
    pub unit: String,
    pub values: YearSeries,
}

impl EmissionsRow {
    pub fn new(
        id: impl Into<String>,
        sector: impl Into<String>,
        gas: impl Into<String>,
        data_source: impl Into<String>,
        unit: impl Into<String>,
        values: YearSeries,
    ) -> Self {
        Self {
            id: id.into(),
            sector: sector.into(),
            gas: gas.into(),
            data_source: data_source.into(),
            unit: unit.into(),
            values,
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey {
            id: self.id.clone(),
            sector: self.sector.clone(),
            gas: self.gas.clone(),
            data_source: self.data_source.clone(),
            unit: self.unit.clone(),
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_poisons_addition() {
        let mut a = YearSeries::filled(2.0);
        a.set(2017, None);
        let b = YearSeries::filled(3.0);
        let sum = a.poisoned_add(&b);
        assert_eq!(sum.get(2016), Some(5.0));
        assert_eq!(sum.get(2017), None);
    }

    #[test]
    fn years_outside_comparison_set_are_rejected() {
        let mut s = YearSeries::absent();
        assert!(!s.set(2010, Some(1.0)));
        assert!(s.set(2024, Some(1.0)));
        assert_eq!(s.get(2024), Some(1.0));
        assert_eq!(s.get(2010), None);
    }

    #[test]
    fn coalesce_prefers_present_cells() {
        let mut observed = YearSeries::absent();
        observed.set(2015, Some(1.0));
        let projected = YearSeries::filled(9.0);
        let merged = observed.coalesce(&projected);
        assert_eq!(merged.get(2015), Some(1.0));
        assert_eq!(merged.get(2024), Some(9.0));
    }

    #[test]
    fn scale_keeps_absent_cells() {
        let mut s = YearSeries::filled(4.0);
        s.set(2020, None);
        let scaled = s.scale(-1.0);
        assert_eq!(scaled.get(2015), Some(-4.0));
        assert_eq!(scaled.get(2020), None);
    }
}

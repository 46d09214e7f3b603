//! Reference tables consumed by a run: gap equations, GWP factors, country
//! codes and the non-fossil methane sectors.
//!
//! Everything here is loaded once and then only read. Components receive a
//! `&ReferenceData` (or the single table they need) instead of reaching for
//! process-wide state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GapFillError, Result};

/// Sectors whose methane is biogenic and takes the non-fossil GWP.
pub const NON_FOSSIL_SECTORS: [&str; 14] = [
    "enteric-fermentation-cattle-feedlot",
    "enteric-fermentation-cattle-pasture",
    "enteric-fermentation-other",
    "manure-left-on-pasture-cattle",
    "manure-management-cattle-feedlot",
    "manure-management-other",
    "rice-cultivation",
    "cropland-fires",
    "forest-land-fires",
    "grassland-fires",
    "wetland-fires",
    "solid-waste-disposal",
    "domestic-wastewater-treatment-and-discharge",
    "industrial-wastewater-treatment-and-discharge",
];

/// One term of a gap equation: `coefficient × inventory[source_sector]`
/// contributes to `target_sector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquationRow {
    #[serde(rename = "sub-sector")]
    pub target_sector: String,
    pub inventory: String,
    /// Data-source label the inventory's rows carry.
    #[serde(rename = "sub_inventory")]
    pub data_source: String,
    #[serde(rename = "subinv_ipcc_code", default)]
    pub ipcc_code: Option<String>,
    #[serde(rename = "subinv_units")]
    pub source_sector: String,
    #[serde(rename = "values")]
    pub coefficient: f64,
    #[serde(rename = "gas output", default)]
    pub gas_output: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EquationRow {
    pub fn new(
        target_sector: &str,
        inventory: &str,
        source_sector: &str,
        coefficient: f64,
    ) -> Self {
        Self {
            target_sector: target_sector.to_string(),
            inventory: inventory.to_string(),
            data_source: inventory.to_string(),
            ipcc_code: None,
            source_sector: source_sector.to_string(),
            coefficient,
            gas_output: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquationTable {
    rows: Vec<EquationRow>,
}

impl EquationTable {
    pub fn new(rows: Vec<EquationRow>) -> Self {
        Self { rows }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_records(path)?))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(Self::new(deserialize_all(reader)?))
    }

    pub fn rows(&self) -> &[EquationRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Terms whose inventory is on the allow-list.
    pub fn restricted_to<S: AsRef<str>>(&self, allowed: &[S]) -> Self {
        let rows = self
            .rows
            .iter()
            .filter(|r| allowed.iter().any(|a| a.as_ref() == r.inventory))
            .cloned()
            .collect();
        Self { rows }
    }

    /// Distinct target sectors, sorted.
    pub fn target_sectors(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.rows.iter().map(|r| r.target_sector.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Terms grouped by target sector.
    pub fn by_target(&self) -> BTreeMap<&str, Vec<&EquationRow>> {
        let mut out: BTreeMap<&str, Vec<&EquationRow>> = BTreeMap::new();
        for row in &self.rows {
            out.entry(row.target_sector.as_str()).or_default().push(row);
        }
        out
    }
}

/// CO2-equivalence multipliers for one gas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasFactor {
    pub gas: String,
    pub co2e_20: f64,
    pub co2e_100: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GasTable {
    factors: Vec<GasFactor>,
}

impl GasTable {
    pub fn new(factors: Vec<GasFactor>) -> Self {
        let factors = factors
            .into_iter()
            .map(|mut f| {
                f.gas = f.gas.trim().to_lowercase();
                f
            })
            .collect();
        Self { factors }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_records(path)?))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(Self::new(deserialize_all(reader)?))
    }

    pub fn factors(&self) -> &[GasFactor] {
        &self.factors
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CountryCodeRow {
    iso3: String,
    country_name: String,
}

/// ISO3 code to display name. Used only to enrich output rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryCodes {
    names: BTreeMap<String, String>,
}

impl CountryCodes {
    pub fn load(path: &Path) -> Result<Self> {
        let rows: Vec<CountryCodeRow> = read_records(path)?;
        Ok(Self::from_pairs(rows.into_iter().map(|r| (r.iso3, r.country_name))))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let names = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_string(), v.as_ref().trim().to_string()))
            .collect();
        Self { names }
    }

    pub fn name(&self, iso3: &str) -> Option<&str> {
        self.names.get(iso3).map(String::as_str)
    }
}

/// Immutable reference data for one run.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub equations: EquationTable,
    pub gases: GasTable,
    pub countries: CountryCodes,
    pub non_fossil_sectors: BTreeSet<String>,
}

impl ReferenceData {
    pub fn new(equations: EquationTable, gases: GasTable, countries: CountryCodes) -> Self {
        Self {
            equations,
            gases,
            countries,
            non_fossil_sectors: NON_FOSSIL_SECTORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_non_fossil_sectors<I, S>(mut self, sectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_fossil_sectors = sectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_non_fossil(&self, sector: &str) -> bool {
        self.non_fossil_sectors.contains(sector)
    }
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self::new(EquationTable::default(), GasTable::default(), CountryCodes::default())
    }
}

pub(crate) fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|source| GapFillError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    deserialize_all(file)
}

fn deserialize_all<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut out = Vec::new();
    for record in rdr.deserialize() {
        out.push(record?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EQUATIONS: &str = "\
sub-sector,inventory,sub_inventory,subinv_ipcc_code,subinv_units,values,gas output,notes
other-fossil-fuel-operations,edgar,edgar,1.B.2,Oil and Natural Gas,1,co2,
other-fossil-fuel-operations,climate-trace,climate-trace,1.B.2.a.iv,oil-and-gas-refining,-1,co2,
lime,unfccc,unfccc,2.A.2,2.A.2 Lime production,1,co2,annex I only
";

    #[test]
    fn equation_csv_maps_reference_headers() {
        let table = EquationTable::from_reader(EQUATIONS.as_bytes()).unwrap();
        assert_eq!(table.rows().len(), 3);
        let first = &table.rows()[0];
        assert_eq!(first.target_sector, "other-fossil-fuel-operations");
        assert_eq!(first.source_sector, "Oil and Natural Gas");
        assert_eq!(first.coefficient, 1.0);
        assert_eq!(first.ipcc_code.as_deref(), Some("1.B.2"));
        assert_eq!(first.notes, None);
        assert_eq!(table.rows()[1].coefficient, -1.0);
        assert_eq!(table.rows()[2].notes.as_deref(), Some("annex I only"));
    }

    #[test]
    fn restriction_drops_unrecognised_inventories() {
        let table = EquationTable::from_reader(EQUATIONS.as_bytes()).unwrap();
        let kept = table.restricted_to(&["edgar", "climate-trace"]);
        assert_eq!(kept.rows().len(), 2);
        assert_eq!(kept.target_sectors(), vec!["other-fossil-fuel-operations"]);
        assert_eq!(table.target_sectors(), vec!["lime", "other-fossil-fuel-operations"]);
    }

    #[test]
    fn gas_names_are_normalised() {
        let gases = GasTable::from_reader("gas,co2e_20,co2e_100\n CO2 ,1,1\nN2O,273,273\n".as_bytes())
            .unwrap();
        assert_eq!(gases.factors()[0].gas, "co2");
        assert_eq!(gases.factors()[1].gas, "n2o");
    }

    #[test]
    fn country_names_are_trimmed() {
        let codes = CountryCodes::from_pairs([(" USA ", " United States of America ")]);
        assert_eq!(codes.name("USA"), Some("United States of America"));
        assert_eq!(codes.name("XXX"), None);
    }

    #[test]
    fn methane_context_defaults_to_fixed_set() {
        let refs = ReferenceData::default();
        assert!(refs.is_non_fossil("rice-cultivation"));
        assert!(!refs.is_non_fossil("coal-mining"));
        assert_eq!(refs.non_fossil_sectors.len(), NON_FOSSIL_SECTORS.len());

        let built = ReferenceData::new(
            EquationTable::default(),
            GasTable::default(),
            CountryCodes::default(),
        );
        assert_eq!(built.non_fossil_sectors, refs.non_fossil_sectors);

        let custom = refs.with_non_fossil_sectors(["coal-mining"]);
        assert!(custom.is_non_fossil("coal-mining"));
        assert!(!custom.is_non_fossil("rice-cultivation"));
    }
}

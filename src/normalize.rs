//! Conversion between the persistence row schema (one row per
//! country/sector/gas/year) and the analytic wide schema (one row per
//! country/sector/gas/source/unit carrying a [`YearSeries`]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GapFillError, Result};
use crate::reference::CountryCodes;
use crate::types::{EmissionsRow, RowKey, YearSeries, COMP_YEARS};

/// Suffix the forecast extender appends to an inventory label.
pub const PROJECTED_SUFFIX: &str = "-projected";

/// Data sources the gap-filling engine recognises.
pub const GF_SOURCES: [&str; 9] = [
    "edgar",
    "faostat",
    "climate-trace",
    "edgar-projected",
    "faostat-projected",
    "ceds",
    "ceds-derived",
    "ceds-projected",
    "ceds-derived-projected",
];

/// Persistence-layer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionsRecord {
    pub original_inventory_sector: String,
    #[serde(default)]
    pub iso3_country: String,
    #[serde(default)]
    pub producing_entity_name: Option<String>,
    pub reporting_entity: String,
    pub gas: String,
    pub emissions_quantity: Option<f64>,
    pub emissions_quantity_units: String,
    pub start_time: NaiveDate,
    #[serde(default)]
    pub end_time: Option<NaiveDate>,
    #[serde(default)]
    pub created_date: Option<DateTime<Utc>>,
}

impl EmissionsRecord {
    pub fn year(&self) -> i32 {
        year_of(self.start_time)
    }

    fn key(&self) -> RowKey {
        RowKey {
            id: self.iso3_country.clone(),
            sector: self.original_inventory_sector.clone(),
            gas: self.gas.clone(),
            data_source: self.reporting_entity.clone(),
            unit: self.emissions_quantity_units.clone(),
        }
    }
}

pub fn year_of(start_time: NaiveDate) -> i32 {
    start_time.year()
}

/// First and last day of `year`.
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// Pivots persistence rows into wide rows.
///
/// Duplicate (key, year) records keep the first occurrence. Years outside
/// [`COMP_YEARS`] are ignored and missing years stay absent.
pub fn to_wide(records: &[EmissionsRecord]) -> Vec<EmissionsRow> {
    let mut table: BTreeMap<RowKey, YearSeries> = BTreeMap::new();
    let mut seen: HashSet<(RowKey, i32)> = HashSet::new();

    for record in records {
        let year = record.year();
        if YearSeries::year_index(year).is_none() {
            continue;
        }
        let key = record.key();
        if !seen.insert((key.clone(), year)) {
            continue;
        }
        let value = record.emissions_quantity.filter(|v| v.is_finite());
        table
            .entry(key)
            .or_insert_with(YearSeries::absent)
            .set(year, value);
    }

    table
        .into_iter()
        .map(|(k, values)| EmissionsRow::new(k.id, k.sector, k.gas, k.data_source, k.unit, values))
        .collect()
}

/// Melts wide rows back to one persistence row per comparison year.
pub fn to_records(
    rows: &[EmissionsRow],
    created: DateTime<Utc>,
    countries: &CountryCodes,
) -> Vec<EmissionsRecord> {
    let mut out = Vec::with_capacity(rows.len() * COMP_YEARS.len());
    for row in rows {
        let name = countries.name(&row.id).map(str::to_string);
        for (year, value) in row.values.iter() {
            // COMP_YEARS are all representable dates.
            let Some((start, end)) = year_bounds(year) else {
                continue;
            };
            out.push(EmissionsRecord {
                original_inventory_sector: row.sector.clone(),
                iso3_country: row.id.clone(),
                producing_entity_name: name.clone(),
                reporting_entity: row.data_source.clone(),
                gas: row.gas.clone(),
                emissions_quantity: value,
                emissions_quantity_units: row.unit.clone(),
                start_time: start,
                end_time: Some(end),
                created_date: Some(created),
            });
        }
    }
    out
}

/// Base inventory label for a possibly projected one.
pub fn base_source(label: &str) -> &str {
    label.strip_suffix(PROJECTED_SUFFIX).unwrap_or(label)
}

pub fn is_projected(label: &str) -> bool {
    label.ends_with(PROJECTED_SUFFIX)
}

/// Moves records of `years` to the projected label of their inventory.
/// Records already carrying a projected label are left alone.
pub fn label_projected_years(records: &mut [EmissionsRecord], years: &[i32]) {
    for record in records.iter_mut() {
        if years.contains(&record.year()) && !is_projected(&record.reporting_entity) {
            record.reporting_entity.push_str(PROJECTED_SUFFIX);
        }
    }
}

/// Keeps rows whose data source is on the allow-list.
pub fn prepare<S: AsRef<str>>(rows: Vec<EmissionsRow>, allowed: &[S]) -> Vec<EmissionsRow> {
    rows.into_iter()
        .filter(|r| allowed.iter().any(|a| a.as_ref() == r.data_source))
        .collect()
}

/// Relabels projected rows to their base inventory.
///
/// A projected row whose key collides with an observed row is merged into it
/// year by year: observed cells win, projected cells fill the gaps.
pub fn merge_projected(rows: Vec<EmissionsRow>) -> Vec<EmissionsRow> {
    let (projected, observed): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|r| is_projected(&r.data_source));

    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut out: Vec<EmissionsRow> = Vec::with_capacity(observed.len() + projected.len());

    for mut row in observed.into_iter().chain(projected) {
        row.data_source = base_source(&row.data_source).to_string();
        match index.get(&row.key()) {
            Some(&i) => out[i].values = out[i].values.coalesce(&row.values),
            None => {
                index.insert(row.key(), out.len());
                out.push(row);
            }
        }
    }
    out
}

const ID_COL: &str = "ID";
const SECTOR_COL: &str = "Sector";
const GAS_COL: &str = "Gas";
const SOURCE_COL: &str = "Data source";
const UNIT_COL: &str = "Unit";

/// Column layout of a wide CSV file.
struct WideLayout {
    columns: HashMap<String, usize>,
    years: Vec<(usize, i32)>,
}

impl WideLayout {
    fn parse(path: &Path, headers: &csv::StringRecord) -> Result<Self> {
        let mut columns = HashMap::new();
        let mut years = Vec::new();
        for (i, h) in headers.iter().enumerate() {
            let h = h.trim();
            if h.starts_with(|c: char| c.is_ascii_digit()) {
                let year: i32 = h.parse().map_err(|_| GapFillError::InvalidYear {
                    path: path.to_path_buf(),
                    value: h.to_string(),
                })?;
                if YearSeries::year_index(year).is_some() {
                    years.push((i, year));
                }
            } else {
                columns.insert(h.to_string(), i);
            }
        }
        Ok(Self { columns, years })
    }

    fn position(&self, path: &Path, column: &str) -> Result<usize> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| GapFillError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            })
    }

    fn series(&self, path: &Path, record: &csv::StringRecord) -> Result<YearSeries> {
        let mut values = YearSeries::absent();
        for &(i, year) in &self.years {
            let raw = record.get(i).unwrap_or("").trim();
            values.set(year, parse_cell(path, year, raw)?);
        }
        Ok(values)
    }
}

fn parse_cell(path: &Path, year: i32, raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = raw.parse().map_err(|_| GapFillError::InvalidNumber {
        path: path.to_path_buf(),
        column: year.to_string(),
        value: raw.to_string(),
    })?;
    Ok(Some(value).filter(|v| v.is_finite()))
}

fn open(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|source| GapFillError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file))
}

/// Reads a wide table (`ID, Sector, Gas, Data source, Unit, <years>`).
/// Unknown columns such as `Country` or `Created` are ignored.
pub fn read_wide(path: &Path) -> Result<Vec<EmissionsRow>> {
    let mut rdr = open(path)?;
    let layout = WideLayout::parse(path, rdr.headers()?)?;
    let id = layout.position(path, ID_COL)?;
    let sector = layout.position(path, SECTOR_COL)?;
    let gas = layout.position(path, GAS_COL)?;
    let source = layout.position(path, SOURCE_COL)?;
    let unit = layout.position(path, UNIT_COL)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").to_string();
        rows.push(EmissionsRow::new(
            field(id),
            field(sector),
            field(gas),
            field(source),
            field(unit),
            layout.series(path, &record)?,
        ));
    }
    Ok(rows)
}

/// Reads a per-country activity table (`ID, <years>`).
pub fn read_activity(path: &Path) -> Result<BTreeMap<String, YearSeries>> {
    let mut rdr = open(path)?;
    let layout = WideLayout::parse(path, rdr.headers()?)?;
    let id = layout.position(path, ID_COL)?;

    let mut out = BTreeMap::new();
    for record in rdr.records() {
        let record = record?;
        let key = record.get(id).unwrap_or("").to_string();
        let series = layout.series(path, &record)?;
        out.entry(key).or_insert(series);
    }
    Ok(out)
}

/// Writes a wide table with the same layout [`read_wide`] accepts.
pub fn write_wide(path: &Path, rows: &[EmissionsRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec![
        ID_COL.to_string(),
        SECTOR_COL.to_string(),
        GAS_COL.to_string(),
        SOURCE_COL.to_string(),
        UNIT_COL.to_string(),
    ];
    header.extend(COMP_YEARS.iter().map(|y| y.to_string()));
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.id.clone(),
            row.sector.clone(),
            row.gas.clone(),
            row.data_source.clone(),
            row.unit.clone(),
        ];
        record.extend(
            row.values
                .cells()
                .iter()
                .map(|c| c.map(|v| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(|source| GapFillError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

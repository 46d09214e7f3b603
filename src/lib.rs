#![forbid(unsafe_code)]

//! Gap-filling of country/sector/gas emissions across inventories.
//!
//! Observed inventories are pivoted to wide rows, target sectors are filled
//! from signed combinations of other inventories' sectors, cleaned, converted
//! to CO2e and expanded into a dense output table.

pub mod activity;
pub mod assemble;
pub mod config;
pub mod derived;
pub mod error;
pub mod fill;
pub mod gwp;
pub mod normalize;
pub mod pipeline;
pub mod reference;
pub mod scaling;
pub mod store;
pub mod types;

pub use config::RunConfig;
pub use error::{GapFillError, Result};
pub use fill::{fill_gaps, FillOptions, QualityFailure};
pub use gwp::{generate_carbon_equivalencies, Horizon};
pub use pipeline::{run, RunSummary};
pub use reference::ReferenceData;
pub use store::{CsvStore, EmissionsSink, EmissionsSource};
pub use types::{EmissionsRow, YearSeries, COMP_YEARS};

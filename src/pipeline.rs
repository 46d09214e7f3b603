//! End-to-end runs: load, compute, write once.

use std::path::Path;

use chrono::Utc;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::activity::{update_based_on_activity, ActivityTable};
use crate::assemble::assemble;
use crate::config::RunConfig;
use crate::derived::derive_sectors;
use crate::error::Result;
use crate::fill::{data_cleaning, resolve_equations};
use crate::gwp::{generate_carbon_equivalencies, Horizon};
use crate::normalize::{
    label_projected_years, prepare, read_activity, to_records, to_wide, write_wide, EmissionsRecord,
};
use crate::reference::{CountryCodes, EquationTable, GasTable, ReferenceData};
use crate::scaling::{estimate_country_factors, read_national_series};
use crate::store::{EmissionsSink, EmissionsSource};
use crate::types::EmissionsRow;

/// Counts reported at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub observed_rows: usize,
    pub filled_rows: usize,
    pub co2e_rows: usize,
    pub output_rows: usize,
    pub records_written: usize,
}

/// Result of [`compute`], before conversion to records.
#[derive(Debug, Clone, Default)]
pub struct Computed {
    /// Gap-filled rows before cleaning.
    pub unclean: Vec<EmissionsRow>,
    pub filled: Vec<EmissionsRow>,
    pub co2e_20: Vec<EmissionsRow>,
    pub co2e_100: Vec<EmissionsRow>,
    pub output: Vec<EmissionsRow>,
}

pub fn load_reference(config: &RunConfig, data_dir: &Path) -> Result<ReferenceData> {
    let inputs = &config.inputs;
    let equations = EquationTable::load(&data_dir.join(&inputs.equations))?;
    let gases = GasTable::load(&data_dir.join(&inputs.gases))?;
    let countries = CountryCodes::load(&data_dir.join(&inputs.country_codes))?;

    let refs = ReferenceData::new(equations, gases, countries);
    Ok(match &config.gwp.non_fossil_sectors {
        Some(sectors) => refs.with_non_fossil_sectors(sectors.iter().cloned()),
        None => refs,
    })
}

/// Loads every configured inventory and pivots it to wide rows.
pub fn load_observed<S: EmissionsSource + ?Sized>(
    source: &S,
    config: &RunConfig,
) -> Result<Vec<EmissionsRow>> {
    let mut records = Vec::new();
    for label in config.source_labels() {
        records.extend(source.load(&label)?);
    }
    Ok(to_wide(&records))
}

/// The pure part of a run.
pub fn compute(
    config: &RunConfig,
    refs: &ReferenceData,
    observed: Vec<EmissionsRow>,
    activity: Option<&ActivityTable>,
) -> Result<Computed> {
    let engine = &config.engine;
    let observed = prepare(observed, &engine.allowed_sources);

    let unclean = resolve_equations(&observed, &refs.equations, engine)?;
    let mut filled = unclean.clone();
    data_cleaning(&mut filled, engine.noise_floor, engine.quality_failure);

    if let (Some(table), Some(activity_cfg)) = (activity, &config.activity) {
        filled = update_based_on_activity(&filled, table, &activity_cfg.options);
    }

    let co2e_20 = generate_carbon_equivalencies(refs, &filled, Horizon::Twenty);
    let co2e_100 = generate_carbon_equivalencies(refs, &filled, Horizon::Hundred);
    let output = assemble(
        &filled,
        &co2e_20,
        &co2e_100,
        &refs.equations.target_sectors(),
        &engine.output_source,
    );

    Ok(Computed {
        unclean,
        filled,
        co2e_20,
        co2e_100,
        output,
    })
}

/// Runs the gap-filling pipeline. Nothing is written unless every step
/// succeeds.
pub fn run<S, K>(
    config: &RunConfig,
    data_dir: &Path,
    refs: &ReferenceData,
    source: &S,
    sink: &mut K,
) -> Result<RunSummary>
where
    S: EmissionsSource + ?Sized,
    K: EmissionsSink + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("gapfill", %run_id);
    let _guard = span.enter();

    let observed = load_observed(source, config)?;
    let observed_rows = observed.len();
    info!(rows = observed_rows, "loaded observed inventories");

    let activity = match &config.activity {
        Some(a) => Some(read_activity(&data_dir.join(&a.path))?),
        None => None,
    };

    let computed = compute(config, refs, observed, activity.as_ref())?;
    if let Some(snapshot) = &config.output.snapshot {
        write_wide(&data_dir.join(snapshot), &computed.unclean)?;
    }

    let records = to_records(&computed.output, Utc::now(), &refs.countries);
    sink.write(&records)?;

    let summary = RunSummary {
        run_id,
        observed_rows,
        filled_rows: computed.filled.len(),
        co2e_rows: computed.co2e_20.len() + computed.co2e_100.len(),
        output_rows: computed.output.len(),
        records_written: records.len(),
    };
    info!(
        filled = summary.filled_rows,
        output = summary.output_rows,
        records = summary.records_written,
        "run complete"
    );
    Ok(summary)
}

/// Builds the derived combustion inventory and returns it as records.
///
/// Records in the configured projected years carry the projected label.
/// When scaling factors are to be estimated, the national series are read
/// from `data_dir`; configured factors take precedence.
pub fn derive<S: EmissionsSource + ?Sized>(
    config: &RunConfig,
    data_dir: &Path,
    refs: &ReferenceData,
    source: &S,
) -> Result<Vec<EmissionsRecord>> {
    let derive_cfg = &config.derive;
    let mut options = derive_cfg.options.clone();
    if let Some(scaling) = options.scaling.as_mut() {
        if let Some(estimate) = &scaling.estimate {
            let series = read_national_series(&data_dir.join(&estimate.path))?;
            let estimated = estimate_country_factors(&series, estimate);
            info!(countries = estimated.len(), "estimated scaling factors");
            for (country, factor) in estimated {
                scaling.factors.entry(country).or_insert(factor);
            }
        }
    }

    let process = to_wide(&source.load(&derive_cfg.process_inventory)?);
    let combustion = to_wide(&source.load(&derive_cfg.combustion_inventory)?);
    let rows = derive_sectors(&process, &combustion, &options)?;

    let mut records = to_records(&rows, Utc::now(), &refs.countries);
    label_projected_years(&mut records, &derive_cfg.projected_years);
    Ok(records)
}

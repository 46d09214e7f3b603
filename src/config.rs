//! Run configuration, read from a TOML file.
//!
//! Paths are relative to the data directory given on the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activity::ActivityOptions;
use crate::derived::DerivationOptions;
use crate::error::{GapFillError, Result};
use crate::fill::FillOptions;
use crate::types::COMP_YEARS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Base inventory labels to load, e.g. `edgar`.
    pub inventories: Vec<String>,
    /// Also load `<inventory>-projected` for each base inventory.
    pub include_projected: bool,
    pub equations: PathBuf,
    pub gases: PathBuf,
    pub country_codes: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            inventories: vec![
                "edgar".to_string(),
                "faostat".to_string(),
                "ceds".to_string(),
                "ceds-derived".to_string(),
                "climate-trace".to_string(),
            ],
            include_projected: true,
            equations: PathBuf::from("gap_equations.csv"),
            gases: PathBuf::from("ghgs.csv"),
            country_codes: PathBuf::from("CT_ISO_Codes.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Wide activity table, one row per country.
    pub path: PathBuf,
    #[serde(flatten)]
    pub options: ActivityOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GwpConfig {
    /// Replaces the built-in non-fossil methane sectors when set.
    pub non_fossil_sectors: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    /// Pre-cleaning gap-fill snapshot, for debugging.
    pub snapshot: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("country_emissions.csv"),
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeriveConfig {
    pub process_inventory: String,
    pub combustion_inventory: String,
    /// Years written under the projected derived label.
    pub projected_years: Vec<i32>,
    #[serde(flatten)]
    pub options: DerivationOptions,
}

impl Default for DeriveConfig {
    fn default() -> Self {
        Self {
            process_inventory: "edgar".to_string(),
            combustion_inventory: "ceds".to_string(),
            projected_years: vec![2023, 2024],
            options: DerivationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub inputs: InputConfig,
    pub engine: FillOptions,
    pub activity: Option<ActivityConfig>,
    pub gwp: GwpConfig,
    pub output: OutputConfig,
    pub derive: DeriveConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| GapFillError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| GapFillError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.inventories.is_empty() {
            return Err(GapFillError::Config("inputs.inventories is empty".into()));
        }
        for inv in &self.inputs.inventories {
            if !self.engine.allowed_sources.contains(inv) {
                return Err(GapFillError::Config(format!(
                    "inventory `{inv}` is not in engine.allowed_sources"
                )));
            }
        }
        if self.engine.output_source.trim().is_empty() {
            return Err(GapFillError::Config("engine.output_source is empty".into()));
        }
        if self.engine.noise_floor.is_nan() || self.engine.noise_floor > 0.0 {
            return Err(GapFillError::Config(format!(
                "engine.noise_floor must be <= 0, got {}",
                self.engine.noise_floor
            )));
        }
        if let Some(activity) = &self.activity {
            if activity.options.gases.is_empty() {
                return Err(GapFillError::Config("activity.gases is empty".into()));
            }
        }
        if let Some(year) = self
            .derive
            .projected_years
            .iter()
            .find(|y| !COMP_YEARS.contains(y))
        {
            return Err(GapFillError::Config(format!(
                "derive.projected_years: {year} is outside {}..={}",
                COMP_YEARS[0],
                COMP_YEARS[COMP_YEARS.len() - 1]
            )));
        }
        let estimate = self.derive.options.scaling.as_ref().and_then(|s| s.estimate.as_ref());
        if let Some(estimate) = estimate {
            if estimate.first_year > estimate.last_year {
                return Err(GapFillError::Config(format!(
                    "derive.scaling.estimate: first_year {} is after last_year {}",
                    estimate.first_year, estimate.last_year
                )));
            }
        }
        Ok(())
    }

    /// Every source label the run reads, projected variants included.
    pub fn source_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for inv in &self.inputs.inventories {
            labels.push(inv.clone());
            let projected = format!("{inv}{}", crate::normalize::PROJECTED_SUFFIX);
            if self.inputs.include_projected && self.engine.allowed_sources.contains(&projected) {
                labels.push(projected);
            }
        }
        labels
    }
}

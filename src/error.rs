use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the gap-filling run.
///
/// Only `UnitMismatch` comes from the engine itself; the others come from
/// reading reference files, inventories and configuration.
#[derive(Debug, Error)]
pub enum GapFillError {
    #[error("cannot aggregate evidence across units: {}", units.join(", "))]
    UnitMismatch { units: Vec<String> },
    #[error("apportioned sectors do not add up to `{base_sector}`")]
    Apportionment { base_sector: String },
    #[error("{path}: missing column `{column}`")]
    MissingColumn { path: PathBuf, column: String },
    #[error("{path}: invalid year column `{value}`")]
    InvalidYear { path: PathBuf, value: String },
    #[error("{path}: invalid number `{value}` in column `{column}`")]
    InvalidNumber {
        path: PathBuf,
        column: String,
        value: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GapFillError>;

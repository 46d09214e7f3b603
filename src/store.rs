//! Storage seam. The engine never touches files directly; the pipeline
//! reads inventories through [`EmissionsSource`] and writes the final table
//! through [`EmissionsSink`].

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{GapFillError, Result};
use crate::normalize::{base_source, is_projected, EmissionsRecord};

/// Source of persistence-layer records, keyed by reporting entity.
pub trait EmissionsSource {
    fn load(&self, reporting_entity: &str) -> Result<Vec<EmissionsRecord>>;
}

/// Destination for the assembled table. A call replaces any earlier output.
pub trait EmissionsSink {
    fn write(&mut self, records: &[EmissionsRecord]) -> Result<()>;
}

/// Directory of `<reporting_entity>.csv` files plus one output file.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
    output: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            output: output.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn entity_path(&self, reporting_entity: &str) -> PathBuf {
        self.dir.join(format!("{reporting_entity}.csv"))
    }
}

impl EmissionsSource for CsvStore {
    /// A projected inventory without its own file is read from its base
    /// inventory's file, which may hold both labels.
    fn load(&self, reporting_entity: &str) -> Result<Vec<EmissionsRecord>> {
        let mut path = self.entity_path(reporting_entity);
        if !path.exists() && is_projected(reporting_entity) {
            path = self.entity_path(base_source(reporting_entity));
        }
        if !path.exists() {
            warn!(entity = reporting_entity, path = %path.display(), "no inventory file, skipping");
            return Ok(Vec::new());
        }
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)?;
        let mut records = Vec::new();
        for record in rdr.deserialize() {
            let record: EmissionsRecord = record?;
            if record.reporting_entity == reporting_entity {
                records.push(record);
            }
        }
        debug!(entity = reporting_entity, records = records.len(), "loaded inventory");
        Ok(records)
    }
}

impl EmissionsSink for CsvStore {
    /// Writes a temp file in the target directory and persists it over the
    /// target, so a failed run leaves the previous output in place.
    fn write(&mut self, records: &[EmissionsRecord]) -> Result<()> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| GapFillError::Io { path, source }
        };
        let parent = match self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io_err(&parent))?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_err(&parent))?;
        {
            let mut wtr = csv::Writer::from_writer(tmp.as_file_mut());
            for record in records {
                wtr.serialize(record)?;
            }
            wtr.flush().map_err(io_err(&self.output))?;
        }
        tmp.persist(&self.output)
            .map_err(|e| GapFillError::Io {
                path: self.output.clone(),
                source: e.error,
            })?;
        debug!(path = %self.output.display(), records = records.len(), "wrote output");
        Ok(())
    }
}

/// In-memory store, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub records: Vec<EmissionsRecord>,
    pub written: Option<Vec<EmissionsRecord>>,
}

impl MemoryStore {
    pub fn new(records: Vec<EmissionsRecord>) -> Self {
        Self {
            records,
            written: None,
        }
    }
}

impl EmissionsSource for MemoryStore {
    fn load(&self, reporting_entity: &str) -> Result<Vec<EmissionsRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.reporting_entity == reporting_entity)
            .cloned()
            .collect())
    }
}

impl EmissionsSink for MemoryStore {
    fn write(&mut self, records: &[EmissionsRecord]) -> Result<()> {
        self.written = Some(records.to_vec());
        Ok(())
    }
}

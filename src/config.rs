// ⚙️ Import configuration
// Loaded from a TOML file; every field has a default so an empty file is valid

use crate::dedup::{DuplicatePolicy, DEFAULT_TOLERANCE};
use crate::error::{ImportError, ImportResult};
use crate::normalizer::{AmountBases, Normalizer, TypeMappingTable};
use crate::parser::{SourceFormat, TestRecordFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPaths {
    pub tab: PathBuf,
    pub space: PathBuf,
    pub rows: PathBuf,
}

impl Default for DefaultPaths {
    fn default() -> Self {
        DefaultPaths {
            tab: PathBuf::from("data/storico.tsv"),
            space: PathBuf::from("data/servizi_dump.txt"),
            rows: PathBuf::from("data/estratti_pdf.json"),
        }
    }
}

impl DefaultPaths {
    pub fn for_format(&self, format: SourceFormat) -> &Path {
        match format {
            SourceFormat::TabDelimited => &self.tab,
            SourceFormat::SpaceDelimited => &self.space,
            SourceFormat::StructuredRow => &self.rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Duplicate amount tolerance used when a job does not set one
    pub tolerance: f64,
    pub duplicate_policy: DuplicatePolicy,
    /// Errors kept in a response; the total is always reported
    pub max_errors: usize,
    /// Records shown in a dry-run response
    pub sample_size: usize,
    /// Log progress every N committed records
    pub progress_every: usize,
    pub amount_bases: AmountBases,
    pub test_records: TestRecordFilter,
    pub type_table: TypeMappingTable,
    pub default_paths: DefaultPaths,
    pub database_path: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            tolerance: DEFAULT_TOLERANCE,
            duplicate_policy: DuplicatePolicy::SkipDuplicates,
            max_errors: 10,
            sample_size: 5,
            progress_every: 50,
            amount_bases: AmountBases::default(),
            test_records: TestRecordFilter::default(),
            type_table: TypeMappingTable::default(),
            default_paths: DefaultPaths::default(),
            database_path: PathBuf::from("services.db"),
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> ImportResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ImportError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ImportResult<Self> {
        let config: ImportConfig =
            toml::from_str(content).map_err(|e| ImportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load when a path is given, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> ImportResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ImportResult<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ImportError::Config(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.progress_every == 0 {
            return Err(ImportError::Config("progress_every must be at least 1".into()));
        }
        if self.type_table.dominance.is_empty() {
            return Err(ImportError::Config("type_table.dominance must not be empty".into()));
        }
        Ok(())
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.type_table.clone(), self.amount_bases)
    }
}

use crate::error::{CsvDbError, Result};
use crate::schema::IdStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_DATA_DIR: &str = "CSVDB_DATA_DIR";
pub const ENV_CONCURRENCY: &str = "CSVDB_CONCURRENCY";
pub const ENV_ID_STRATEGY: &str = "CSVDB_ID_STRATEGY";
pub const ENV_VALIDATE_UPDATES: &str = "CSVDB_VALIDATE_UPDATES";

const DEFAULT_ROOT: &str = "db";

/// How mutations of the same table from concurrent handlers are ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Each table is locked for the whole modify-and-persist cycle. Mutations
    /// of one table run one at a time; different tables don't wait on each other.
    #[default]
    Serialized,
    /// Mutations work on a snapshot and write it back when done, last writer
    /// wins. Concurrent mutations of one table can lose updates.
    Unsynchronized,
}

impl FromStr for ConcurrencyMode {
    type Err = CsvDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serialized" => Ok(ConcurrencyMode::Serialized),
            "unsynchronized" => Ok(ConcurrencyMode::Unsynchronized),
            other => Err(CsvDbError::Validation(format!(
                "Unknown concurrency mode '{other}'"
            ))),
        }
    }
}

/// Store settings, read from YAML and/or `CSVDB_*` environment variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the table files
    pub root: PathBuf,
    pub concurrency: ConcurrencyMode,
    pub id_strategy: IdStrategy,
    /// Type-check values on update as well as on insert
    pub validate_updates: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from(DEFAULT_ROOT),
            concurrency: ConcurrencyMode::default(),
            id_strategy: IdStrategy::default(),
            validate_updates: true,
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            ..StoreConfig::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }

    pub fn with_validate_updates(mut self, validate_updates: bool) -> Self {
        self.validate_updates = validate_updates;
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overridden by whatever `CSVDB_*` variables are set
    pub fn from_env() -> Result<Self> {
        StoreConfig::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(root) = lookup(ENV_DATA_DIR) {
            self.root = PathBuf::from(root);
        }
        if let Some(mode) = lookup(ENV_CONCURRENCY) {
            self.concurrency = mode.parse()?;
        }
        if let Some(strategy) = lookup(ENV_ID_STRATEGY) {
            self.id_strategy = strategy.parse()?;
        }
        if let Some(flag) = lookup(ENV_VALIDATE_UPDATES) {
            self.validate_updates = parse_bool(&flag).ok_or_else(|| {
                CsvDbError::Validation(format!(
                    "{ENV_VALIDATE_UPDATES}: expected a boolean, got '{flag}'"
                ))
            })?;
        }
        Ok(self)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

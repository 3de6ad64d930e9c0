use super::{Discovery, RawTable, TableKey, TablePersistence};
use crate::error::{CsvDbError, Entity, Result};
use crate::table::Table;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const EXTENSION: &str = "csv";

/// One `{db}-{table}.csv` file per table in a flat directory.
///
/// Every save rewrites the whole file: the content goes to a temporary file
/// in the same directory which is then renamed over the old one, so readers
/// never see a half-written table and a failed write leaves the previous
/// version in place.
#[derive(Debug, Clone)]
pub struct CsvPersistence {
    root: PathBuf,
}

impl CsvPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CsvPersistence { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_name(key: &TableKey) -> String {
        format!("{}-{}.{EXTENSION}", key.database, key.table)
    }

    pub fn path(&self, key: &TableKey) -> PathBuf {
        self.root.join(Self::file_name(key))
    }

    /// Split `{db}-{table}.csv` at the first `-`
    pub fn parse_file_name(file_name: &str) -> Option<TableKey> {
        let stem = file_name.strip_suffix(&format!(".{EXTENSION}"))?;
        let (database, table) = stem.split_once('-')?;
        if database.is_empty() || table.is_empty() {
            return None;
        }
        Some(TableKey::new(database, table))
    }
}

impl TablePersistence for CsvPersistence {
    fn save(&self, database: &str, table: &Table) -> Result<()> {
        let key = TableKey::new(database, table.name());
        let raw = RawTable::from_table(table);

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(&mut tmp);
            writer.write_record(&raw.types)?;
            writer.write_record(&raw.headers)?;
            for row in &raw.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(&key))?;

        log::debug!("Wrote {} rows to {}", raw.rows.len(), Self::file_name(&key));
        Ok(())
    }

    fn read_raw(&self, key: &TableKey) -> Result<RawTable> {
        let path = self.path(key);
        if !path.exists() {
            return Err(CsvDbError::not_found(Entity::Table, key.to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            records.push(record.iter().map(String::from).collect::<Vec<_>>());
        }

        if records.len() < 2 {
            return Err(CsvDbError::Corrupt {
                path: path.display().to_string(),
                reason: "missing type or header row".into(),
            });
        }

        let rows = records.split_off(2);
        let headers = records.pop().unwrap_or_default();
        let types = records.pop().unwrap_or_default();
        Ok(RawTable {
            types,
            headers,
            rows,
        })
    }

    fn remove(&self, key: &TableKey) -> Result<()> {
        let path = self.path(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::debug!("Removed {}", path.display());
        }
        Ok(())
    }

    fn discover(&self) -> Result<Discovery> {
        let pattern = format!(
            "{}/*.{EXTENSION}",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let files: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CsvDbError::Other(format!("Glob error: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_file())
            .collect();

        let mut discovery = Discovery::default();
        for path in files {
            let file_name = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            match Self::parse_file_name(&file_name) {
                Some(key) => discovery.tables.push(key),
                None => discovery.unrecognized.push(file_name),
            }
        }
        discovery.tables.sort();
        discovery.unrecognized.sort();
        Ok(discovery)
    }
}

//! Durable storage of tables.
//!
//! The store talks to a [`TablePersistence`] and never to files directly, so
//! the full-rewrite CSV layout can be replaced (incremental or log-structured
//! writes) without touching the table or database model.

mod csv_files;

pub use csv_files::CsvPersistence;

use crate::error::{CsvDbError, Result};
use crate::schema::{ColumnType, Field, IdStrategy, Schema};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the identity column in stored headers
pub const ID_COLUMN: &str = "id";

/// Identifies one persisted table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub database: String,
    pub table: String,
}

impl TableKey {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        TableKey {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Result of scanning the storage for tables
#[derive(Debug, Default)]
pub struct Discovery {
    pub tables: Vec<TableKey>,
    /// Stored entries that look like tables but whose name can't be split
    /// into a database and a table
    pub unrecognized: Vec<String>,
}

/// A table exactly as laid out in storage: a row of type names, a row of
/// column names, then `[id, value, ...]` rows. Index 0 is the identity column
/// in all three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub types: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn from_table(table: &Table) -> Self {
        let types = std::iter::once(ColumnType::Id)
            .chain(table.schema().column_types())
            .map(|t| t.to_string())
            .collect();
        let headers = std::iter::once(ID_COLUMN)
            .chain(table.schema().column_names())
            .map(String::from)
            .collect();
        let rows = table
            .rows()
            .map(|(id, values)| {
                std::iter::once(id.to_string())
                    .chain(values.iter().cloned())
                    .collect()
            })
            .collect();

        RawTable {
            types,
            headers,
            rows,
        }
    }

    /// Rebuild a table, replaying every stored row through `Table::insert`
    /// with its stored id. `location` names the source in error messages.
    pub fn into_table(self, name: &str, id_strategy: IdStrategy, location: &str) -> Result<Table> {
        let corrupt = |reason: String| CsvDbError::Corrupt {
            path: location.to_string(),
            reason,
        };

        if self.types.is_empty() || self.types.len() != self.headers.len() {
            return Err(corrupt(format!(
                "type row has {} entries but header row has {}",
                self.types.len(),
                self.headers.len()
            )));
        }
        if self.types[0] != ColumnType::Id.as_str() {
            return Err(corrupt(format!(
                "first column must be of type ID, found '{}'",
                self.types[0]
            )));
        }

        let mut fields = Vec::with_capacity(self.types.len() - 1);
        for (name, type_name) in self.headers.iter().zip(&self.types).skip(1) {
            let column_type: ColumnType = type_name
                .parse()
                .map_err(|e: CsvDbError| corrupt(e.to_string()))?;
            fields.push(Field::new(name.as_str(), column_type));
        }

        let width = self.headers.len();
        let mut table = Table::new(name, Schema::new(fields)).with_id_strategy(id_strategy);
        for (index, mut row) in self.rows.into_iter().enumerate() {
            // two header lines precede the data, lines are 1-based
            let line = index + 3;
            if row.len() != width {
                return Err(corrupt(format!(
                    "line {line}: expected {width} fields, found {}",
                    row.len()
                )));
            }
            let values = row.split_off(1);
            let id = row.pop().unwrap_or_default();
            table
                .insert(values, Some(id))
                .map_err(|e| corrupt(format!("line {line}: {e}")))?;
        }

        Ok(table)
    }
}

/// Storage backend for tables
pub trait TablePersistence: Send + Sync {
    /// Write the whole table, replacing what was stored before
    fn save(&self, database: &str, table: &Table) -> Result<()>;

    /// Read a stored table without interpreting it
    fn read_raw(&self, key: &TableKey) -> Result<RawTable>;

    /// Remove a stored table. Removing a table that isn't stored is not an error.
    fn remove(&self, key: &TableKey) -> Result<()>;

    /// Remove every stored table of a database, returning how many went
    fn remove_database(&self, database: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.discover()?.tables {
            if key.database == database {
                self.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// List everything stored
    fn discover(&self) -> Result<Discovery>;
}

use crate::schema::ColumnType;
use std::fmt;
use thiserror::Error;

/// The kind of object an operation failed to find or to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Database,
    Table,
    Row,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Database => "Database",
            Entity::Table => "Table",
            Entity::Row => "Row",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CsvDbError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid value '{value}' for column '{column}' ({column_type}): {reason}")]
    InvalidValue {
        column: String,
        column_type: ColumnType,
        value: String,
        reason: String,
    },

    #[error("{entity} not found: {name}")]
    NotFound { entity: Entity, name: String },

    #[error("{entity} already exists: {name}")]
    AlreadyExists { entity: Entity, name: String },

    #[error("Corrupt table file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Server error: {0}")]
    Remote(String),

    #[error("{0}")]
    Other(String),
}

impl CsvDbError {
    pub(crate) fn not_found(entity: Entity, name: impl Into<String>) -> Self {
        CsvDbError::NotFound {
            entity,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(entity: Entity, name: impl Into<String>) -> Self {
        CsvDbError::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    /// True for both malformed input and values rejected by a column type.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CsvDbError::Validation(_) | CsvDbError::InvalidValue { .. }
        )
    }
}

impl From<tempfile::PersistError> for CsvDbError {
    fn from(e: tempfile::PersistError) -> Self {
        CsvDbError::Io(e.error)
    }
}

pub type Result<T> = std::result::Result<T, CsvDbError>;

use crate::error::CsvDbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column type enumeration. The textual names are what appear in column
/// specs, in the first row of every table file and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "ID")]
    Id,
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "CHAR")]
    Char,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "DATEINVL")]
    DateInterval,
}

impl ColumnType {
    pub const ALL: [ColumnType; 7] = [
        ColumnType::Id,
        ColumnType::Int,
        ColumnType::Real,
        ColumnType::Char,
        ColumnType::String,
        ColumnType::Date,
        ColumnType::DateInterval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Id => "ID",
            ColumnType::Int => "INT",
            ColumnType::Real => "REAL",
            ColumnType::Char => "CHAR",
            ColumnType::String => "STRING",
            ColumnType::Date => "DATE",
            ColumnType::DateInterval => "DATEINVL",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = CsvDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CsvDbError::Validation(format!("Unknown column type '{s}'")))
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Field {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column list of a table. The identity column is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn column_types(&self) -> impl Iterator<Item = ColumnType> + '_ {
        self.fields.iter().map(|f| f.column_type)
    }
}

/// Strategy for generating fresh row identities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Ulid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

impl FromStr for IdStrategy {
    type Err = CsvDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uuid" => Ok(IdStrategy::Uuid),
            "ulid" => Ok(IdStrategy::Ulid),
            "nanoid" => Ok(IdStrategy::Nanoid),
            other => Err(CsvDbError::Validation(format!(
                "Unknown id strategy '{other}'"
            ))),
        }
    }
}

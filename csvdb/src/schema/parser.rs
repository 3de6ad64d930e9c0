use super::types::{ColumnType, Field, Schema};
use crate::error::{CsvDbError, Entity, Result};
use std::collections::HashSet;

/// Parse a compact column spec (`name:TYPE,name:TYPE`) into a Schema
pub fn parse_column_spec(spec: &str) -> Result<Schema> {
    let mut fields = Vec::new();
    let mut seen = HashSet::new();

    for column in spec.split(',') {
        let parts: Vec<&str> = column.split(':').map(str::trim).collect();
        let (name, type_name) = match parts.as_slice() {
            [name, type_name] if !name.is_empty() => (*name, *type_name),
            _ => {
                return Err(CsvDbError::Validation(format!(
                    "Wrong columns definition: '{column}' (expected name:TYPE)"
                )))
            }
        };

        let column_type: ColumnType = type_name.parse()?;
        if !seen.insert(name) {
            return Err(CsvDbError::Validation(format!(
                "Wrong columns definition: duplicate column '{name}'"
            )));
        }
        fields.push(Field::new(name, column_type));
    }

    Ok(Schema::new(fields))
}

/// Database and table names end up in `{db}-{table}.csv`, so anything that
/// would make the file name ambiguous or escape the data directory is refused.
pub fn validate_name(entity: Entity, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CsvDbError::Validation(format!("{entity} name is empty")));
    }
    if let Some(c) = name.chars().find(|c| matches!(c, '-' | '.' | '/' | '\\')) {
        return Err(CsvDbError::Validation(format!(
            "{entity} name '{name}' contains forbidden character '{c}'"
        )));
    }
    Ok(())
}

use crate::error::{CsvDbError, Result};
use crate::schema::{ColumnType, Field, Schema};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

const DATE_FORMAT: &str = "%Y.%m.%d";

fn date_shape() -> &'static Regex {
    static DATE_SHAPE: OnceLock<Regex> = OnceLock::new();
    DATE_SHAPE.get_or_init(|| {
        Regex::new(r"^\d{4}\.\d{2}\.\d{2}$").expect("valid date regex")
    })
}

/// Validate a full value vector against a schema: arity first, then every
/// column in schema order. Stops at the first offending column.
pub fn validate_row(schema: &Schema, values: &[String]) -> Result<()> {
    check_arity(schema, values)?;
    for (field, value) in schema.fields().iter().zip(values) {
        validate_value(field, value)?;
    }
    Ok(())
}

/// Check that a value vector has exactly one entry per column.
pub fn check_arity(schema: &Schema, values: &[String]) -> Result<()> {
    if values.len() != schema.len() {
        return Err(CsvDbError::Validation(format!(
            "Row data does not match table schema: expected {} values, got {}",
            schema.len(),
            values.len()
        )));
    }
    Ok(())
}

/// Validate one value against its column
pub fn validate_value(field: &Field, value: &str) -> Result<()> {
    let outcome = match field.column_type {
        ColumnType::Id | ColumnType::String => Ok(()),
        ColumnType::Int => check_int(value),
        ColumnType::Real => value
            .trim()
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| "not a floating-point number".to_string()),
        ColumnType::Char => {
            let n = value.chars().count();
            if n == 1 {
                Ok(())
            } else {
                Err(format!("expected exactly one character, got {n}"))
            }
        }
        ColumnType::Date => check_date(value),
        ColumnType::DateInterval => check_date_interval(value),
    };

    outcome.map_err(|reason| CsvDbError::InvalidValue {
        column: field.name.clone(),
        column_type: field.column_type,
        value: value.to_string(),
        reason,
    })
}

fn check_int(value: &str) -> std::result::Result<(), String> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix('+')
        .or_else(|| trimmed.strip_prefix('-'))
        .unwrap_or(trimmed);

    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err("not a base-10 integer".to_string())
    }
}

fn check_date(value: &str) -> std::result::Result<(), String> {
    if !date_shape().is_match(value) {
        return Err("expected a date formatted as YYYY.MM.DD".to_string());
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(|_| ())
        .map_err(|e| format!("not a calendar date ({e})"))
}

fn check_date_interval(value: &str) -> std::result::Result<(), String> {
    let parts: Vec<&str> = value.split('-').collect();
    match parts.as_slice() {
        [start, end] => {
            check_date(start).map_err(|e| format!("interval start: {e}"))?;
            check_date(end).map_err(|e| format!("interval end: {e}"))
        }
        _ => Err("expected two dates separated by '-'".to_string()),
    }
}

use crate::error::{CsvDbError, Entity, Result};
use crate::schema::{IdStrategy, Schema};
use crate::validation;
use indexmap::IndexMap;
use std::collections::HashSet;

/// In-memory table: a schema plus rows keyed by their identity.
///
/// Rows keep insertion order, which is the order they are written to disk
/// and the order duplicate detection walks them in.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Schema,
    rows: IndexMap<String, Vec<String>>,
    id_strategy: IdStrategy,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Table {
            name: name.into(),
            schema,
            rows: IndexMap::new(),
            id_strategy: IdStrategy::default(),
        }
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Get the values of a row by identity
    pub fn get(&self, id: &str) -> Option<&[String]> {
        self.rows.get(id).map(Vec::as_slice)
    }

    /// Iterate `(id, values)` in insertion order
    pub fn rows(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.rows.iter().map(|(id, values)| (id.as_str(), values.as_slice()))
    }

    /// Insert a validated row. A caller-supplied `id` is used verbatim (this is
    /// how identities survive a reload); otherwise a fresh one is generated.
    /// Returns the row identity.
    pub fn insert(&mut self, values: Vec<String>, id: Option<String>) -> Result<String> {
        validation::validate_row(&self.schema, &values)?;

        let id = match id {
            Some(id) => {
                if id.is_empty() {
                    return Err(CsvDbError::Validation("Row id is empty".into()));
                }
                if self.rows.contains_key(&id) {
                    return Err(CsvDbError::already_exists(Entity::Row, id));
                }
                id
            }
            None => self.fresh_id(),
        };

        self.rows.insert(id.clone(), values);
        Ok(id)
    }

    /// Replace the full value vector of a row, validating it first.
    pub fn update(&mut self, id: &str, values: Vec<String>) -> Result<()> {
        self.ensure_row(id)?;
        validation::validate_row(&self.schema, &values)?;
        self.rows.insert(id.to_string(), values);
        Ok(())
    }

    /// Replace a row without type checks. Arity is still enforced so every
    /// row keeps one value per column.
    pub fn update_unchecked(&mut self, id: &str, values: Vec<String>) -> Result<()> {
        self.ensure_row(id)?;
        validation::check_arity(&self.schema, &values)?;
        self.rows.insert(id.to_string(), values);
        Ok(())
    }

    /// Remove a row, returning its values
    pub fn delete(&mut self, id: &str) -> Result<Vec<String>> {
        self.rows
            .shift_remove(id)
            .ok_or_else(|| CsvDbError::not_found(Entity::Row, id))
    }

    /// Ids of rows whose values repeat an earlier row exactly. The first
    /// occurrence of every value tuple is not reported.
    pub fn find_duplicates(&self) -> Vec<String> {
        let mut seen: HashSet<&[String]> = HashSet::new();
        let mut duplicates = Vec::new();
        for (id, values) in &self.rows {
            if !seen.insert(values.as_slice()) {
                duplicates.push(id.clone());
            }
        }
        duplicates
    }

    fn ensure_row(&self, id: &str) -> Result<()> {
        if self.rows.contains_key(id) {
            Ok(())
        } else {
            Err(CsvDbError::not_found(Entity::Row, id))
        }
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = self.id_strategy.generate();
            if !self.rows.contains_key(&id) {
                return id;
            }
        }
    }
}

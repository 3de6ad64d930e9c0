use crate::error::{CsvDbError, Entity, Result};
use crate::schema::{validate_name, Schema};
use crate::table::Table;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Shared, lockable slot holding one table.
///
/// The slot is emptied when the table is dropped, so a handler that fetched
/// the handle before the drop sees `None` instead of writing the table back.
#[derive(Debug, Clone)]
pub struct TableHandle(Arc<Mutex<Option<Table>>>);

impl TableHandle {
    fn new(table: Table) -> Self {
        TableHandle(Arc::new(Mutex::new(Some(table))))
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<Table>> {
        self.0.lock()
    }

    /// True when both handles point at the same slot
    pub fn same_slot(&self, other: &TableHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Clone of the current table state, `None` once dropped
    pub fn snapshot(&self) -> Option<Table> {
        self.0.lock().clone()
    }
}

/// A named collection of tables
#[derive(Debug)]
pub struct Database {
    name: String,
    tables: IndexMap<String, TableHandle>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Database {
            name: name.into(),
            tables: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an empty table with the given schema
    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<TableHandle> {
        self.attach_table(Table::new(name, schema))
    }

    /// Register an already built table (fresh or reloaded from disk)
    pub fn attach_table(&mut self, table: Table) -> Result<TableHandle> {
        validate_name(Entity::Table, table.name())?;
        if self.tables.contains_key(table.name()) {
            return Err(CsvDbError::already_exists(
                Entity::Table,
                format!("{}.{}", self.name, table.name()),
            ));
        }

        let name = table.name().to_string();
        let handle = TableHandle::new(table);
        self.tables.insert(name, handle.clone());
        Ok(handle)
    }

    /// Detach a table, returning its handle so the caller can retire it
    pub fn drop_table(&mut self, name: &str) -> Result<TableHandle> {
        self.tables
            .shift_remove(name)
            .ok_or_else(|| self.missing(name))
    }

    /// Detach `name` only if it is still registered with `handle`.
    /// Returns whether the entry was removed.
    pub fn detach_handle(&mut self, name: &str, handle: &TableHandle) -> bool {
        match self.tables.get(name) {
            Some(current) if current.same_slot(handle) => {
                self.tables.shift_remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn get_table(&self, name: &str) -> Result<TableHandle> {
        self.tables.get(name).cloned().ok_or_else(|| self.missing(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Handles of every table, in creation order
    pub fn tables(&self) -> impl Iterator<Item = &TableHandle> {
        self.tables.values()
    }

    fn missing(&self, table: &str) -> CsvDbError {
        CsvDbError::not_found(Entity::Table, format!("{}.{}", self.name, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_column_spec;

    fn schema() -> Schema {
        parse_column_spec("name:STRING,price:REAL").unwrap()
    }

    #[test]
    fn test_create_and_get_table() {
        let mut db = Database::new("shop");
        db.create_table("items", schema()).unwrap();
        assert!(db.contains_table("items"));

        let handle = db.get_table("items").unwrap();
        let guard = handle.lock();
        let table = guard.as_ref().unwrap();
        assert_eq!(table.name(), "items");
        assert_eq!(table.schema(), &schema());
    }

    #[test]
    fn test_create_existing_table_fails() {
        let mut db = Database::new("shop");
        db.create_table("items", schema()).unwrap();
        let err = db.create_table("items", schema()).unwrap_err();
        assert!(matches!(err, CsvDbError::AlreadyExists { entity: Entity::Table, .. }));
    }

    #[test]
    fn test_drop_and_get_missing_table() {
        let mut db = Database::new("shop");
        db.create_table("items", schema()).unwrap();
        db.drop_table("items").unwrap();

        assert!(matches!(
            db.get_table("items").unwrap_err(),
            CsvDbError::NotFound { entity: Entity::Table, .. }
        ));
        assert!(db.drop_table("items").is_err());
    }

    #[test]
    fn test_table_name_is_validated() {
        let mut db = Database::new("shop");
        assert!(db.create_table("old-items", schema()).unwrap_err().is_validation());
    }

    #[test]
    fn test_handles_share_state() {
        let mut db = Database::new("shop");
        let a = db.create_table("items", schema()).unwrap();
        let b = db.get_table("items").unwrap();

        a.lock()
            .as_mut()
            .unwrap()
            .insert(vec!["Pen".into(), "1.5".into()], None)
            .unwrap();
        assert_eq!(b.snapshot().unwrap().len(), 1);

        a.lock().take();
        assert!(b.snapshot().is_none());
    }

    #[test]
    fn test_detach_handle_leaves_newer_table_alone() {
        let mut db = Database::new("shop");
        let old = db.create_table("items", schema()).unwrap();
        db.drop_table("items").unwrap();
        let newer = db.create_table("items", schema()).unwrap();

        assert!(!old.same_slot(&newer));
        assert!(!db.detach_handle("items", &old));
        assert!(db.contains_table("items"));

        assert!(db.detach_handle("items", &newer));
        assert!(!db.contains_table("items"));
        assert!(!db.detach_handle("items", &newer));
    }

    #[test]
    fn test_table_names_keep_creation_order() {
        let mut db = Database::new("shop");
        for name in ["items", "orders", "customers"] {
            db.create_table(name, schema()).unwrap();
        }
        assert_eq!(db.table_names(), vec!["items", "orders", "customers"]);
    }
}

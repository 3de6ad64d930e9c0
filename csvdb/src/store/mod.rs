use crate::config::{ConcurrencyMode, StoreConfig};
use crate::database::{Database, TableHandle};
use crate::error::{CsvDbError, Entity, Result};
use crate::persistence::{CsvPersistence, RawTable, TableKey, TablePersistence, ID_COLUMN};
use crate::schema::{parse_column_spec, validate_name, ColumnType, Schema};
use crate::table::Table;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The root object every handler calls into.
/// Owns the databases, keeps each table's file in step with memory and
/// decides how concurrent mutations of a table are ordered.
pub struct Store {
    config: StoreConfig,
    persistence: Box<dyn TablePersistence>,
    databases: RwLock<IndexMap<String, Database>>,
}

/// A table as returned to callers: identity column first, rows in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub types: Vec<ColumnType>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    fn from_table(table: &Table) -> Self {
        let types = std::iter::once(ColumnType::Id)
            .chain(table.schema().column_types())
            .collect();
        let columns = std::iter::once(ID_COLUMN)
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

        TableData {
            types,
            columns,
            rows,
        }
    }
}

/// Outcome of loading the persisted tables
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<TableKey>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A stored table that could not be loaded
#[derive(Debug)]
pub struct LoadFailure {
    pub source: String,
    pub error: CsvDbError,
}

/// Row counts per table, for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub root: String,
    pub concurrency: ConcurrencyMode,
    pub databases: BTreeMap<String, BTreeMap<String, usize>>,
}

impl Store {
    /// Open the CSV store described by `config`: create the data directory if
    /// needed and load every table file found in it. Tables that fail to load
    /// are logged and left out.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.root.exists() {
            log::info!("Creating data directory {}", config.root.display());
            std::fs::create_dir_all(&config.root)?;
        }

        let persistence = CsvPersistence::new(config.root.clone());
        Store::open_with(config, persistence)
    }

    /// Like [`Store::open`] over any persistence backend
    pub fn open_with(
        config: StoreConfig,
        persistence: impl TablePersistence + 'static,
    ) -> Result<Self> {
        let store = Store::new(config, persistence);
        let report = store.load()?;
        log::info!(
            "Loaded {} tables from {} ({} failed)",
            report.loaded.len(),
            store.config.root.display(),
            report.failures.len()
        );
        Ok(store)
    }

    /// An empty store over any persistence backend. Nothing is loaded.
    pub fn new(config: StoreConfig, persistence: impl TablePersistence + 'static) -> Self {
        Store {
            config,
            persistence: Box::new(persistence),
            databases: RwLock::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rebuild databases and tables from storage, keeping stored row ids.
    /// A table that fails to parse is reported and skipped; the others load.
    pub fn load(&self) -> Result<LoadReport> {
        let discovery = self.persistence.discover()?;
        let mut report = LoadReport::default();

        for name in discovery.unrecognized {
            log::error!("Skipping {name}: not named {{database}}-{{table}}.csv");
            report.failures.push(LoadFailure {
                error: CsvDbError::Corrupt {
                    path: name.clone(),
                    reason: "file name does not split into database and table".into(),
                },
                source: name,
            });
        }

        for key in discovery.tables {
            match self.load_table(&key) {
                Ok(rows) => {
                    log::debug!("Loaded {key} ({rows} rows)");
                    report.loaded.push(key);
                }
                Err(error) => {
                    log::error!("Failed to load {key}: {error}");
                    report.failures.push(LoadFailure {
                        source: key.to_string(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn load_table(&self, key: &TableKey) -> Result<usize> {
        validate_name(Entity::Database, &key.database)?;
        let raw = self.persistence.read_raw(key)?;
        let table = raw.into_table(&key.table, self.config.id_strategy, &key.to_string())?;
        let rows = table.len();

        let mut databases = self.databases.write();
        databases
            .entry(key.database.clone())
            .or_insert_with(|| Database::new(key.database.as_str()))
            .attach_table(table)?;
        Ok(rows)
    }

    /// Make sure a database exists in memory, creating an empty one if needed
    pub fn ensure_database(&self, name: &str) -> Result<()> {
        validate_name(Entity::Database, name)?;
        let mut databases = self.databases.write();
        if !databases.contains_key(name) {
            log::info!("Creating database {name}");
            databases.insert(name.to_string(), Database::new(name));
        }
        Ok(())
    }

    /// Create an empty database. Creating one that exists is a no-op.
    pub fn create_database(&self, name: &str) -> Result<()> {
        self.ensure_database(name)
    }

    /// Drop a database and delete every file stored for it
    pub fn drop_database(&self, name: &str) -> Result<()> {
        // Held until the files are gone so a concurrent create_table can't
        // write a file into the database being removed.
        let mut databases = self.databases.write();
        let removed = databases.shift_remove(name);
        if let Some(database) = &removed {
            for handle in database.tables() {
                handle.lock().take();
            }
        }

        let files = self.persistence.remove_database(name)?;
        drop(databases);
        if removed.is_none() && files == 0 {
            return Err(CsvDbError::not_found(Entity::Database, name));
        }

        log::info!("Dropped database {name} ({files} table files removed)");
        Ok(())
    }

    /// Create a table from a `name:TYPE,...` column spec and write its
    /// (empty) file right away so the table is discoverable
    pub fn create_table(&self, database: &str, table: &str, column_spec: &str) -> Result<()> {
        let schema = parse_column_spec(column_spec)?;
        self.create_table_with_schema(database, table, schema)
    }

    pub fn create_table_with_schema(
        &self,
        database: &str,
        table: &str,
        schema: Schema,
    ) -> Result<()> {
        validate_name(Entity::Database, database)?;
        validate_name(Entity::Table, table)?;
        if schema.is_empty() {
            return Err(CsvDbError::Validation(format!(
                "Table {database}.{table} needs at least one column"
            )));
        }

        let new_table = Table::new(table, schema).with_id_strategy(self.config.id_strategy);

        let mut databases = self.databases.write();
        let db = databases
            .entry(database.to_string())
            .or_insert_with(|| Database::new(database));
        if db.contains_table(table) {
            return Err(CsvDbError::already_exists(
                Entity::Table,
                format!("{database}.{table}"),
            ));
        }

        self.persistence.save(database, &new_table)?;
        db.attach_table(new_table)?;
        log::info!("Created table {database}.{table}");
        Ok(())
    }

    /// Drop a table and delete its file
    pub fn drop_table(&self, database: &str, table: &str) -> Result<()> {
        let handle = self.table_handle(database, table)?;
        {
            let mut guard = handle.lock();
            if guard.is_none() {
                return Err(missing_table(database, table));
            }
            self.persistence.remove(&TableKey::new(database, table))?;
            guard.take();
        }

        // The name may already belong to a newer table if the database was
        // dropped and rebuilt meanwhile; only detach the handle retired here.
        if let Some(db) = self.databases.write().get_mut(database) {
            if !db.detach_handle(table, &handle) {
                log::debug!("{database}.{table} was replaced before it could be detached");
            }
        }
        log::info!("Dropped table {database}.{table}");
        Ok(())
    }

    /// Insert a row, returning its freshly generated id
    pub fn insert(&self, database: &str, table: &str, values: Vec<String>) -> Result<String> {
        let id = self.mutate(database, table, |t| t.insert(values, None))?;
        log::debug!("Inserted {id} into {database}.{table}");
        Ok(id)
    }

    /// Replace all values of a row
    pub fn update(&self, database: &str, table: &str, id: &str, values: Vec<String>) -> Result<()> {
        let validate = self.config.validate_updates;
        self.mutate(database, table, |t| {
            if validate {
                t.update(id, values)
            } else {
                t.update_unchecked(id, values)
            }
        })?;
        log::debug!("Updated {id} in {database}.{table}");
        Ok(())
    }

    pub fn delete(&self, database: &str, table: &str, id: &str) -> Result<()> {
        self.mutate(database, table, |t| t.delete(id).map(|_| ()))?;
        log::debug!("Deleted {id} from {database}.{table}");
        Ok(())
    }

    /// Remove every row that repeats an earlier one, with a single rewrite.
    /// Returns how many rows were removed.
    pub fn delete_duplicates(&self, database: &str, table: &str) -> Result<usize> {
        let removed = self.mutate(database, table, |t| {
            let duplicates = t.find_duplicates();
            for id in &duplicates {
                t.delete(id)?;
            }
            Ok(duplicates.len())
        })?;
        log::debug!("Removed {removed} duplicate rows from {database}.{table}");
        Ok(removed)
    }

    /// Database name -> table names, as found in storage (not in memory)
    pub fn list_databases_and_tables(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut listing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in self.persistence.discover()?.tables {
            listing.entry(key.database).or_default().push(key.table);
        }
        Ok(listing)
    }

    /// Column types and names (identity first) plus every row
    pub fn read_table(&self, database: &str, table: &str) -> Result<TableData> {
        let handle = self.table_handle(database, table)?;
        let guard = handle.lock();
        let t = guard
            .as_ref()
            .ok_or_else(|| missing_table(database, table))?;
        Ok(TableData::from_table(t))
    }

    /// Values of one row
    pub fn get_row(&self, database: &str, table: &str, id: &str) -> Result<Vec<String>> {
        let handle = self.table_handle(database, table)?;
        let guard = handle.lock();
        let t = guard
            .as_ref()
            .ok_or_else(|| missing_table(database, table))?;
        t.get(id)
            .map(<[String]>::to_vec)
            .ok_or_else(|| CsvDbError::not_found(Entity::Row, id))
    }

    /// The table's stored form, read straight from storage
    pub fn fetch_raw_table(&self, database: &str, table: &str) -> Result<RawTable> {
        validate_name(Entity::Database, database)?;
        validate_name(Entity::Table, table)?;
        self.persistence.read_raw(&TableKey::new(database, table))
    }

    /// Names of the databases currently in memory
    pub fn database_names(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    pub fn status(&self) -> StoreStatus {
        let databases = self.databases.read();
        let mut summary = BTreeMap::new();
        for (name, db) in databases.iter() {
            let tables: BTreeMap<String, usize> = db
                .tables()
                .filter_map(|handle| {
                    let guard = handle.lock();
                    guard.as_ref().map(|t| (t.name().to_string(), t.len()))
                })
                .collect();
            summary.insert(name.clone(), tables);
        }

        StoreStatus {
            root: self.config.root.display().to_string(),
            concurrency: self.config.concurrency,
            databases: summary,
        }
    }

    fn table_handle(&self, database: &str, table: &str) -> Result<TableHandle> {
        let databases = self.databases.read();
        let db = databases
            .get(database)
            .ok_or_else(|| CsvDbError::not_found(Entity::Database, database))?;
        db.get_table(table)
    }

    /// Apply `f` to a copy of the table, persist the copy, then make it the
    /// live table. A failure at any step leaves memory and storage untouched.
    fn mutate<R>(
        &self,
        database: &str,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<R>,
    ) -> Result<R> {
        let handle = self.table_handle(database, table)?;

        match self.config.concurrency {
            ConcurrencyMode::Serialized => {
                let mut guard = handle.lock();
                let mut staged = guard
                    .as_ref()
                    .ok_or_else(|| missing_table(database, table))?
                    .clone();
                let out = f(&mut staged)?;
                self.persistence.save(database, &staged)?;
                *guard = Some(staged);
                Ok(out)
            }
            ConcurrencyMode::Unsynchronized => {
                let mut staged = handle
                    .snapshot()
                    .ok_or_else(|| missing_table(database, table))?;
                let out = f(&mut staged)?;
                self.persistence.save(database, &staged)?;

                let mut guard = handle.lock();
                if guard.is_none() {
                    return Err(missing_table(database, table));
                }
                *guard = Some(staged);
                Ok(out)
            }
        }
    }
}

fn missing_table(database: &str, table: &str) -> CsvDbError {
    CsvDbError::not_found(Entity::Table, format!("{database}.{table}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Discovery;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::new(tmp.path())).unwrap();
        (tmp, store)
    }

    fn reopen(tmp: &TempDir) -> Store {
        Store::open(StoreConfig::new(tmp.path())).unwrap()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn setup_people(store: &Store) {
        store.create_database("test_db").unwrap();
        store
            .create_table("test_db", "test_table", "name:STRING,age:INT")
            .unwrap();
    }

    fn file_content(tmp: &TempDir, name: &str) -> String {
        std::fs::read_to_string(tmp.path().join(name)).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("db");
        let store = Store::open(StoreConfig::new(&root)).unwrap();
        assert!(root.is_dir());
        assert!(store.database_names().is_empty());
    }

    #[test]
    fn test_end_to_end_shop() {
        let (_tmp, store) = setup_test_store();
        store.create_database("shop").unwrap();
        store
            .create_table("shop", "items", "name:STRING,price:REAL")
            .unwrap();
        let id = store.insert("shop", "items", row(&["Pen", "1.5"])).unwrap();

        let data = store.read_table("shop", "items").unwrap();
        assert_eq!(
            data.types,
            vec![ColumnType::Id, ColumnType::String, ColumnType::Real]
        );
        assert_eq!(data.columns, vec!["id", "name", "price"]);
        assert_eq!(data.rows, vec![vec![id, "Pen".to_string(), "1.5".to_string()]]);
    }

    #[test]
    fn test_insert_then_read_by_id() {
        let (_tmp, store) = setup_test_store();
        setup_people(&store);
        let id = store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        assert_eq!(
            store.get_row("test_db", "test_table", &id).unwrap(),
            row(&["John", "25"])
        );
    }

    #[test]
    fn test_invalid_insert_changes_nothing() {
        let (tmp, store) = setup_test_store();
        setup_people(&store);
        store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        let before = file_content(&tmp, "test_db-test_table.csv");

        let err = store
            .insert("test_db", "test_table", row(&["Jane"]))
            .unwrap_err();
        assert!(err.is_validation());
        let err = store
            .insert("test_db", "test_table", row(&["Jane", "thirty"]))
            .unwrap_err();
        assert!(err.is_validation());

        assert_eq!(store.read_table("test_db", "test_table").unwrap().rows.len(), 1);
        assert_eq!(file_content(&tmp, "test_db-test_table.csv"), before);
    }

    #[test]
    fn test_update_missing_row() {
        let (tmp, store) = setup_test_store();
        setup_people(&store);
        store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        let before = store.read_table("test_db", "test_table").unwrap();
        let file_before = file_content(&tmp, "test_db-test_table.csv");

        let err = store
            .update("test_db", "test_table", "missing", row(&["Jane", "30"]))
            .unwrap_err();
        assert!(matches!(err, CsvDbError::NotFound { entity: Entity::Row, .. }));
        assert_eq!(store.read_table("test_db", "test_table").unwrap(), before);
        assert_eq!(file_content(&tmp, "test_db-test_table.csv"), file_before);
    }

    #[test]
    fn test_update_validates_by_default() {
        let (_tmp, store) = setup_test_store();
        setup_people(&store);
        let id = store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();

        store
            .update("test_db", "test_table", &id, row(&["John", "26"]))
            .unwrap();
        assert!(store
            .update("test_db", "test_table", &id, row(&["John", "old"]))
            .unwrap_err()
            .is_validation());
        assert_eq!(
            store.get_row("test_db", "test_table", &id).unwrap(),
            row(&["John", "26"])
        );
    }

    #[test]
    fn test_unchecked_updates_when_disabled() {
        let tmp = TempDir::new().unwrap();
        let store =
            Store::open(StoreConfig::new(tmp.path()).with_validate_updates(false)).unwrap();
        setup_people(&store);
        let id = store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();

        store
            .update("test_db", "test_table", &id, row(&["John", "old"]))
            .unwrap();
        assert_eq!(
            store.get_row("test_db", "test_table", &id).unwrap(),
            row(&["John", "old"])
        );
        // arity still holds
        assert!(store
            .update("test_db", "test_table", &id, row(&["John"]))
            .is_err());
    }

    #[test]
    fn test_delete_row() {
        let (_tmp, store) = setup_test_store();
        setup_people(&store);
        let id1 = store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        let id2 = store
            .insert("test_db", "test_table", row(&["Jane", "30"]))
            .unwrap();

        store.delete("test_db", "test_table", &id1).unwrap();
        let data = store.read_table("test_db", "test_table").unwrap();
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.rows[0][0], id2);
        assert!(store.delete("test_db", "test_table", &id1).is_err());
    }

    #[test]
    fn test_delete_duplicates() {
        let (tmp, store) = setup_test_store();
        setup_people(&store);
        let john = store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        let jane = store
            .insert("test_db", "test_table", row(&["Jane", "30"]))
            .unwrap();

        assert_eq!(store.delete_duplicates("test_db", "test_table").unwrap(), 1);

        let data = store.read_table("test_db", "test_table").unwrap();
        let ids: Vec<&str> = data.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec![john.as_str(), jane.as_str()]);

        let reloaded = reopen(&tmp);
        assert_eq!(reloaded.read_table("test_db", "test_table").unwrap(), data);
        assert_eq!(store.delete_duplicates("test_db", "test_table").unwrap(), 0);
    }

    #[test]
    fn test_round_trip_keeps_schema_and_ids() {
        let (tmp, store) = setup_test_store();
        store.create_database("shop").unwrap();
        store
            .create_table("shop", "items", "name:STRING,price:REAL")
            .unwrap();
        for (name, price) in [("Pen", "1.5"), ("Ink, blue", "3"), ("Pad \"A4\"", "2.25")] {
            store.insert("shop", "items", row(&[name, price])).unwrap();
        }
        let original = store.read_table("shop", "items").unwrap();

        let fresh = reopen(&tmp);
        assert_eq!(fresh.read_table("shop", "items").unwrap(), original);
        assert_eq!(fresh.database_names(), vec!["shop"]);
    }

    #[test]
    fn test_new_rows_after_reload_get_fresh_ids() {
        let (tmp, store) = setup_test_store();
        setup_people(&store);
        let first = store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();

        let fresh = reopen(&tmp);
        let second = fresh
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(fresh.read_table("test_db", "test_table").unwrap().rows.len(), 2);
    }

    #[test]
    fn test_create_table_writes_empty_file() {
        let (tmp, store) = setup_test_store();
        store.create_database("shop").unwrap();
        store
            .create_table("shop", "items", "name:STRING,price:REAL")
            .unwrap();

        assert_eq!(
            file_content(&tmp, "shop-items.csv"),
            "ID,STRING,REAL\nid,name,price\n"
        );
        let listing = store.list_databases_and_tables().unwrap();
        assert_eq!(listing["shop"], vec!["items"]);
    }

    #[test]
    fn test_create_table_errors() {
        let (_tmp, store) = setup_test_store();
        store.create_database("shop").unwrap();
        store.create_table("shop", "items", "name:STRING").unwrap();

        assert!(matches!(
            store.create_table("shop", "items", "name:STRING").unwrap_err(),
            CsvDbError::AlreadyExists { entity: Entity::Table, .. }
        ));
        assert!(store
            .create_table("shop", "orders", "qty:NUMBER")
            .unwrap_err()
            .is_validation());
        assert!(store
            .create_table("shop", "orders", "qty")
            .unwrap_err()
            .is_validation());
        assert!(store
            .create_table("shop", "old-orders", "qty:INT")
            .unwrap_err()
            .is_validation());
        assert_eq!(store.list_databases_and_tables().unwrap()["shop"], vec!["items"]);
    }

    #[test]
    fn test_create_table_ensures_database() {
        let (_tmp, store) = setup_test_store();
        store.create_table("shop", "items", "name:STRING").unwrap();
        assert_eq!(store.database_names(), vec!["shop"]);
    }

    #[test]
    fn test_missing_database_is_not_materialized() {
        let (_tmp, store) = setup_test_store();
        let err = store.insert("shpo", "items", row(&["Pen"])).unwrap_err();
        assert!(matches!(err, CsvDbError::NotFound { entity: Entity::Database, .. }));
        assert!(store.database_names().is_empty());

        store.create_database("shop").unwrap();
        let err = store.read_table("shop", "items").unwrap_err();
        assert!(matches!(err, CsvDbError::NotFound { entity: Entity::Table, .. }));
    }

    #[test]
    fn test_create_database_is_idempotent() {
        let (_tmp, store) = setup_test_store();
        store.create_database("shop").unwrap();
        store.create_table("shop", "items", "name:STRING").unwrap();
        store.create_database("shop").unwrap();
        // existing tables survive a repeated create
        assert!(store.read_table("shop", "items").is_ok());
        assert!(store.create_database("my-shop").is_err());
    }

    #[test]
    fn test_drop_table() {
        let (tmp, store) = setup_test_store();
        store.create_table("shop", "items", "name:STRING").unwrap();
        store.create_table("shop", "orders", "qty:INT").unwrap();

        store.drop_table("shop", "items").unwrap();
        assert!(!tmp.path().join("shop-items.csv").exists());
        assert!(store.read_table("shop", "items").is_err());
        assert_eq!(store.list_databases_and_tables().unwrap()["shop"], vec!["orders"]);
        assert!(matches!(
            store.drop_table("shop", "items").unwrap_err(),
            CsvDbError::NotFound { .. }
        ));

        // the name can be reused
        store.create_table("shop", "items", "title:STRING").unwrap();
    }

    #[test]
    fn test_drop_database_removes_files() {
        let (tmp, store) = setup_test_store();
        store.create_table("shop", "items", "name:STRING").unwrap();
        store.create_table("shop", "orders", "qty:INT").unwrap();
        store.create_table("shopping", "lists", "name:STRING").unwrap();

        store.drop_database("shop").unwrap();
        assert!(!tmp.path().join("shop-items.csv").exists());
        assert!(!tmp.path().join("shop-orders.csv").exists());
        assert!(tmp.path().join("shopping-lists.csv").exists());

        let listing = store.list_databases_and_tables().unwrap();
        assert!(!listing.contains_key("shop"));
        assert!(listing.contains_key("shopping"));
        assert!(store.insert("shop", "items", row(&["Pen"])).is_err());

        assert!(matches!(
            store.drop_database("shop").unwrap_err(),
            CsvDbError::NotFound { entity: Entity::Database, .. }
        ));
        // nothing on disk
        assert!(reopen(&tmp).read_table("shop", "items").is_err());
    }

    #[test]
    fn test_drop_database_without_tables() {
        let (_tmp, store) = setup_test_store();
        store.create_database("empty").unwrap();
        store.drop_database("empty").unwrap();
        assert!(store.database_names().is_empty());
    }

    #[test]
    fn test_fetch_raw_table() {
        let (_tmp, store) = setup_test_store();
        store.create_table("shop", "items", "name:STRING,price:REAL").unwrap();
        let id = store.insert("shop", "items", row(&["Pen", "1.5"])).unwrap();

        let raw = store.fetch_raw_table("shop", "items").unwrap();
        assert_eq!(raw.types, row(&["ID", "STRING", "REAL"]));
        assert_eq!(raw.headers, row(&["id", "name", "price"]));
        assert_eq!(raw.rows, vec![row(&[id.as_str(), "Pen", "1.5"])]);
        assert!(store.fetch_raw_table("shop", "orders").is_err());
    }

    #[test]
    fn test_fetch_raw_table_rejects_paths() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data");
        let store = Store::open(StoreConfig::new(&root)).unwrap();
        // a well-formed table file one level above the data directory
        std::fs::write(
            tmp.path().join("secret-payroll.csv"),
            "ID,INT\nid,pay\na1,100\n",
        )
        .unwrap();

        for (database, table) in [("../secret", "payroll"), ("../x", "t"), ("shop", "../items")] {
            let err = store.fetch_raw_table(database, table).unwrap_err();
            assert!(err.is_validation(), "{database}/{table}: {err}");
        }
    }

    #[test]
    fn test_load_reports_broken_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("shop-items.csv"),
            "ID,STRING,REAL\nid,name,price\na1,Pen,1.5\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("shop-orders.csv"),
            "ID,INT\nid,qty\nb1,many\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("shop-bad.csv"), "ID,MONEY\nid,total\n").unwrap();
        std::fs::write(tmp.path().join("orphan.csv"), "ID\nid\n").unwrap();

        let store = Store::new(
            StoreConfig::new(tmp.path()),
            CsvPersistence::new(tmp.path()),
        );
        let report = store.load().unwrap();

        assert_eq!(report.loaded, vec![TableKey::new("shop", "items")]);
        let mut failed: Vec<&str> = report.failures.iter().map(|f| f.source.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["orphan.csv", "shop.bad", "shop.orders"]);
        assert!(!report.is_clean());

        assert_eq!(
            store.get_row("shop", "items", "a1").unwrap(),
            row(&["Pen", "1.5"])
        );
        assert!(store.read_table("shop", "orders").is_err());
    }

    #[test]
    fn test_status() {
        let (_tmp, store) = setup_test_store();
        setup_people(&store);
        store
            .insert("test_db", "test_table", row(&["John", "25"]))
            .unwrap();

        let status = store.status();
        assert_eq!(status.concurrency, ConcurrencyMode::Serialized);
        assert_eq!(status.databases["test_db"]["test_table"], 1);
    }

    // ── Concurrency ─────────────────────────────────────────────────

    /// CSV persistence whose saves can be made to wait for each other
    struct GatedPersistence {
        inner: CsvPersistence,
        armed: Arc<AtomicBool>,
        gate: Arc<Barrier>,
    }

    impl TablePersistence for GatedPersistence {
        fn save(&self, database: &str, table: &Table) -> Result<()> {
            if self.armed.load(Ordering::SeqCst) {
                self.gate.wait();
            }
            self.inner.save(database, table)
        }

        fn read_raw(&self, key: &TableKey) -> Result<RawTable> {
            self.inner.read_raw(key)
        }

        fn remove(&self, key: &TableKey) -> Result<()> {
            self.inner.remove(key)
        }

        fn discover(&self) -> Result<Discovery> {
            self.inner.discover()
        }
    }

    fn gated_store(tmp: &TempDir, mode: ConcurrencyMode) -> (Arc<Store>, Arc<AtomicBool>) {
        let armed = Arc::new(AtomicBool::new(false));
        let persistence = GatedPersistence {
            inner: CsvPersistence::new(tmp.path()),
            armed: armed.clone(),
            gate: Arc::new(Barrier::new(2)),
        };
        let store = Store::new(StoreConfig::new(tmp.path()).with_concurrency(mode), persistence);
        (Arc::new(store), armed)
    }

    /// CSV persistence that parks the first database removal until released
    struct PausedRemoval {
        inner: CsvPersistence,
        armed: AtomicBool,
        entered: Arc<Barrier>,
        release: Arc<Barrier>,
    }

    impl TablePersistence for PausedRemoval {
        fn save(&self, database: &str, table: &Table) -> Result<()> {
            self.inner.save(database, table)
        }

        fn read_raw(&self, key: &TableKey) -> Result<RawTable> {
            self.inner.read_raw(key)
        }

        fn remove(&self, key: &TableKey) -> Result<()> {
            self.inner.remove(key)
        }

        fn remove_database(&self, database: &str) -> Result<usize> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.remove_database(database)
        }

        fn discover(&self) -> Result<Discovery> {
            self.inner.discover()
        }
    }

    #[test]
    fn test_create_table_waits_for_database_drop() {
        let tmp = TempDir::new().unwrap();
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let persistence = PausedRemoval {
            inner: CsvPersistence::new(tmp.path()),
            armed: AtomicBool::new(true),
            entered: entered.clone(),
            release: release.clone(),
        };
        let store = Arc::new(Store::new(StoreConfig::new(tmp.path()), persistence));
        store.create_table("shop", "items", "name:STRING").unwrap();

        let dropper = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.drop_database("shop"))
        };
        entered.wait();

        // The drop is now between forgetting "shop" and deleting its files.
        let creator = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.create_table("shop", "orders", "qty:INT"))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        release.wait();

        dropper.join().unwrap().unwrap();
        creator.join().unwrap().unwrap();

        assert!(!tmp.path().join("shop-items.csv").exists());
        assert!(tmp.path().join("shop-orders.csv").exists());
        assert!(store.read_table("shop", "orders").unwrap().rows.is_empty());
        assert_eq!(store.list_databases_and_tables().unwrap()["shop"], vec!["orders"]);
    }

    #[test]
    fn test_serialized_mode_keeps_every_concurrent_insert() {
        let (tmp, store) = setup_test_store();
        let store = Arc::new(store);
        setup_people(&store);

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let values = vec![format!("w{worker}"), n.to_string()];
                        store.insert("test_db", "test_table", values).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.read_table("test_db", "test_table").unwrap().rows.len(), 200);
        assert_eq!(reopen(&tmp).read_table("test_db", "test_table").unwrap().rows.len(), 200);
    }

    #[test]
    fn test_serialized_mode_lets_other_tables_proceed() {
        let tmp = TempDir::new().unwrap();
        let (store, armed) = gated_store(&tmp, ConcurrencyMode::Serialized);
        store.create_table("shop", "items", "name:STRING").unwrap();
        store.create_table("shop", "orders", "qty:INT").unwrap();
        armed.store(true, Ordering::SeqCst);

        // Both saves must be in flight at once for the gate to open, which
        // only happens if one table's lock doesn't block the other table.
        let a = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.insert("shop", "items", row(&["Pen"])))
        };
        let b = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.insert("shop", "orders", row(&["3"])))
        };
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();

        assert_eq!(store.read_table("shop", "items").unwrap().rows.len(), 1);
        assert_eq!(store.read_table("shop", "orders").unwrap().rows.len(), 1);
    }

    #[test]
    fn test_unsynchronized_mode_loses_concurrent_update() {
        let tmp = TempDir::new().unwrap();
        let (store, armed) = gated_store(&tmp, ConcurrencyMode::Unsynchronized);
        store.create_table("shop", "items", "name:STRING").unwrap();
        armed.store(true, Ordering::SeqCst);

        // Both inserts snapshot the empty table before either writes back.
        let writers: Vec<_> = ["Pen", "Ink"]
            .into_iter()
            .map(|name| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.insert("shop", "items", row(&[name])))
            })
            .collect();
        for writer in writers {
            writer.join().unwrap().unwrap();
        }

        // last write-back wins: one of the two rows is gone
        assert_eq!(store.read_table("shop", "items").unwrap().rows.len(), 1);
        armed.store(false, Ordering::SeqCst);
        let reloaded = Store::open(StoreConfig::new(tmp.path())).unwrap();
        assert_eq!(reloaded.read_table("shop", "items").unwrap().rows.len(), 1);
    }

    #[test]
    fn test_unsynchronized_mode_single_writer() {
        let tmp = TempDir::new().unwrap();
        let (store, _armed) = gated_store(&tmp, ConcurrencyMode::Unsynchronized);
        store.create_table("shop", "items", "name:STRING").unwrap();
        let id = store.insert("shop", "items", row(&["Pen"])).unwrap();
        store.update("shop", "items", &id, row(&["Pencil"])).unwrap();
        assert_eq!(store.get_row("shop", "items", &id).unwrap(), row(&["Pencil"]));
        store.drop_table("shop", "items").unwrap();
        assert!(store.insert("shop", "items", row(&["Pen"])).is_err());
    }

    #[test]
    fn test_failed_save_leaves_memory_unchanged() {
        struct FailingPersistence;

        impl TablePersistence for FailingPersistence {
            fn save(&self, _database: &str, table: &Table) -> Result<()> {
                if table.is_empty() {
                    Ok(())
                } else {
                    Err(CsvDbError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "disk full",
                    )))
                }
            }

            fn read_raw(&self, key: &TableKey) -> Result<RawTable> {
                Err(CsvDbError::not_found(Entity::Table, key.to_string()))
            }

            fn remove(&self, _key: &TableKey) -> Result<()> {
                Ok(())
            }

            fn discover(&self) -> Result<Discovery> {
                Ok(Discovery::default())
            }
        }

        for mode in [ConcurrencyMode::Serialized, ConcurrencyMode::Unsynchronized] {
            let config = StoreConfig::new("unused").with_concurrency(mode);
            let store = Store::new(config, FailingPersistence);
            store.create_table("shop", "items", "name:STRING").unwrap();
            let err = store.insert("shop", "items", row(&["Pen"])).unwrap_err();
            assert!(matches!(err, CsvDbError::Io(_)));
            assert!(store.read_table("shop", "items").unwrap().rows.is_empty());
        }
    }
}

pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod store;
pub mod table;
pub mod validation;

pub use config::{ConcurrencyMode, StoreConfig};
pub use error::{CsvDbError, Entity, Result};
pub use persistence::{CsvPersistence, RawTable, TableKey, TablePersistence};
pub use schema::{ColumnType, Field, IdStrategy, Schema};
pub use store::{LoadReport, Store, TableData};
pub use table::Table;

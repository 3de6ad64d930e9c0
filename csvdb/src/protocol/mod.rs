//! JSON request/response protocol spoken over the socket server.
//!
//! A request is `{"action": <name>, "data": {...}}`. Successful commands
//! answer with `{"status": ...}` or the requested data; failures answer with
//! `{"error": <message>}`.

use crate::error::{CsvDbError, Result};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

pub const UNKNOWN_ACTION: &str = "Unknown action";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Request {
    /// Build a request; `data` is expected to be a JSON object; anything else
    /// sends empty data
    pub fn new(action: Action, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Request {
            action: action.as_str().to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateDatabase,
    DropDatabase,
    CreateTable,
    DeleteTable,
    InsertRow,
    UpdateRow,
    DeleteRow,
    DeleteRepeated,
    FetchDatabasesAndTables,
    GetTableData,
    FetchTableData,
    SelectTable,
}

impl Action {
    pub const ALL: [Action; 12] = [
        Action::CreateDatabase,
        Action::DropDatabase,
        Action::CreateTable,
        Action::DeleteTable,
        Action::InsertRow,
        Action::UpdateRow,
        Action::DeleteRow,
        Action::DeleteRepeated,
        Action::FetchDatabasesAndTables,
        Action::GetTableData,
        Action::FetchTableData,
        Action::SelectTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateDatabase => "create_database",
            Action::DropDatabase => "drop_database",
            Action::CreateTable => "create_table",
            Action::DeleteTable => "delete_table",
            Action::InsertRow => "insert_row",
            Action::UpdateRow => "update_row",
            Action::DeleteRow => "delete_row",
            Action::DeleteRepeated => "delete_repeated",
            Action::FetchDatabasesAndTables => "fetch_databases_and_tables",
            Action::GetTableData => "get_table_data",
            Action::FetchTableData => "fetch_table_data",
            Action::SelectTable => "select_table",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CsvDbError;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CsvDbError::Validation(UNKNOWN_ACTION.to_string()))
    }
}

/// Rows of a table with their column names, identity first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// What the server sends back for one request
#[derive(Debug)]
pub enum Outcome {
    Reply(Value),
    UnknownAction,
    Failed(CsvDbError),
}

impl Outcome {
    pub fn to_json(&self) -> Value {
        match self {
            Outcome::Reply(value) => value.clone(),
            Outcome::UnknownAction => json!({ "error": UNKNOWN_ACTION }),
            Outcome::Failed(err) => json!({ "error": err.to_string() }),
        }
    }

    /// A failed request ends the connection; an unknown action does not
    pub fn closes_connection(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Route a request to the store
pub fn dispatch(store: &Store, request: &Request) -> Outcome {
    let action = match request.action.parse::<Action>() {
        Ok(action) => action,
        Err(_) => return Outcome::UnknownAction,
    };
    match execute(store, action, &request.data) {
        Ok(value) => Outcome::Reply(value),
        Err(err) => Outcome::Failed(err),
    }
}

/// Run one action with its request data
pub fn execute(store: &Store, action: Action, data: &Map<String, Value>) -> Result<Value> {
    let reply = match action {
        Action::CreateDatabase => {
            store.create_database(&required_text(data, "db_name")?)?;
            status("Database created")
        }
        Action::DropDatabase => {
            store.drop_database(&required_text(data, "db_name")?)?;
            status("Database deleted")
        }
        Action::CreateTable => {
            let (db, table) = table_address(data)?;
            let columns = column_spec(required(data, "columns")?)?;
            store.create_table(&db, &table, &columns)?;
            status("Table created")
        }
        Action::DeleteTable => {
            let (db, table) = table_address(data)?;
            store.drop_table(&db, &table)?;
            status("Table deleted")
        }
        Action::InsertRow => {
            let (db, table) = table_address(data)?;
            let values = row_values(required(data, "values")?)?;
            let id = store.insert(&db, &table, values)?;
            json!({ "status": "Record inserted", "_id": id })
        }
        Action::UpdateRow => {
            let (db, table) = table_address(data)?;
            let id = required_text(data, "_id")?;
            let values = row_values(required(data, "values")?)?;
            store.update(&db, &table, &id, values)?;
            status("Record updated")
        }
        Action::DeleteRow => {
            let (db, table) = table_address(data)?;
            let id = required_text(data, "_id")?;
            store.delete(&db, &table, &id)?;
            status("Record deleted")
        }
        Action::DeleteRepeated => {
            let (db, table) = table_address(data)?;
            let num = store.delete_duplicates(&db, &table)?;
            json!({ "num": num })
        }
        Action::FetchDatabasesAndTables => {
            json!({ "databases": store.list_databases_and_tables()? })
        }
        Action::GetTableData => {
            let (db, table) = table_address(data)?;
            serde_json::to_value(store.read_table(&db, &table)?)?
        }
        Action::FetchTableData => {
            let (db, table) = table_address(data)?;
            serde_json::to_value(store.fetch_raw_table(&db, &table)?)?
        }
        Action::SelectTable => {
            let (db, table) = table_address(data)?;
            let table_data = store.read_table(&db, &table)?;
            serde_json::to_value(Selection {
                columns: table_data.columns,
                rows: table_data.rows,
            })?
        }
    };
    Ok(reply)
}

fn status(message: &str) -> Value {
    json!({ "status": message })
}

pub fn missing_field(field: &str) -> CsvDbError {
    CsvDbError::Validation(format!("Missing required field '{field}'"))
}

fn required<'a>(data: &'a Map<String, Value>, field: &str) -> Result<&'a Value> {
    match data.get(field) {
        None | Some(Value::Null) => Err(missing_field(field)),
        Some(value) => Ok(value),
    }
}

/// A name or id field; blank text counts as missing
fn required_text(data: &Map<String, Value>, field: &str) -> Result<String> {
    let text = wire_text(field, required(data, field)?)?;
    if text.trim().is_empty() {
        return Err(missing_field(field));
    }
    Ok(text)
}

fn table_address(data: &Map<String, Value>) -> Result<(String, String)> {
    Ok((
        required_text(data, "db_name")?,
        required_text(data, "table_name")?,
    ))
}

/// Textual form of a scalar JSON value as stored in a table
pub fn wire_text(field: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(CsvDbError::Validation(format!(
            "'{field}' must be a string, number or boolean"
        ))),
    }
}

/// Row values from a JSON array of scalars
pub fn row_values(value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| CsvDbError::Validation("'values' must be a list".into()))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| wire_text(&format!("values[{index}]"), item))
        .collect()
}

/// Column spec given either as `"a:INT,b:STRING"` or as a list of `name:TYPE`
pub fn column_spec(value: &Value) -> Result<String> {
    match value {
        Value::String(spec) => Ok(spec.clone()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        CsvDbError::Validation("'columns' entries must be strings".into())
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(","))
        }
        _ => Err(CsvDbError::Validation(
            "'columns' must be a string or a list of strings".into(),
        )),
    }
}

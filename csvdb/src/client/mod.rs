use crate::error::{CsvDbError, Result};
use crate::persistence::RawTable;
use crate::protocol::{Action, Request, Selection};
use crate::store::TableData;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Blocking client for the socket server.
///
/// Replies carrying an `error` field come back as [`CsvDbError::Remote`].
/// The server closes the connection after a failed request, so a client that
/// got a `Remote` error (other than an unknown action) needs to reconnect.
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let writer = TcpStream::connect(addr)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Client { reader, writer })
    }

    /// Send any JSON value and return the reply as is
    pub fn send_raw(&mut self, request: Value) -> Result<Value> {
        serde_json::to_writer(&mut self.writer, &request)?;
        self.writer.flush()?;

        let mut replies =
            serde_json::Deserializer::from_reader(&mut self.reader).into_iter::<Value>();
        match replies.next() {
            Some(reply) => Ok(reply?),
            None => Err(CsvDbError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))),
        }
    }

    fn call(&mut self, action: Action, data: Value) -> Result<Value> {
        let request = serde_json::to_value(Request::new(action, data))?;
        let reply = self.send_raw(request)?;
        if let Some(error) = reply.get("error") {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(CsvDbError::Remote(message));
        }
        Ok(reply)
    }

    fn call_as<T: DeserializeOwned>(&mut self, action: Action, data: Value) -> Result<T> {
        let reply = self.call(action, data)?;
        Ok(serde_json::from_value(reply)?)
    }

    fn field<T: DeserializeOwned>(reply: &Value, field: &str) -> Result<T> {
        let value = reply
            .get(field)
            .cloned()
            .ok_or_else(|| CsvDbError::Other(format!("Reply has no '{field}' field")))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn create_database(&mut self, db_name: &str) -> Result<()> {
        self.call(Action::CreateDatabase, json!({ "db_name": db_name }))?;
        Ok(())
    }

    pub fn drop_database(&mut self, db_name: &str) -> Result<()> {
        self.call(Action::DropDatabase, json!({ "db_name": db_name }))?;
        Ok(())
    }

    pub fn create_table(&mut self, db_name: &str, table_name: &str, columns: &str) -> Result<()> {
        self.call(
            Action::CreateTable,
            json!({ "db_name": db_name, "table_name": table_name, "columns": columns }),
        )?;
        Ok(())
    }

    pub fn delete_table(&mut self, db_name: &str, table_name: &str) -> Result<()> {
        self.call(
            Action::DeleteTable,
            json!({ "db_name": db_name, "table_name": table_name }),
        )?;
        Ok(())
    }

    /// Returns the id of the new row
    pub fn insert_row(
        &mut self,
        db_name: &str,
        table_name: &str,
        values: &[&str],
    ) -> Result<String> {
        let reply = self.call(
            Action::InsertRow,
            json!({ "db_name": db_name, "table_name": table_name, "values": values }),
        )?;
        Self::field(&reply, "_id")
    }

    pub fn update_row(
        &mut self,
        db_name: &str,
        table_name: &str,
        id: &str,
        values: &[&str],
    ) -> Result<()> {
        self.call(
            Action::UpdateRow,
            json!({ "db_name": db_name, "table_name": table_name, "_id": id, "values": values }),
        )?;
        Ok(())
    }

    pub fn delete_row(&mut self, db_name: &str, table_name: &str, id: &str) -> Result<()> {
        self.call(
            Action::DeleteRow,
            json!({ "db_name": db_name, "table_name": table_name, "_id": id }),
        )?;
        Ok(())
    }

    /// Returns how many duplicate rows were removed
    pub fn delete_repeated(&mut self, db_name: &str, table_name: &str) -> Result<usize> {
        let reply = self.call(
            Action::DeleteRepeated,
            json!({ "db_name": db_name, "table_name": table_name }),
        )?;
        Self::field(&reply, "num")
    }

    pub fn fetch_databases_and_tables(&mut self) -> Result<BTreeMap<String, Vec<String>>> {
        let reply = self.call(Action::FetchDatabasesAndTables, json!({}))?;
        Self::field(&reply, "databases")
    }

    pub fn get_table_data(&mut self, db_name: &str, table_name: &str) -> Result<TableData> {
        self.call_as(
            Action::GetTableData,
            json!({ "db_name": db_name, "table_name": table_name }),
        )
    }

    pub fn fetch_table_data(&mut self, db_name: &str, table_name: &str) -> Result<RawTable> {
        self.call_as(
            Action::FetchTableData,
            json!({ "db_name": db_name, "table_name": table_name }),
        )
    }

    pub fn select_table(&mut self, db_name: &str, table_name: &str) -> Result<Selection> {
        self.call_as(
            Action::SelectTable,
            json!({ "db_name": db_name, "table_name": table_name }),
        )
    }
}

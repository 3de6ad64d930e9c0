mod parser;
mod types;

pub use parser::{parse_column_spec, validate_name};
pub use types::{ColumnType, Field, IdStrategy, Schema};

use clap::{Parser, Subcommand, ValueEnum};
use csvdb::server::{SocketServer, DEFAULT_ADDR};
use csvdb::{ConcurrencyMode, CsvPersistence, IdStrategy, Store, StoreConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// csvdb CLI: manage a csvdb data directory or serve it over TCP
#[derive(Parser)]
#[command(name = "csvdb", version, about)]
struct Cli {
    /// Path to the data directory (overrides config file and CSVDB_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// YAML store config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// How concurrent mutations of one table are ordered
    #[arg(long)]
    concurrency: Option<Concurrency>,

    /// Id generator for new rows: uuid, ulid or nanoid
    #[arg(long)]
    id_strategy: Option<String>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, ValueEnum)]
enum Concurrency {
    Serialized,
    Unsynchronized,
}

impl From<Concurrency> for ConcurrencyMode {
    fn from(c: Concurrency) -> Self {
        match c {
            Concurrency::Serialized => ConcurrencyMode::Serialized,
            Concurrency::Unsynchronized => ConcurrencyMode::Unsynchronized,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Serve the JSON socket protocol
    Serve {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },

    /// List databases and their tables as stored on disk
    Databases,

    /// Create a database
    CreateDatabase { name: String },

    /// Drop a database and delete its table files
    DropDatabase { name: String },

    /// Create a table
    CreateTable {
        database: String,
        table: String,
        /// Column spec, e.g. "name:STRING,price:REAL"
        columns: String,
    },

    /// Drop a table and delete its file
    DropTable { database: String, table: String },

    /// Insert a row, printing its id
    Insert {
        database: String,
        table: String,
        /// One value per column, in schema order
        values: Vec<String>,
    },

    /// Replace the values of a row
    Update {
        database: String,
        table: String,
        id: String,
        values: Vec<String>,
    },

    /// Delete a row
    Delete {
        database: String,
        table: String,
        id: String,
    },

    /// Remove rows that repeat an earlier row
    Dedup { database: String, table: String },

    /// Print a table's columns and rows
    Show { database: String, table: String },

    /// Print a table file as stored
    Raw { database: String, table: String },

    /// Load every table file and report the ones that fail
    Check,

    /// Show configuration and row counts
    Status,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn build_config(cli: &Cli) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_yaml_file(path)?,
        None => StoreConfig::default(),
    }
    .apply_env()?;

    if let Some(dir) = &cli.data_dir {
        config.root = dir.clone();
    }
    if let Some(mode) = &cli.concurrency {
        config.concurrency = mode.clone().into();
    }
    if let Some(strategy) = &cli.id_strategy {
        config.id_strategy = strategy.parse::<IdStrategy>()?;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&cli)?;
    log::debug!("Store config: {config:?}");

    if let Command::Check = cli.command {
        print_output(&check(config)?, &cli.format)?;
        return Ok(());
    }

    let store = Store::open(config)?;

    match cli.command {
        Command::Serve { addr } => {
            log::info!(
                "Serving {} ({:?} mutations)",
                store.config().root.display(),
                store.config().concurrency
            );
            let server = SocketServer::bind(addr.as_str(), Arc::new(store))?;
            println!("Server is listening on {}", server.local_addr()?);
            server.serve()?;
        }

        Command::Databases => {
            print_output(&store.list_databases_and_tables()?, &cli.format)?;
        }

        Command::CreateDatabase { name } => {
            store.create_database(&name)?;
            print_output(&serde_json::json!({ "ok": true, "created": name }), &cli.format)?;
        }

        Command::DropDatabase { name } => {
            store.drop_database(&name)?;
            print_output(&serde_json::json!({ "ok": true, "dropped": name }), &cli.format)?;
        }

        Command::CreateTable {
            database,
            table,
            columns,
        } => {
            store.create_table(&database, &table, &columns)?;
            print_output(
                &serde_json::json!({ "ok": true, "created": format!("{database}.{table}") }),
                &cli.format,
            )?;
        }

        Command::DropTable { database, table } => {
            store.drop_table(&database, &table)?;
            print_output(
                &serde_json::json!({ "ok": true, "dropped": format!("{database}.{table}") }),
                &cli.format,
            )?;
        }

        Command::Insert {
            database,
            table,
            values,
        } => {
            let id = store.insert(&database, &table, values)?;
            print_output(&serde_json::json!({ "id": id }), &cli.format)?;
        }

        Command::Update {
            database,
            table,
            id,
            values,
        } => {
            store.update(&database, &table, &id, values)?;
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Delete {
            database,
            table,
            id,
        } => {
            store.delete(&database, &table, &id)?;
            print_output(&serde_json::json!({ "ok": true, "deleted": id }), &cli.format)?;
        }

        Command::Dedup { database, table } => {
            let removed = store.delete_duplicates(&database, &table)?;
            print_output(&serde_json::json!({ "removed": removed }), &cli.format)?;
        }

        Command::Show { database, table } => {
            print_output(&store.read_table(&database, &table)?, &cli.format)?;
        }

        Command::Raw { database, table } => {
            print_output(&store.fetch_raw_table(&database, &table)?, &cli.format)?;
        }

        Command::Status => {
            print_output(&store.status(), &cli.format)?;
        }

        Command::Check => {}
    }

    Ok(())
}

/// Load every table file under the configured root without creating it
fn check(config: StoreConfig) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let persistence = CsvPersistence::new(config.root.clone());
    let root = persistence.root().display().to_string();
    let store = Store::new(config, persistence);
    let report = store.load()?;
    let failures: Vec<_> = report
        .failures
        .iter()
        .map(|f| serde_json::json!({ "source": f.source, "error": f.error.to_string() }))
        .collect();
    Ok(serde_json::json!({
        "ok": report.is_clean(),
        "root": root,
        "loaded": report.loaded.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "failures": failures,
    }))
}

fn print_output(
    value: &impl Serialize,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_check_reports_root_and_failures() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("shop-items.csv"), "ID,STRING\nid,name\na1,Pen\n").unwrap();
        std::fs::write(tmp.path().join("shop-bad.csv"), "ID,MONEY\nid,total\n").unwrap();

        let report = check(StoreConfig::new(tmp.path())).unwrap();
        assert_eq!(report["ok"], json!(false));
        assert_eq!(report["root"], json!(tmp.path().display().to_string()));
        assert_eq!(report["loaded"], json!(["shop.items"]));
        assert_eq!(report["failures"][0]["source"], json!("shop.bad"));
    }

    #[test]
    fn test_check_leaves_missing_directory_alone() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("absent");
        let report = check(StoreConfig::new(&root)).unwrap();
        assert_eq!(report["ok"], json!(true));
        assert_eq!(report["loaded"], json!([]));
        assert!(!root.exists());
    }
}

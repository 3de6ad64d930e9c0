use actix_web::{web, App, HttpServer};
use csvdb::{Store, StoreConfig};
use std::sync::Arc;

mod handlers;

/// Shared application state
pub struct AppState {
    pub store: Arc<Store>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    log::info!("Starting csvdb HTTP server");

    let config = StoreConfig::from_env().map_err(to_io)?;
    let host = std::env::var("CSVDB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("CSVDB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    log::info!("Opening store at: {}", config.root.display());
    let store = Store::open(config).map_err(to_io)?;

    let state = web::Data::new(AppState {
        store: Arc::new(store),
    });

    log::info!("Listening on {host}:{port}");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}

fn to_io(e: csvdb::CsvDbError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

use actix_web::{web, HttpResponse};
use csvdb::protocol::{execute, Action};
use csvdb::CsvDbError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status))
        .route("/databases", web::get().to(list_databases))
        .route("/create_database", web::post().to(create_database))
        .route("/drop_database", web::delete().to(drop_database))
        .route("/create_table", web::post().to(create_table))
        .route("/delete_table", web::delete().to(delete_table))
        .route("/insert_row", web::post().to(insert_row))
        .route("/update_row", web::put().to(update_row))
        .route("/delete_row", web::delete().to(delete_row))
        .route("/delete_repeated", web::post().to(delete_repeated))
        .route("/table_data", web::get().to(table_data));
}

// ── Helpers ─────────────────────────────────────────────────────────

fn ok_json(value: Value) -> HttpResponse {
    HttpResponse::Ok().json(value)
}

fn err_response(e: CsvDbError) -> HttpResponse {
    match &e {
        CsvDbError::NotFound { .. } => HttpResponse::NotFound().json(serde_json::json!({
            "error": e.to_string()
        })),
        CsvDbError::Validation(_) | CsvDbError::InvalidValue { .. } => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": e.to_string()
            }))
        }
        CsvDbError::AlreadyExists { .. } => HttpResponse::Conflict().json(serde_json::json!({
            "error": e.to_string()
        })),
        _ => {
            log::error!("Internal error: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            }))
        }
    }
}

/// Run a protocol action on a blocking thread; the store does file IO
async fn perform(state: &AppState, action: Action, data: Map<String, Value>) -> HttpResponse {
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || execute(&store, action, &data)).await {
        Ok(Ok(v)) => ok_json(v),
        Ok(Err(e)) => err_response(e),
        Err(e) => err_response(CsvDbError::Other(format!("{action} task failed: {e}"))),
    }
}

async fn perform_with_body(state: &AppState, action: Action, body: Value) -> HttpResponse {
    match body {
        Value::Object(data) => perform(state, action, data).await,
        _ => err_response(CsvDbError::Validation(
            "Request body must be a JSON object".into(),
        )),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

async fn status(state: web::Data<AppState>) -> HttpResponse {
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || serde_json::to_value(store.status())).await {
        Ok(Ok(v)) => ok_json(v),
        Ok(Err(e)) => err_response(e.into()),
        Err(e) => err_response(CsvDbError::Other(format!("status task failed: {e}"))),
    }
}

async fn list_databases(state: web::Data<AppState>) -> HttpResponse {
    perform(&state, Action::FetchDatabasesAndTables, Map::new()).await
}

async fn create_database(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::CreateDatabase, body.into_inner()).await
}

async fn drop_database(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::DropDatabase, body.into_inner()).await
}

async fn create_table(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::CreateTable, body.into_inner()).await
}

async fn delete_table(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::DeleteTable, body.into_inner()).await
}

async fn insert_row(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::InsertRow, body.into_inner()).await
}

async fn update_row(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::UpdateRow, body.into_inner()).await
}

async fn delete_row(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::DeleteRow, body.into_inner()).await
}

async fn delete_repeated(state: web::Data<AppState>, body: web::Json<Value>) -> HttpResponse {
    perform_with_body(&state, Action::DeleteRepeated, body.into_inner()).await
}

async fn table_data(
    state: web::Data<AppState>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    let data = query
        .into_inner()
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    perform(&state, Action::SelectTable, data).await
}

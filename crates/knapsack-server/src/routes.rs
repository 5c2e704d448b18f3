//! HTTP routes
//!
//! | method | path                               | handler        |
//! |--------|------------------------------------|----------------|
//! | POST   | `/_import[/{mode}]`                | start_import   |
//! | POST   | `/{index}/_import[/{mode}]`        | start_import   |
//! | POST   | `/{index}/{type}/_import[/{mode}]` | start_import   |
//! | GET    | `/_import/state`                   | import_state   |
//! | GET    | `/health`                          | health_check   |

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use knapsack_import::archive::SessionMode;
use knapsack_import::dispatcher::HttpBulkDispatcher;
use knapsack_import::import::ImportJob;
use knapsack_import::status::ImportDescriptor;
use serde_json::{json, Value};
use tracing::info;

use crate::error::AppError;
use crate::request::{ImportMode, ImportRequest};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/_import/state", get(import_state))
        .route("/_import", post(start_import))
        .route("/_import/:mode", post(start_import))
        .route("/:index/_import", post(start_import))
        .route("/:index/_import/:mode", post(start_import))
        .route("/:index/:type/_import", post(start_import))
        .route("/:index/:type/_import/:mode", post(start_import))
        .with_state(state)
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "imports": state.imports.len(),
    }))
}

/// Running imports
async fn import_state(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "imports": state.imports.list() }))
}

/// Start an import in the background and acknowledge right away
///
/// Codec selection and opening the archive happen before the reply, so an
/// unknown suffix or a missing file is reported to the caller. Everything
/// after that is only visible in the logs and the import state.
async fn start_import(
    State(state): State<AppState>,
    path_params: Option<Path<HashMap<String, String>>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let path_params = path_params.map(|Path(params)| params).unwrap_or_default();
    let request = ImportRequest::from_params(&path_params, &query, &state.config)?;

    if let Some(location) = &request.s3 {
        if !tokio::fs::try_exists(&request.path).await.unwrap_or(false) {
            let fetcher = state.fetcher.as_ref().ok_or_else(|| {
                AppError::BadRequest("S3 fetching is not configured".to_string())
            })?;
            info!(%location, path = %request.path.display(), "fetching archive from S3");
            fetcher
                .fetch(location, &request.path)
                .await
                .map_err(|e| AppError::Fetch(format!("{:#}", e)))?;
        }
    }

    let mut session = state.codecs.session(&request.path)?;
    let dispatcher =
        HttpBulkDispatcher::connect(request.destination.clone(), request.dispatcher.clone())?;
    session.open(SessionMode::Read).await?;
    let codec = session.codec().name();

    let descriptor = ImportDescriptor::new(&request.path, request.destination.to_string())
        .with_remap_table(request.remap.clone())
        .with_copy_mode(request.mode == ImportMode::Copy)
        .with_fetch_mode(request.mode == ImportMode::S3);
    info!(
        id = %descriptor.id,
        index = %request.index,
        doc_type = ?request.doc_type,
        mode = request.mode.as_str(),
        "import accepted"
    );

    let path = request.path.display().to_string();
    let mode = request.mode.as_str();
    ImportJob::new(session, descriptor)
        .with_overrides(request.overrides)
        .with_options(request.options)
        .spawn(Arc::new(dispatcher), Arc::clone(&state.imports));

    Ok(Json(json!({
        "running": true,
        "mode": mode,
        "type": codec,
        "path": path,
    })))
}

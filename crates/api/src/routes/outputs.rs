//! Output Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use output_store::StoreSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::AppState;

/// One output value
#[derive(Debug, Serialize)]
pub struct OutputResponse {
    pub key: String,
    pub value: Value,
}

/// Every output value with the time of the last write
pub async fn get_outputs(State(state): State<Arc<AppState>>) -> Json<StoreSnapshot> {
    Json(state.store.snapshot())
}

/// One output value, 404 when the key was never written
pub async fn get_output(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<OutputResponse>, StatusCode> {
    let value = state.store.get(&key).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(OutputResponse { key, value }))
}

//! PID Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use obd_protocol::DecodedValue;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Last decoded value of one PID
#[derive(Debug, Serialize)]
pub struct PidResponse {
    /// Two uppercase hex digits
    pub pid: String,
    pub value: DecodedValue,
}

/// Last decoded value for a PID given in hex
pub async fn get_last_response(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
) -> Result<Json<PidResponse>, StatusCode> {
    let pid = u8::from_str_radix(&pid, 16).map_err(|_| StatusCode::BAD_REQUEST)?;
    let value = state.responses.get(pid).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(PidResponse {
        pid: format!("{:02X}", pid),
        value,
    }))
}

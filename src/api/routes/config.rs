use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::api::ApiState;
use crate::config::{CapturePatch, CaptureSettings};

#[derive(Serialize)]
pub struct ConfigResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn get_capture(State(state): State<ApiState>) -> Json<CaptureSettings> {
    Json(state.service.capture_settings())
}

/// Applies a partial capture update; takes effect from the next job on.
pub async fn post_capture(
    State(state): State<ApiState>,
    Json(patch): Json<CapturePatch>,
) -> (StatusCode, Json<ConfigResponse>) {
    match state.service.update_capture(&patch) {
        Ok(capture) => (
            StatusCode::OK,
            Json(ConfigResponse {
                ok: true,
                capture: Some(capture),
                error: None,
            }),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ConfigResponse {
                ok: false,
                capture: None,
                error: Some(err.to_string()),
            }),
        ),
    }
}

use axum::{Json, extract::State};

use crate::api::ApiState;
use crate::display::DisplayInfo;
use crate::health::HealthReport;
use crate::service::ServiceStatus;

pub async fn get_status(State(state): State<ApiState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

pub async fn get_health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

pub async fn get_displays(State(state): State<ApiState>) -> Json<Vec<DisplayInfo>> {
    Json(state.service.displays())
}

use std::path::Path;
use std::time::Duration;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::api::ApiState;
use crate::core::error::CaptureError;
use crate::service::CaptureService;

#[derive(Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub window_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ControlResponse {
    fn done(message: impl Into<String>, path: Option<&Path>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            kind: None,
            path: path.map(|p| p.display().to_string()),
        }
    }

    fn failed(err: &CaptureError) -> Self {
        Self {
            ok: false,
            message: err.to_string(),
            kind: Some(err.kind()),
            path: None,
        }
    }
}

pub async fn post_control(
    State(state): State<ApiState>,
    Json(payload): Json<ControlRequest>,
) -> Json<ControlResponse> {
    let window = payload.window_secs.filter(|s| *s > 0).map(Duration::from_secs);
    Json(handle_action(&state.service, payload.action.trim(), window).await)
}

async fn handle_action(
    service: &CaptureService,
    action: &str,
    window: Option<Duration>,
) -> ControlResponse {
    match action {
        "replay.start" => match service.start_replay().await {
            Ok(()) => ControlResponse::done("Replay buffer started", None),
            Err(e) => ControlResponse::failed(&e),
        },
        "replay.stop" => match service.stop_replay().await {
            Ok(()) => ControlResponse::done("Replay buffer stopped", None),
            Err(e) => ControlResponse::failed(&e),
        },
        "replay.save" => match service.save_replay(window).await {
            Ok(clip) => ControlResponse::done(
                format!(
                    "Replay saved ({} segments, {}s)",
                    clip.segments,
                    clip.nominal_duration.as_secs()
                ),
                Some(clip.path.as_path()),
            ),
            Err(e) => ControlResponse::failed(&e),
        },
        "recording.start" => match service.start_recording().await {
            Ok(path) => ControlResponse::done("Recording started", Some(path.as_path())),
            Err(e) => ControlResponse::failed(&e),
        },
        "recording.stop" => match service.stop_recording().await {
            Ok(recording) => ControlResponse::done("Recording saved", Some(recording.path.as_path())),
            Err(e) => ControlResponse::failed(&e),
        },
        "screenshot" => match service.screenshot().await {
            Ok(path) => ControlResponse::done("Screenshot saved", Some(path.as_path())),
            Err(e) => ControlResponse::failed(&e),
        },
        _ => ControlResponse {
            ok: false,
            message: "Unknown action".to_string(),
            kind: None,
            path: None,
        },
    }
}

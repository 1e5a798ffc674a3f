use axum::Router;
use axum::routing::{get, post};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::event_bus::EventBroadcastHandler;
use crate::service::CaptureService;

pub mod routes;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<CaptureService>,
    pub broadcast: Arc<EventBroadcastHandler>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(routes::status::get_status))
        .route("/api/health", get(routes::status::get_health))
        .route("/api/displays", get(routes::status::get_displays))
        .route(
            "/api/config",
            get(routes::config::get_capture).post(routes::config::post_capture),
        )
        .route("/api/control", post(routes::control::post_control))
        .route("/api/events", get(routes::events::events))
        .with_state(state)
}

pub struct ApiService {
    bind_addr: SocketAddr,
}

impl ApiService {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    /// Serves the API on the current runtime until the task is aborted.
    pub fn spawn(self, state: ApiState) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = run_api_server(self.bind_addr, state).await {
                error!("[api] server error: {}", err);
            }
        })
    }
}

async fn run_api_server(bind_addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("[api] server listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// src/main.rs

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio::sync::Notify;

use replay_node::api::{ApiService, ApiState};
use replay_node::config::Config;
use replay_node::core::{EventBroadcastHandler, EventBus, EventLoggerHandler, EventPriority};
use replay_node::service::CaptureService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".into());

    let cfg = if Path::new(&cfg_path).exists() {
        let cfg = Config::load(&cfg_path)?;
        info!("[replay-node] loaded {}", cfg_path);
        cfg
    } else {
        warn!("[replay-node] {} not found, using defaults", cfg_path);
        Config::default()
    };

    // ------------------------------------------------------------
    // Events
    // ------------------------------------------------------------
    let bus = Arc::new(EventBus::new("main"));
    bus.register_handler(Arc::new(EventLoggerHandler::new("log", EventPriority::Info)));
    let broadcast = Arc::new(EventBroadcastHandler::new("sse", 256));
    bus.register_handler(broadcast.clone());
    bus.start()?;

    // ------------------------------------------------------------
    // Service
    // ------------------------------------------------------------
    let service = Arc::new(CaptureService::new(&cfg, bus.clone()));

    let health = service.health().await;
    if health.available {
        info!(
            "[replay-node] encoder ok: {}",
            health.version.as_deref().unwrap_or("unknown version")
        );
    } else {
        warn!(
            "[replay-node] encoder '{}' unavailable: {}",
            health.program,
            health.error.as_deref().unwrap_or("unknown error")
        );
    }

    if cfg.api.enabled {
        let bind: SocketAddr = cfg
            .api
            .bind
            .parse()
            .with_context(|| format!("invalid api.bind '{}'", cfg.api.bind))?;
        ApiService::new(bind).spawn(ApiState {
            service: service.clone(),
            broadcast,
        });
    }

    if cfg.replay.autostart {
        if let Err(e) = service.start_replay().await {
            warn!("[replay-node] replay buffer did not start: {}", e);
        }
    }

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let shutdown = Arc::new(Notify::new());
    {
        let notify = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("[replay-node] shutdown requested");
            notify.notify_one();
        })?;
    }

    info!("[replay-node] running, Ctrl+C to stop");
    shutdown.notified().await;

    info!("[replay-node] shutting down");
    service.shutdown().await;
    bus.stop()?;
    Ok(())
}

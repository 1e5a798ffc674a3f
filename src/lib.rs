// src/lib.rs
pub mod api;
pub mod config;
pub mod core;
pub mod display;
pub mod health;
pub mod process;
pub mod recorder;
pub mod replay;
pub mod service;
pub mod testing;

pub use config::Config;
pub use crate::core::{CaptureError, CaptureResult, ComponentLogger, LogContext};
pub use replay::{BufferState, ReplayBuffer, ReplayClip};
pub use service::{CaptureService, ServiceStatus};

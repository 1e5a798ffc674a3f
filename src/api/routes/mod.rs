pub mod config;
pub mod control;
pub mod events;
pub mod status;

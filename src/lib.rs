pub mod app;
pub mod app_state;
pub mod attendance;
pub mod audit;
pub mod certification;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod middleware;
pub mod modules;
pub mod telemetry;

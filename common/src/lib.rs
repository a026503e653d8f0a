// Common library: message store, scheduler engine, and shared infrastructure

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod models;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod telemetry;

//! Safe executor service
//!
//! Hosts the migration orchestrator behind an HTTP API with health
//! checks and Prometheus metrics.

pub mod api;
pub mod backend;
pub mod config;

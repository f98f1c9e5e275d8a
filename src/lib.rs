pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod server;

// Layered boundaries for application use cases and infrastructure adapters
pub mod app;
pub mod infra;

// Domain data shapes shared across layers
pub mod domain;

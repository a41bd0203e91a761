// Library root: exposes the service modules to integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod alerts;
pub mod api;
pub mod db;
pub mod error;
pub mod geo;
pub mod inventory;
pub mod metrics;
pub mod model;
pub mod ratings;
pub mod repository;
pub mod scheduler;
pub mod search;
pub mod store;

// Startup plumbing used by the binary.
pub mod cli;
pub mod config;
pub mod logging;

//! Control plane for model serving: owner-scoped storage of bundles,
//! endpoints, batch jobs, batch job bundles and triggers, the HTTP surface
//! for LLM model endpoints, and a typed client for it.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod ids;
pub mod models;
pub mod routes;
pub mod services;

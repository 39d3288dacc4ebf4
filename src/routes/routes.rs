//! Defines the routes of the model-engine API.
//!
//! ## Structure
//! - **Probes** (mounted at root)
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz` — readiness (SQLite round trip)
//!
//! - **LLM model endpoints**
//!   - `POST   /v1/llm/model-endpoints` — create (returns a creation task id)
//!   - `GET    /v1/llm/model-endpoints` — list the caller's endpoints
//!   - `GET    /v1/llm/model-endpoints/{model_name}` — describe one
//!   - `DELETE /v1/llm/model-endpoints/{model_name}` — delete one

use super::AppState;
use crate::handlers::{
    health_handlers::{healthz, readyz},
    llm_endpoint_handlers::{
        create_llm_endpoint, delete_llm_endpoint, get_llm_endpoint, list_llm_endpoints,
    },
};
use axum::{Router, routing::get};

/// Build the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/v1/llm/model-endpoints",
            get(list_llm_endpoints).post(create_llm_endpoint),
        )
        .route(
            "/v1/llm/model-endpoints/{model_name}",
            get(get_llm_endpoint).delete(delete_llm_endpoint),
        )
}

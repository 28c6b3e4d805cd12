//! Liveness endpoint for the ledger service.
//!
//! Used by container orchestrators and CI to verify that the service is up.
//! Reports which storage backend the ledger is running on, without touching
//! the store itself.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::Ledger;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
}

/// Handle `GET /health`.
async fn health(State(ledger): State<Ledger>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: ledger.backend_name(),
    })
}

pub fn router() -> Router<Ledger> {
    Router::new().route("/health", get(health))
}

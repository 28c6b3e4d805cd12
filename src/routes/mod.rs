//! HTTP gateway: merges the per-subsystem routers and owns the request
//! extractors they share.
//!
//! Extractors here replace axum's `Json`/`Path` on the request side so a
//! malformed body or path answers with the same `{ success: false, error }`
//! envelope as every other failure.

use axum::{
    extract::{FromRequest, FromRequestParts},
    Router,
};
use serde_json::{json, Value};

use crate::{Ledger, LedgerError};

mod deployments;
mod health;
mod resources;
mod sensors;

// ---

pub fn router(ledger: Ledger) -> Router {
    // ---
    Router::new()
        .merge(sensors::router())
        .merge(resources::router())
        .merge(deployments::router())
        .merge(health::router())
        .with_state(ledger)
}

/// JSON request body; decode failures become `LedgerError::BadRequest`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(LedgerError))]
struct Body<T>(T);

/// Path parameters; parse failures become `LedgerError::BadRequest`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(LedgerError))]
struct Params<T>(T);

/// `{ "success": true }`, the acknowledgement for mutations without payload.
fn ack() -> Value {
    json!({ "success": true })
}

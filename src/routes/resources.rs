//! Resource pool endpoints: registration and lookup.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ack, Body, Params};
use crate::error::LedgerError;
use crate::models::{NewResource, RegionId, Resource, ResourceId, ResourceType};
use crate::Ledger;

// ---

pub fn router() -> Router<Ledger> {
    // ---
    Router::new()
        .route("/resources", post(register))
        .route("/resources/{resource_id}", get(get_resource))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RegisterResourceRequest {
    resource_id: ResourceId,
    resource_type: u8,
    capacity: u32,
    current_region_id: RegionId,
}

async fn register(
    State(ledger): State<Ledger>,
    Body(req): Body<RegisterResourceRequest>,
) -> Result<Json<Value>, LedgerError> {
    // ---
    debug!("POST /resources - {:?}", req);
    let new = NewResource {
        resource_id: req.resource_id,
        resource_type: ResourceType::try_from(req.resource_type)?,
        capacity: req.capacity,
        current_region_id: req.current_region_id,
    };
    ledger.register_resource(new).await?;
    Ok(Json(ack()))
}

async fn get_resource(
    State(ledger): State<Ledger>,
    Params(resource_id): Params<ResourceId>,
) -> Result<Json<Resource>, LedgerError> {
    Ok(Json(ledger.resource(resource_id).await?))
}

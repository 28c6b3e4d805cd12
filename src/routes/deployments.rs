//! Deployment lifecycle endpoints.
//!
//! Deploy and complete each touch a resource and a deployment together;
//! the ledger applies both or neither.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Body, Params};
use crate::error::LedgerError;
use crate::models::{Deployment, DeploymentId, RegionId, ResourceId};
use crate::Ledger;

// ---

pub fn router() -> Router<Ledger> {
    // ---
    Router::new()
        .route("/deployments", post(deploy))
        .route("/deployments/{deployment_id}", get(get_deployment))
        .route("/deployments/{deployment_id}/complete", post(complete))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeployRequest {
    deployment_id: DeploymentId,
    resource_id: ResourceId,
    region_id: RegionId,
}

async fn deploy(
    State(ledger): State<Ledger>,
    Body(req): Body<DeployRequest>,
) -> Result<Json<Value>, LedgerError> {
    // ---
    debug!("POST /deployments - {:?}", req);
    let deployment = ledger
        .deploy_resource(req.deployment_id, req.resource_id, req.region_id)
        .await?;
    Ok(Json(json!({ "success": true, "deployment": deployment })))
}

async fn complete(
    State(ledger): State<Ledger>,
    Params(deployment_id): Params<DeploymentId>,
) -> Result<Json<Value>, LedgerError> {
    // ---
    let deployment = ledger.complete_deployment(deployment_id).await?;
    Ok(Json(json!({ "success": true, "deployment": deployment })))
}

async fn get_deployment(
    State(ledger): State<Ledger>,
    Params(deployment_id): Params<DeploymentId>,
) -> Result<Json<Deployment>, LedgerError> {
    Ok(Json(ledger.deployment(deployment_id).await?))
}

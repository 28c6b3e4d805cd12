//! Sensor registry endpoints: registration, lookup, deactivation and
//! reading submission with alert evaluation.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ack, Body, Params};
use crate::error::LedgerError;
use crate::models::{
    timestamp_from_millis, NewSensor, RegionId, Sensor, SensorId, SensorReading, SensorType,
};
use crate::Ledger;

// ---

pub fn router() -> Router<Ledger> {
    // ---
    Router::new()
        .route("/sensors", post(register))
        .route("/sensors/{sensor_id}", get(get_sensor))
        .route("/sensors/{sensor_id}/deactivate", post(deactivate))
        .route("/sensors/{sensor_id}/readings", post(record_reading))
        .route("/sensors/{sensor_id}/readings/latest", get(latest_reading))
        .route("/sensors/{sensor_id}/readings/{timestamp}", get(reading_at))
        .route("/thresholds", get(thresholds))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RegisterSensorRequest {
    sensor_id: SensorId,
    sensor_type: u8,
    region_id: RegionId,
    location_lat: f64,
    location_long: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RecordReadingRequest {
    /// Epoch milliseconds.
    timestamp: i64,
    reading_value: f64,
}

async fn register(
    State(ledger): State<Ledger>,
    Body(req): Body<RegisterSensorRequest>,
) -> Result<Json<Value>, LedgerError> {
    // ---
    debug!("POST /sensors - {:?}", req);
    let new = NewSensor {
        sensor_id: req.sensor_id,
        sensor_type: SensorType::try_from(req.sensor_type)?,
        region_id: req.region_id,
        location_lat: req.location_lat,
        location_long: req.location_long,
    };
    ledger.register_sensor(new).await?;
    Ok(Json(ack()))
}

async fn get_sensor(
    State(ledger): State<Ledger>,
    Params(sensor_id): Params<SensorId>,
) -> Result<Json<Sensor>, LedgerError> {
    Ok(Json(ledger.sensor(sensor_id).await?))
}

async fn deactivate(
    State(ledger): State<Ledger>,
    Params(sensor_id): Params<SensorId>,
) -> Result<Json<Value>, LedgerError> {
    ledger.deactivate_sensor(sensor_id).await?;
    Ok(Json(ack()))
}

async fn record_reading(
    State(ledger): State<Ledger>,
    Params(sensor_id): Params<SensorId>,
    Body(req): Body<RecordReadingRequest>,
) -> Result<Json<Value>, LedgerError> {
    // ---
    let timestamp = timestamp_from_millis(req.timestamp)?;
    let reading = ledger
        .record_reading(sensor_id, timestamp, req.reading_value)
        .await?;
    Ok(Json(json!({ "success": true, "data": reading })))
}

async fn latest_reading(
    State(ledger): State<Ledger>,
    Params(sensor_id): Params<SensorId>,
) -> Result<Json<SensorReading>, LedgerError> {
    Ok(Json(ledger.latest_reading(sensor_id).await?))
}

async fn reading_at(
    State(ledger): State<Ledger>,
    Params((sensor_id, timestamp)): Params<(SensorId, i64)>,
) -> Result<Json<SensorReading>, LedgerError> {
    // ---
    let timestamp = timestamp_from_millis(timestamp)?;
    Ok(Json(ledger.reading_at(sensor_id, timestamp).await?))
}

/// The active threshold table, keyed by sensor type name.
async fn thresholds(State(ledger): State<Ledger>) -> Json<Value> {
    // ---
    let table: Map<String, Value> = ledger
        .thresholds()
        .iter()
        .map(|(sensor_type, threshold)| (sensor_type.name().to_string(), json!(threshold)))
        .collect();
    Json(Value::Object(table))
}

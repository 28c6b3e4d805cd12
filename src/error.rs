//! Failure taxonomy for ledger operations.
//!
//! Every precondition violation is a recoverable, caller-visible outcome:
//! handlers return `LedgerError` and it renders itself as the
//! `{ "success": false, "error": "..." }` envelope.

use std::fmt;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

// ---

/// The kind of record an `AlreadyExists` / `NotFound` failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Sensor,
    Reading,
    Resource,
    Deployment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Sensor => "Sensor",
            Entity::Reading => "Reading",
            Entity::Resource => "Resource",
            Entity::Deployment => "Deployment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Registration collided with an existing identifier.
    #[error("{0} already exists")]
    AlreadyExists(Entity),

    /// Lookup on an unknown identifier.
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Sensor is inactive")]
    SensorInactive,

    #[error("Resource not available")]
    ResourceUnavailable,

    #[error("Deployment not active")]
    DeploymentNotActive,

    #[error("Unknown sensor type {0}")]
    UnknownSensorType(u8),

    #[error("Unknown resource type {0}")]
    UnknownResourceType(u8),

    #[error("Invalid timestamp {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid location ({lat}, {long})")]
    InvalidLocation { lat: f64, long: f64 },

    /// Body or path could not be decoded into the request type.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The persistence layer failed; the operation had no effect.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn status_code(&self) -> StatusCode {
        // ---
        match self {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::AlreadyExists(_)
            | LedgerError::SensorInactive
            | LedgerError::ResourceUnavailable
            | LedgerError::DeploymentNotActive => StatusCode::CONFLICT,
            LedgerError::UnknownSensorType(_)
            | LedgerError::UnknownResourceType(_)
            | LedgerError::InvalidTimestamp(_)
            | LedgerError::InvalidLocation { .. }
            | LedgerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for LedgerError {
    fn from(rejection: JsonRejection) -> Self {
        LedgerError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for LedgerError {
    fn from(rejection: PathRejection) -> Self {
        LedgerError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status_code();
        let message = match &self {
            LedgerError::Storage(err) => {
                tracing::error!(error = %err, "Storage failure");
                "Storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_state_error_messages() {
        // ---
        // Existing callers match on these strings
        assert_eq!(LedgerError::SensorInactive.to_string(), "Sensor is inactive");
        assert_eq!(
            LedgerError::ResourceUnavailable.to_string(),
            "Resource not available"
        );
        assert_eq!(
            LedgerError::DeploymentNotActive.to_string(),
            "Deployment not active"
        );
        assert_eq!(
            LedgerError::NotFound(Entity::Deployment).to_string(),
            "Deployment not found"
        );
        assert_eq!(
            LedgerError::AlreadyExists(Entity::Sensor).to_string(),
            "Sensor already exists"
        );
    }

    #[test]
    fn test_status_codes() {
        // ---
        assert_eq!(
            LedgerError::NotFound(Entity::Sensor).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LedgerError::SensorInactive.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LedgerError::UnknownResourceType(9).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LedgerError::BadRequest("sensor-id".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LedgerError::Storage(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

//! The ledger facade: the ten operations over a storage backend.
//!
//! Callers (the HTTP routes) only ever see `Ledger`. Backends hold the
//! records; `models` holds the transitions; this layer stamps time and logs.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::alerts::ThresholdTable;
use crate::error::LedgerResult;
use crate::models::{
    Deployment, DeploymentId, NewResource, NewSensor, RegionId, Resource, ResourceId, Sensor,
    SensorId, SensorReading,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryStore>),
    Postgres(PgStore),
}

/// Cheaply cloneable handle shared by all request handlers.
#[derive(Clone)]
pub struct Ledger {
    backend: Backend,
    thresholds: Arc<ThresholdTable>,
}

impl Ledger {
    pub fn in_memory(thresholds: ThresholdTable) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryStore::new())),
            thresholds: Arc::new(thresholds),
        }
    }

    pub fn postgres(pool: PgPool, thresholds: ThresholdTable) -> Self {
        Self {
            backend: Backend::Postgres(PgStore::new(pool)),
            thresholds: Arc::new(thresholds),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Postgres(_) => "postgres",
        }
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    // --- Sensor registry & alert evaluator

    pub async fn register_sensor(&self, new: NewSensor) -> LedgerResult<()> {
        // ---
        let sensor = Sensor::register(new)?;
        let result = match &self.backend {
            Backend::Memory(store) => store.register_sensor(sensor.clone()),
            Backend::Postgres(store) => store.register_sensor(&sensor).await,
        };
        log_outcome(&result, "register_sensor", sensor.sensor_id);
        result?;

        info!(
            sensor_id = sensor.sensor_id,
            sensor_type = sensor.sensor_type.name(),
            region_id = sensor.region_id,
            "Sensor registered"
        );
        Ok(())
    }

    pub async fn sensor(&self, sensor_id: SensorId) -> LedgerResult<Sensor> {
        match &self.backend {
            Backend::Memory(store) => store.sensor(sensor_id),
            Backend::Postgres(store) => store.sensor(sensor_id).await,
        }
    }

    /// Idempotent: deactivating an inactive sensor succeeds.
    pub async fn deactivate_sensor(&self, sensor_id: SensorId) -> LedgerResult<()> {
        // ---
        let result = match &self.backend {
            Backend::Memory(store) => store.deactivate_sensor(sensor_id),
            Backend::Postgres(store) => store.deactivate_sensor(sensor_id).await,
        };
        log_outcome(&result, "deactivate_sensor", sensor_id);
        result?;

        info!(sensor_id, "Sensor deactivated");
        Ok(())
    }

    pub async fn record_reading(
        &self,
        sensor_id: SensorId,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> LedgerResult<SensorReading> {
        // ---
        let result = match &self.backend {
            Backend::Memory(store) => {
                store.record_reading(sensor_id, timestamp, value, &self.thresholds)
            }
            Backend::Postgres(store) => {
                store
                    .record_reading(sensor_id, timestamp, value, &self.thresholds)
                    .await
            }
        };
        log_outcome(&result, "record_reading", sensor_id);
        let reading = result?;

        if reading.alert_triggered {
            warn!(
                sensor_id,
                value,
                timestamp = %timestamp,
                "Reading crossed alert threshold"
            );
        } else {
            debug!(sensor_id, value, timestamp = %timestamp, "Reading recorded");
        }
        Ok(reading)
    }

    pub async fn latest_reading(&self, sensor_id: SensorId) -> LedgerResult<SensorReading> {
        match &self.backend {
            Backend::Memory(store) => store.latest_reading(sensor_id),
            Backend::Postgres(store) => store.latest_reading(sensor_id).await,
        }
    }

    pub async fn reading_at(
        &self,
        sensor_id: SensorId,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<SensorReading> {
        match &self.backend {
            Backend::Memory(store) => store.reading_at(sensor_id, timestamp),
            Backend::Postgres(store) => store.reading_at(sensor_id, timestamp).await,
        }
    }

    // --- Resource deployment manager

    pub async fn register_resource(&self, new: NewResource) -> LedgerResult<()> {
        // ---
        let resource = Resource::register(new);
        let result = match &self.backend {
            Backend::Memory(store) => store.register_resource(resource.clone()),
            Backend::Postgres(store) => store.register_resource(&resource).await,
        };
        log_outcome(&result, "register_resource", resource.resource_id);
        result?;

        info!(
            resource_id = resource.resource_id,
            capacity = resource.capacity,
            region_id = resource.current_region_id,
            "Resource registered"
        );
        Ok(())
    }

    pub async fn resource(&self, resource_id: ResourceId) -> LedgerResult<Resource> {
        match &self.backend {
            Backend::Memory(store) => store.resource(resource_id),
            Backend::Postgres(store) => store.resource(resource_id).await,
        }
    }

    pub async fn deploy_resource(
        &self,
        deployment_id: DeploymentId,
        resource_id: ResourceId,
        region_id: RegionId,
    ) -> LedgerResult<Deployment> {
        // ---
        let now = now();
        let result = match &self.backend {
            Backend::Memory(store) => {
                store.deploy_resource(deployment_id, resource_id, region_id, now)
            }
            Backend::Postgres(store) => {
                store
                    .deploy_resource(deployment_id, resource_id, region_id, now)
                    .await
            }
        };
        log_outcome(&result, "deploy_resource", resource_id);
        let deployment = result?;

        info!(deployment_id, resource_id, region_id, "Resource deployed");
        Ok(deployment)
    }

    pub async fn complete_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> LedgerResult<Deployment> {
        // ---
        let now = now();
        let result = match &self.backend {
            Backend::Memory(store) => store.complete_deployment(deployment_id, now),
            Backend::Postgres(store) => store.complete_deployment(deployment_id, now).await,
        };
        log_outcome(&result, "complete_deployment", deployment_id);
        let deployment = result?;

        info!(
            deployment_id,
            resource_id = deployment.resource_id,
            "Deployment completed, resource released"
        );
        Ok(deployment)
    }

    pub async fn deployment(&self, deployment_id: DeploymentId) -> LedgerResult<Deployment> {
        match &self.backend {
            Backend::Memory(store) => store.deployment(deployment_id),
            Backend::Postgres(store) => store.deployment(deployment_id).await,
        }
    }
}

/// Wall-clock time at the millisecond precision callers see on the wire.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn log_outcome<T>(result: &LedgerResult<T>, operation: &str, id: u32) {
    if let Err(err) = result {
        debug!(operation, id, error = %err, "Operation rejected");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::error::LedgerError;
    use crate::models::{DeploymentStatus, ResourceType, SensorType};
    use assert_matches::assert_matches;

    fn new_sensor(sensor_id: SensorId, sensor_type: SensorType) -> NewSensor {
        // ---
        NewSensor {
            sensor_id,
            sensor_type,
            region_id: 2,
            location_lat: 34.052235,
            location_long: -118.243683,
        }
    }

    #[tokio::test]
    async fn test_overridden_threshold_applies() {
        // ---
        let thresholds = ThresholdTable::default().with_threshold(SensorType::Flood, 10.0);
        let ledger = Ledger::in_memory(thresholds);
        ledger
            .register_sensor(new_sensor(5, SensorType::Flood))
            .await
            .unwrap();

        let reading = ledger.record_reading(5, Utc::now(), 10.0).await.unwrap();
        assert!(reading.alert_triggered);
        assert_eq!(ledger.latest_reading(5).await.unwrap(), reading);
    }

    #[tokio::test]
    async fn test_invalid_sensor_never_stored() {
        // ---
        let ledger = Ledger::in_memory(ThresholdTable::default());
        let mut bad = new_sensor(1, SensorType::Smoke);
        bad.location_long = 200.0;

        assert_matches!(
            ledger.register_sensor(bad).await,
            Err(LedgerError::InvalidLocation { .. })
        );
        assert_matches!(ledger.sensor(1).await, Err(LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_deployment_times() {
        // ---
        let ledger = Ledger::in_memory(ThresholdTable::default());
        assert_eq!(ledger.backend_name(), "memory");
        ledger
            .register_resource(NewResource {
                resource_id: 2,
                resource_type: ResourceType::MedicalUnit,
                capacity: 4,
                current_region_id: 3,
            })
            .await
            .unwrap();

        let deployed = ledger.deploy_resource(1, 2, 4).await.unwrap();
        let resource = ledger.resource(2).await.unwrap();
        assert_eq!(resource.last_deployed, Some(deployed.start_time));

        let completed = ledger.complete_deployment(1).await.unwrap();
        assert_eq!(completed.status, DeploymentStatus::Completed);
        let end = completed.end_time.unwrap();
        assert!(end >= completed.start_time);
        assert_eq!(ledger.deployment(1).await.unwrap(), completed);
    }
}

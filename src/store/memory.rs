//! In-memory backend.
//!
//! Each subsystem keeps all of its maps behind one `RwLock`, so every
//! operation (including the two-record deploy/complete transitions) runs
//! under a single write guard and never exposes intermediate state.

use std::collections::{hash_map::Entry, BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::alerts::ThresholdTable;
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::models::{
    Deployment, DeploymentId, RegionId, Resource, ResourceId, Sensor, SensorId, SensorReading,
};

// ---

#[derive(Debug, Default)]
pub struct MemoryStore {
    sensors: RwLock<SensorTables>,
    resources: RwLock<ResourceTables>,
}

#[derive(Debug, Default)]
struct SensorTables {
    sensors: HashMap<SensorId, Sensor>,
    readings: BTreeMap<(SensorId, DateTime<Utc>), SensorReading>,
}

#[derive(Debug, Default)]
struct ResourceTables {
    resources: HashMap<ResourceId, Resource>,
    deployments: HashMap<DeploymentId, Deployment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- sensors

    pub fn register_sensor(&self, sensor: Sensor) -> LedgerResult<()> {
        // ---
        let mut tables = self.sensors.write();
        match tables.sensors.entry(sensor.sensor_id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(Entity::Sensor)),
            Entry::Vacant(slot) => {
                slot.insert(sensor);
                Ok(())
            }
        }
    }

    pub fn sensor(&self, sensor_id: SensorId) -> LedgerResult<Sensor> {
        self.sensors
            .read()
            .sensors
            .get(&sensor_id)
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::Sensor))
    }

    pub fn deactivate_sensor(&self, sensor_id: SensorId) -> LedgerResult<()> {
        // ---
        let mut tables = self.sensors.write();
        let sensor = tables
            .sensors
            .get_mut(&sensor_id)
            .ok_or(LedgerError::NotFound(Entity::Sensor))?;
        sensor.deactivate();
        Ok(())
    }

    pub fn record_reading(
        &self,
        sensor_id: SensorId,
        timestamp: DateTime<Utc>,
        value: f64,
        thresholds: &ThresholdTable,
    ) -> LedgerResult<SensorReading> {
        // ---
        let mut tables = self.sensors.write();
        let sensor = tables
            .sensors
            .get(&sensor_id)
            .ok_or(LedgerError::NotFound(Entity::Sensor))?;
        let reading = sensor.accept_reading(timestamp, value, thresholds)?;

        let key = (sensor_id, timestamp);
        if tables.readings.contains_key(&key) {
            return Err(LedgerError::AlreadyExists(Entity::Reading));
        }
        tables.readings.insert(key, reading.clone());
        Ok(reading)
    }

    pub fn latest_reading(&self, sensor_id: SensorId) -> LedgerResult<SensorReading> {
        // ---
        let tables = self.sensors.read();
        if !tables.sensors.contains_key(&sensor_id) {
            return Err(LedgerError::NotFound(Entity::Sensor));
        }
        tables
            .readings
            .range((sensor_id, DateTime::<Utc>::MIN_UTC)..=(sensor_id, DateTime::<Utc>::MAX_UTC))
            .next_back()
            .map(|(_, reading)| reading.clone())
            .ok_or(LedgerError::NotFound(Entity::Reading))
    }

    pub fn reading_at(
        &self,
        sensor_id: SensorId,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<SensorReading> {
        // ---
        let tables = self.sensors.read();
        if !tables.sensors.contains_key(&sensor_id) {
            return Err(LedgerError::NotFound(Entity::Sensor));
        }
        tables
            .readings
            .get(&(sensor_id, timestamp))
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::Reading))
    }

    // --- resources & deployments

    pub fn register_resource(&self, resource: Resource) -> LedgerResult<()> {
        // ---
        let mut tables = self.resources.write();
        match tables.resources.entry(resource.resource_id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(Entity::Resource)),
            Entry::Vacant(slot) => {
                slot.insert(resource);
                Ok(())
            }
        }
    }

    pub fn resource(&self, resource_id: ResourceId) -> LedgerResult<Resource> {
        self.resources
            .read()
            .resources
            .get(&resource_id)
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::Resource))
    }

    pub fn deploy_resource(
        &self,
        deployment_id: DeploymentId,
        resource_id: ResourceId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Deployment> {
        // ---
        let mut guard = self.resources.write();
        let ResourceTables {
            resources,
            deployments,
        } = &mut *guard;

        let slot = match deployments.entry(deployment_id) {
            Entry::Occupied(_) => return Err(LedgerError::AlreadyExists(Entity::Deployment)),
            Entry::Vacant(slot) => slot,
        };
        let resource = resources
            .get_mut(&resource_id)
            .ok_or(LedgerError::NotFound(Entity::Resource))?;

        let deployment = resource.deploy(deployment_id, region_id, now)?;
        slot.insert(deployment.clone());
        Ok(deployment)
    }

    pub fn complete_deployment(
        &self,
        deployment_id: DeploymentId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Deployment> {
        // ---
        let mut guard = self.resources.write();
        let ResourceTables {
            resources,
            deployments,
        } = &mut *guard;

        let deployment = deployments
            .get_mut(&deployment_id)
            .ok_or(LedgerError::NotFound(Entity::Deployment))?;
        let resource = resources
            .get_mut(&deployment.resource_id)
            .ok_or(LedgerError::NotFound(Entity::Resource))?;

        deployment.complete(resource, now)?;
        Ok(deployment.clone())
    }

    pub fn deployment(&self, deployment_id: DeploymentId) -> LedgerResult<Deployment> {
        self.resources
            .read()
            .deployments
            .get(&deployment_id)
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::Deployment))
    }
}

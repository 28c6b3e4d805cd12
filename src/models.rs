//! Ledger records and the state transitions that mutate them.
//!
//! Transitions here operate on single in-hand records and either apply
//! fully or return an error without touching anything. Storage backends
//! load the records, call these, and persist the result atomically.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::alerts::ThresholdTable;
use crate::error::{LedgerError, LedgerResult};

pub type SensorId = u32;
pub type ResourceId = u32;
pub type DeploymentId = u32;
pub type RegionId = u32;

// ---

/// Hazard category a sensor detects. Wire code is the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u8")]
pub enum SensorType {
    Smoke = 0,
    Flood = 1,
    Seismic = 2,
    Heat = 3,
    Gas = 4,
}

impl SensorType {
    pub const COUNT: usize = 5;

    pub const ALL: [SensorType; Self::COUNT] = [
        SensorType::Smoke,
        SensorType::Flood,
        SensorType::Seismic,
        SensorType::Heat,
        SensorType::Gas,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SensorType::Smoke => "smoke",
            SensorType::Flood => "flood",
            SensorType::Seismic => "seismic",
            SensorType::Heat => "heat",
            SensorType::Gas => "gas",
        }
    }

    /// Accepts either the lowercase name or the numeric wire code.
    pub fn from_name(name: &str) -> Option<Self> {
        // ---
        let name = name.trim();
        if let Ok(code) = name.parse::<u8>() {
            return SensorType::try_from(code).ok();
        }
        SensorType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u8> for SensorType {
    type Error = LedgerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        SensorType::ALL
            .into_iter()
            .find(|t| *t as u8 == code)
            .ok_or(LedgerError::UnknownSensorType(code))
    }
}

impl From<SensorType> for u8 {
    fn from(t: SensorType) -> u8 {
        t as u8
    }
}

/// Kind of physical response resource. Wire code is the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum ResourceType {
    FireEngine = 0,
    MedicalUnit = 1,
    RescueCrew = 2,
    HeavyEquipment = 3,
    SupplyTruck = 4,
}

impl TryFrom<u8> for ResourceType {
    type Error = LedgerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ResourceType::FireEngine),
            1 => Ok(ResourceType::MedicalUnit),
            2 => Ok(ResourceType::RescueCrew),
            3 => Ok(ResourceType::HeavyEquipment),
            4 => Ok(ResourceType::SupplyTruck),
            other => Err(LedgerError::UnknownResourceType(other)),
        }
    }
}

impl From<ResourceType> for u8 {
    fn from(t: ResourceType) -> u8 {
        t as u8
    }
}

/// A sensor only ever moves from `Active` to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Active,
    Inactive,
}

/// Deployment status; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum DeploymentStatus {
    Active = 1,
    Completed = 2,
}

impl DeploymentStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DeploymentStatus::Active),
            2 => Some(DeploymentStatus::Completed),
            _ => None,
        }
    }
}

impl From<DeploymentStatus> for u8 {
    fn from(s: DeploymentStatus) -> u8 {
        s as u8
    }
}

// ---

/// Validated registration input for a sensor.
#[derive(Debug, Clone)]
pub struct NewSensor {
    pub sensor_id: SensorId,
    pub sensor_type: SensorType,
    pub region_id: RegionId,
    pub location_lat: f64,
    pub location_long: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Sensor {
    #[serde(skip)]
    pub sensor_id: SensorId,
    pub sensor_type: SensorType,
    pub region_id: RegionId,
    pub location_lat: f64,
    pub location_long: f64,
    #[serde(rename = "active", serialize_with = "serialize_active")]
    pub state: SensorState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SensorReading {
    #[serde(skip)]
    pub sensor_id: SensorId,
    #[serde(skip)]
    pub timestamp: DateTime<Utc>,
    pub reading_value: f64,
    pub alert_triggered: bool,
}

impl Sensor {
    /// Build a freshly registered, active sensor.
    pub fn register(new: NewSensor) -> LedgerResult<Self> {
        // ---
        let NewSensor {
            sensor_id,
            sensor_type,
            region_id,
            location_lat,
            location_long,
        } = new;

        let lat_ok = (-90.0..=90.0).contains(&location_lat);
        let long_ok = (-180.0..=180.0).contains(&location_long);
        if !lat_ok || !long_ok {
            return Err(LedgerError::InvalidLocation {
                lat: location_lat,
                long: location_long,
            });
        }

        Ok(Sensor {
            sensor_id,
            sensor_type,
            region_id,
            location_lat,
            location_long,
            state: SensorState::Active,
        })
    }

    pub fn is_active(&self) -> bool {
        self.state == SensorState::Active
    }

    /// Flag the sensor inactive. Returns whether the state changed.
    pub fn deactivate(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = SensorState::Inactive;
        was_active
    }

    /// Evaluate a submitted value into a reading, or reject it when inactive.
    pub fn accept_reading(
        &self,
        timestamp: DateTime<Utc>,
        value: f64,
        thresholds: &ThresholdTable,
    ) -> LedgerResult<SensorReading> {
        // ---
        if !self.is_active() {
            return Err(LedgerError::SensorInactive);
        }

        Ok(SensorReading {
            sensor_id: self.sensor_id,
            timestamp,
            reading_value: value,
            alert_triggered: thresholds.evaluate(self.sensor_type, value),
        })
    }
}

// ---

/// Validated registration input for a resource.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub capacity: u32,
    pub current_region_id: RegionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Resource {
    #[serde(skip)]
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub capacity: u32,
    pub current_region_id: RegionId,
    pub available: bool,
    /// Zero on the wire until the first deployment.
    #[serde(serialize_with = "serialize_millis_or_zero")]
    pub last_deployed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Deployment {
    #[serde(skip)]
    pub deployment_id: DeploymentId,
    pub resource_id: ResourceId,
    pub region_id: RegionId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: DeploymentStatus,
}

impl Resource {
    pub fn register(new: NewResource) -> Self {
        // ---
        Resource {
            resource_id: new.resource_id,
            resource_type: new.resource_type,
            capacity: new.capacity,
            current_region_id: new.current_region_id,
            available: true,
            last_deployed: None,
        }
    }

    /// Take the resource out of the pool and open a deployment for it.
    pub fn deploy(
        &mut self,
        deployment_id: DeploymentId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Deployment> {
        // ---
        if !self.available {
            return Err(LedgerError::ResourceUnavailable);
        }

        self.available = false;
        self.last_deployed = Some(now);

        Ok(Deployment {
            deployment_id,
            resource_id: self.resource_id,
            region_id,
            start_time: now,
            end_time: None,
            status: DeploymentStatus::Active,
        })
    }
}

impl Deployment {
    pub fn is_active(&self) -> bool {
        self.status == DeploymentStatus::Active
    }

    /// Close the deployment and hand `resource` back to the pool.
    ///
    /// `resource` must be the record this deployment references.
    pub fn complete(&mut self, resource: &mut Resource, now: DateTime<Utc>) -> LedgerResult<()> {
        // ---
        if !self.is_active() {
            return Err(LedgerError::DeploymentNotActive);
        }
        debug_assert_eq!(self.resource_id, resource.resource_id);

        self.end_time = Some(now);
        self.status = DeploymentStatus::Completed;
        resource.available = true;
        Ok(())
    }
}

// ---

/// Convert caller-supplied epoch milliseconds into a timestamp.
///
/// Accepted range is 0001-01-01T00:00:00Z through 9999-12-31T23:59:59.999Z,
/// which every backend can store.
pub fn timestamp_from_millis(millis: i64) -> LedgerResult<DateTime<Utc>> {
    // ---
    if !(MIN_TIMESTAMP_MILLIS..=MAX_TIMESTAMP_MILLIS).contains(&millis) {
        return Err(LedgerError::InvalidTimestamp(millis));
    }
    DateTime::from_timestamp_millis(millis).ok_or(LedgerError::InvalidTimestamp(millis))
}

/// 0001-01-01T00:00:00.000Z
pub const MIN_TIMESTAMP_MILLIS: i64 = -62_135_596_800_000;
/// 9999-12-31T23:59:59.999Z
pub const MAX_TIMESTAMP_MILLIS: i64 = 253_402_300_799_999;

fn serialize_active<S: Serializer>(state: &SensorState, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bool(*state == SensorState::Active)
}

fn serialize_millis_or_zero<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_i64(value.map_or(0, |t| t.timestamp_millis()))
}

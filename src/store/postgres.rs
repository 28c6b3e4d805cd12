//! Postgres backend.
//!
//! Each operation is one transaction. Rows a transition depends on are
//! locked (`FOR UPDATE` / `FOR SHARE`) before the pure transition from
//! `models` is evaluated, and the results are written back before commit.
//! An early `?` drops the transaction, which rolls it back.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::alerts::ThresholdTable;
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::models::{
    Deployment, DeploymentId, DeploymentStatus, RegionId, Resource, ResourceId, ResourceType,
    Sensor, SensorId, SensorReading, SensorState, SensorType,
};

// ---

#[derive(sqlx::FromRow)]
struct SensorRow {
    sensor_id: i64,
    sensor_type: i16,
    region_id: i64,
    location_lat: f64,
    location_long: f64,
    active: bool,
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    sensor_id: i64,
    reading_time: DateTime<Utc>,
    reading_value: f64,
    alert_triggered: bool,
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    resource_id: i64,
    resource_type: i16,
    capacity: i64,
    current_region_id: i64,
    available: bool,
    last_deployed: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    deployment_id: i64,
    resource_id: i64,
    region_id: i64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: i16,
}

/// Narrow a stored integer column back to its domain width.
fn narrow<T: TryFrom<i64>>(value: i64) -> Result<T, sqlx::Error>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    T::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn code(value: i16) -> Result<u8, sqlx::Error> {
    u8::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl TryFrom<SensorRow> for Sensor {
    type Error = LedgerError;

    fn try_from(row: SensorRow) -> LedgerResult<Self> {
        Ok(Sensor {
            sensor_id: narrow(row.sensor_id)?,
            sensor_type: SensorType::try_from(code(row.sensor_type)?)?,
            region_id: narrow(row.region_id)?,
            location_lat: row.location_lat,
            location_long: row.location_long,
            state: if row.active {
                SensorState::Active
            } else {
                SensorState::Inactive
            },
        })
    }
}

impl TryFrom<ReadingRow> for SensorReading {
    type Error = LedgerError;

    fn try_from(row: ReadingRow) -> LedgerResult<Self> {
        Ok(SensorReading {
            sensor_id: narrow(row.sensor_id)?,
            timestamp: row.reading_time,
            reading_value: row.reading_value,
            alert_triggered: row.alert_triggered,
        })
    }
}

impl TryFrom<ResourceRow> for Resource {
    type Error = LedgerError;

    fn try_from(row: ResourceRow) -> LedgerResult<Self> {
        Ok(Resource {
            resource_id: narrow(row.resource_id)?,
            resource_type: ResourceType::try_from(code(row.resource_type)?)?,
            capacity: narrow(row.capacity)?,
            current_region_id: narrow(row.current_region_id)?,
            available: row.available,
            last_deployed: row.last_deployed,
        })
    }
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = LedgerError;

    fn try_from(row: DeploymentRow) -> LedgerResult<Self> {
        let status = code(row.status)?;
        Ok(Deployment {
            deployment_id: narrow(row.deployment_id)?,
            resource_id: narrow(row.resource_id)?,
            region_id: narrow(row.region_id)?,
            start_time: row.start_time,
            end_time: row.end_time,
            status: DeploymentStatus::from_code(status).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown deployment status {}", status).into())
            })?,
        })
    }
}

// ---

const SENSOR_COLUMNS: &str =
    "sensor_id, sensor_type, region_id, location_lat, location_long, active";
const READING_COLUMNS: &str = "sensor_id, reading_time, reading_value, alert_triggered";
const RESOURCE_COLUMNS: &str =
    "resource_id, resource_type, capacity, current_region_id, available, last_deployed";
const DEPLOYMENT_COLUMNS: &str =
    "deployment_id, resource_id, region_id, start_time, end_time, status";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // --- sensors

    pub async fn register_sensor(&self, sensor: &Sensor) -> LedgerResult<()> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO sensors (sensor_id, sensor_type, region_id, location_lat, location_long, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sensor_id) DO NOTHING
            "#,
        )
        .bind(i64::from(sensor.sensor_id))
        .bind(i16::from(u8::from(sensor.sensor_type)))
        .bind(i64::from(sensor.region_id))
        .bind(sensor.location_lat)
        .bind(sensor.location_long)
        .bind(sensor.is_active())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyExists(Entity::Sensor));
        }
        Ok(())
    }

    pub async fn sensor(&self, sensor_id: SensorId) -> LedgerResult<Sensor> {
        // ---
        let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE sensor_id = $1");
        sqlx::query_as::<_, SensorRow>(&sql)
            .bind(i64::from(sensor_id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Sensor))?
            .try_into()
    }

    pub async fn deactivate_sensor(&self, sensor_id: SensorId) -> LedgerResult<()> {
        // ---
        let result = sqlx::query("UPDATE sensors SET active = FALSE WHERE sensor_id = $1")
            .bind(i64::from(sensor_id))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(Entity::Sensor));
        }
        Ok(())
    }

    pub async fn record_reading(
        &self,
        sensor_id: SensorId,
        timestamp: DateTime<Utc>,
        value: f64,
        thresholds: &ThresholdTable,
    ) -> LedgerResult<SensorReading> {
        // ---
        let mut tx = self.pool.begin().await?;

        // FOR SHARE holds off a concurrent deactivation until we commit
        let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE sensor_id = $1 FOR SHARE");
        let sensor: Sensor = sqlx::query_as::<_, SensorRow>(&sql)
            .bind(i64::from(sensor_id))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Sensor))?
            .try_into()?;

        let reading = sensor.accept_reading(timestamp, value, thresholds)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sensor_readings (sensor_id, reading_time, reading_value, alert_triggered)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (sensor_id, reading_time) DO NOTHING
            "#,
        )
        .bind(i64::from(sensor_id))
        .bind(reading.timestamp)
        .bind(reading.reading_value)
        .bind(reading.alert_triggered)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyExists(Entity::Reading));
        }

        tx.commit().await?;
        Ok(reading)
    }

    pub async fn latest_reading(&self, sensor_id: SensorId) -> LedgerResult<SensorReading> {
        // ---
        self.ensure_sensor(sensor_id).await?;

        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings WHERE sensor_id = $1 \
             ORDER BY reading_time DESC LIMIT 1"
        );
        sqlx::query_as::<_, ReadingRow>(&sql)
            .bind(i64::from(sensor_id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Reading))?
            .try_into()
    }

    pub async fn reading_at(
        &self,
        sensor_id: SensorId,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<SensorReading> {
        // ---
        self.ensure_sensor(sensor_id).await?;

        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings WHERE sensor_id = $1 AND reading_time = $2"
        );
        sqlx::query_as::<_, ReadingRow>(&sql)
            .bind(i64::from(sensor_id))
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Reading))?
            .try_into()
    }

    async fn ensure_sensor(&self, sensor_id: SensorId) -> LedgerResult<()> {
        // ---
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sensors WHERE sensor_id = $1)")
                .bind(i64::from(sensor_id))
                .fetch_one(&self.pool)
                .await?;

        if !exists {
            return Err(LedgerError::NotFound(Entity::Sensor));
        }
        Ok(())
    }

    // --- resources & deployments

    pub async fn register_resource(&self, resource: &Resource) -> LedgerResult<()> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO resources (resource_id, resource_type, capacity, current_region_id, available, last_deployed)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resource_id) DO NOTHING
            "#,
        )
        .bind(i64::from(resource.resource_id))
        .bind(i16::from(u8::from(resource.resource_type)))
        .bind(i64::from(resource.capacity))
        .bind(i64::from(resource.current_region_id))
        .bind(resource.available)
        .bind(resource.last_deployed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyExists(Entity::Resource));
        }
        Ok(())
    }

    pub async fn resource(&self, resource_id: ResourceId) -> LedgerResult<Resource> {
        // ---
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE resource_id = $1");
        sqlx::query_as::<_, ResourceRow>(&sql)
            .bind(i64::from(resource_id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Resource))?
            .try_into()
    }

    pub async fn deploy_resource(
        &self,
        deployment_id: DeploymentId,
        resource_id: ResourceId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Deployment> {
        // ---
        let mut tx = self.pool.begin().await?;

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM deployments WHERE deployment_id = $1)",
        )
        .bind(i64::from(deployment_id))
        .fetch_one(&mut *tx)
        .await?;
        if taken {
            return Err(LedgerError::AlreadyExists(Entity::Deployment));
        }

        let mut resource = lock_resource(&mut tx, resource_id).await?;
        let deployment = resource.deploy(deployment_id, region_id, now)?;

        let result = sqlx::query(
            r#"
            INSERT INTO deployments (deployment_id, resource_id, region_id, start_time, end_time, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (deployment_id) DO NOTHING
            "#,
        )
        .bind(i64::from(deployment.deployment_id))
        .bind(i64::from(deployment.resource_id))
        .bind(i64::from(deployment.region_id))
        .bind(deployment.start_time)
        .bind(deployment.end_time)
        .bind(i16::from(u8::from(deployment.status)))
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyExists(Entity::Deployment));
        }

        store_availability(&mut tx, &resource).await?;

        tx.commit().await?;
        Ok(deployment)
    }

    pub async fn complete_deployment(
        &self,
        deployment_id: DeploymentId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Deployment> {
        // ---
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE deployment_id = $1 FOR UPDATE"
        );
        let mut deployment: Deployment = sqlx::query_as::<_, DeploymentRow>(&sql)
            .bind(i64::from(deployment_id))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Deployment))?
            .try_into()?;

        let mut resource = lock_resource(&mut tx, deployment.resource_id).await?;
        deployment.complete(&mut resource, now)?;

        sqlx::query("UPDATE deployments SET end_time = $2, status = $3 WHERE deployment_id = $1")
            .bind(i64::from(deployment.deployment_id))
            .bind(deployment.end_time)
            .bind(i16::from(u8::from(deployment.status)))
            .execute(&mut *tx)
            .await?;

        store_availability(&mut tx, &resource).await?;

        tx.commit().await?;
        Ok(deployment)
    }

    pub async fn deployment(&self, deployment_id: DeploymentId) -> LedgerResult<Deployment> {
        // ---
        let sql = format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE deployment_id = $1");
        sqlx::query_as::<_, DeploymentRow>(&sql)
            .bind(i64::from(deployment_id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Deployment))?
            .try_into()
    }
}

async fn lock_resource(
    tx: &mut Transaction<'_, Postgres>,
    resource_id: ResourceId,
) -> LedgerResult<Resource> {
    // ---
    let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE resource_id = $1 FOR UPDATE");
    sqlx::query_as::<_, ResourceRow>(&sql)
        .bind(i64::from(resource_id))
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::NotFound(Entity::Resource))?
        .try_into()
}

async fn store_availability(
    tx: &mut Transaction<'_, Postgres>,
    resource: &Resource,
) -> LedgerResult<()> {
    // ---
    sqlx::query("UPDATE resources SET available = $2, last_deployed = $3 WHERE resource_id = $1")
        .bind(i64::from(resource.resource_id))
        .bind(resource.available)
        .bind(resource.last_deployed)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::OnceLock;

    use super::*;
    use crate::models::{NewResource, NewSensor};
    use crate::schema::create_schema;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    // Require a reachable Postgres:
    //   DATABASE_URL=postgres://... cargo test -- --ignored

    async fn store() -> PgStore {
        // ---
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("Failed to connect to Postgres");
        create_schema(&pool).await.expect("Failed to create schema");
        PgStore::new(pool)
    }

    /// Identifiers unique to this run, so tests can share one database.
    fn fresh_id() -> u32 {
        // ---
        static NEXT: OnceLock<AtomicU32> = OnceLock::new();
        NEXT.get_or_init(|| {
            let seed = (Utc::now().timestamp() % 400_000) as u32;
            AtomicU32::new(seed * 10_000 + 1)
        })
        .fetch_add(1, Ordering::Relaxed)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sensor(sensor_id: SensorId, sensor_type: SensorType) -> Sensor {
        Sensor::register(NewSensor {
            sensor_id,
            sensor_type,
            region_id: 2,
            location_lat: 34.052235,
            location_long: -118.243683,
        })
        .unwrap()
    }

    fn resource(resource_id: ResourceId, resource_type: ResourceType, capacity: u32) -> Resource {
        Resource::register(NewResource {
            resource_id,
            resource_type,
            capacity,
            current_region_id: 3,
        })
    }

    #[tokio::test]
    #[ignore] // Only run when DATABASE_URL points at Postgres
    async fn test_duplicate_registration_keeps_original() {
        // ---
        let store = store().await;

        let sensor_id = fresh_id();
        store
            .register_sensor(&sensor(sensor_id, SensorType::Smoke))
            .await
            .unwrap();
        assert_matches!(
            store
                .register_sensor(&sensor(sensor_id, SensorType::Flood))
                .await,
            Err(LedgerError::AlreadyExists(Entity::Sensor))
        );
        assert_eq!(
            store.sensor(sensor_id).await.unwrap().sensor_type,
            SensorType::Smoke
        );

        let resource_id = fresh_id();
        store
            .register_resource(&resource(resource_id, ResourceType::FireEngine, 5000))
            .await
            .unwrap();
        assert_matches!(
            store
                .register_resource(&resource(resource_id, ResourceType::MedicalUnit, 10))
                .await,
            Err(LedgerError::AlreadyExists(Entity::Resource))
        );
        let stored = store.resource(resource_id).await.unwrap();
        assert_eq!(stored.resource_type, ResourceType::FireEngine);
        assert_eq!(stored.capacity, 5000);
        assert!(stored.available);
        assert_eq!(stored.last_deployed, None);
    }

    #[tokio::test]
    #[ignore] // Only run when DATABASE_URL points at Postgres
    async fn test_readings_round_trip() {
        // ---
        let store = store().await;
        let thresholds = ThresholdTable::default();
        let sensor_id = fresh_id();
        store
            .register_sensor(&sensor(sensor_id, SensorType::Smoke))
            .await
            .unwrap();

        assert_matches!(
            store.latest_reading(sensor_id).await,
            Err(LedgerError::NotFound(Entity::Reading))
        );

        let first = store
            .record_reading(sensor_id, at(0), 80.0, &thresholds)
            .await
            .unwrap();
        assert!(first.alert_triggered);
        store
            .record_reading(sensor_id, at(60), 20.0, &thresholds)
            .await
            .unwrap();

        let latest = store.latest_reading(sensor_id).await.unwrap();
        assert_eq!(latest.timestamp, at(60));
        assert!(!latest.alert_triggered);
        assert_eq!(store.reading_at(sensor_id, at(0)).await.unwrap(), first);
        assert_matches!(
            store.reading_at(sensor_id, at(30)).await,
            Err(LedgerError::NotFound(Entity::Reading))
        );

        // Same (sensor, timestamp) twice keeps the first value
        assert_matches!(
            store.record_reading(sensor_id, at(0), 5.0, &thresholds).await,
            Err(LedgerError::AlreadyExists(Entity::Reading))
        );
        assert_eq!(
            store.reading_at(sensor_id, at(0)).await.unwrap().reading_value,
            80.0
        );

        store.deactivate_sensor(sensor_id).await.unwrap();
        assert_matches!(
            store
                .record_reading(sensor_id, at(120), 80.0, &thresholds)
                .await,
            Err(LedgerError::SensorInactive)
        );
        assert_eq!(store.latest_reading(sensor_id).await.unwrap().timestamp, at(60));
        assert_matches!(
            store.reading_at(fresh_id(), at(0)).await,
            Err(LedgerError::NotFound(Entity::Sensor))
        );
    }

    #[tokio::test]
    #[ignore] // Only run when DATABASE_URL points at Postgres
    async fn test_deployment_lifecycle() {
        // ---
        let store = store().await;
        let resource_id = fresh_id();
        store
            .register_resource(&resource(resource_id, ResourceType::RescueCrew, 12))
            .await
            .unwrap();

        let deployment_id = fresh_id();
        let deployment = store
            .deploy_resource(deployment_id, resource_id, 4, at(0))
            .await
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);
        let taken = store.resource(resource_id).await.unwrap();
        assert!(!taken.available);
        assert_eq!(taken.last_deployed, Some(at(0)));

        // Busy resource; nothing recorded under the new id
        let second_id = fresh_id();
        assert_matches!(
            store.deploy_resource(second_id, resource_id, 5, at(10)).await,
            Err(LedgerError::ResourceUnavailable)
        );
        assert_matches!(
            store.deployment(second_id).await,
            Err(LedgerError::NotFound(Entity::Deployment))
        );

        let completed = store.complete_deployment(deployment_id, at(60)).await.unwrap();
        assert_eq!(completed.status, DeploymentStatus::Completed);
        assert_eq!(completed.end_time, Some(at(60)));
        assert!(store.resource(resource_id).await.unwrap().available);

        assert_matches!(
            store.complete_deployment(deployment_id, at(90)).await,
            Err(LedgerError::DeploymentNotActive)
        );
        let stored = store.deployment(deployment_id).await.unwrap();
        assert_eq!(stored.end_time, Some(at(60)));
        assert_eq!(stored.start_time, at(0));

        assert_matches!(
            store.deploy_resource(fresh_id(), fresh_id(), 1, at(0)).await,
            Err(LedgerError::NotFound(Entity::Resource))
        );
    }

    #[tokio::test]
    #[ignore] // Only run when DATABASE_URL points at Postgres
    async fn test_deployment_id_collision() {
        // ---
        let store = store().await;
        let first = fresh_id();
        let second = fresh_id();
        for resource_id in [first, second] {
            store
                .register_resource(&resource(resource_id, ResourceType::SupplyTruck, 800))
                .await
                .unwrap();
        }

        let deployment_id = fresh_id();
        store
            .deploy_resource(deployment_id, first, 1, at(0))
            .await
            .unwrap();
        assert_matches!(
            store.deploy_resource(deployment_id, second, 1, at(5)).await,
            Err(LedgerError::AlreadyExists(Entity::Deployment))
        );

        // The rejected deploy left the second resource untouched
        let untouched = store.resource(second).await.unwrap();
        assert!(untouched.available);
        assert_eq!(untouched.last_deployed, None);
        assert_eq!(
            store.deployment(deployment_id).await.unwrap().resource_id,
            first
        );
    }

    #[tokio::test]
    #[ignore] // Only run when DATABASE_URL points at Postgres
    async fn test_single_active_deployment_per_resource_index() {
        // ---
        let store = store().await;
        let resource_id = fresh_id();
        store
            .register_resource(&resource(resource_id, ResourceType::HeavyEquipment, 1))
            .await
            .unwrap();
        store
            .deploy_resource(fresh_id(), resource_id, 1, at(0))
            .await
            .unwrap();

        // Bypass the store and write a second active row directly
        let result = sqlx::query(
            "INSERT INTO deployments (deployment_id, resource_id, region_id, start_time, status) \
             VALUES ($1, $2, 1, $3, 1)",
        )
        .bind(i64::from(fresh_id()))
        .bind(i64::from(resource_id))
        .bind(at(1))
        .execute(&store.pool)
        .await;

        let err = result.expect_err("second active deployment must be rejected");
        let db_err = err.as_database_error().expect("database error");
        assert_eq!(db_err.code().as_deref(), Some("23505"));
        assert_eq!(db_err.constraint(), Some("uq_deployments_active_resource"));
    }
}

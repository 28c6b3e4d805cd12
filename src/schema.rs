//! Database schema management for `relief-ledger`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` when the Postgres backend is used.

use anyhow::Result;
use sqlx::PgPool;

// ---

const SCHEMA_LOCK_KEY: i64 = 0x7265_6c69_6566;

/// Create or update the database schema (idempotent).
///
/// Creates the sensor registry tables (`sensors`, `sensor_readings`) and the
/// deployment manager tables (`resources`, `deployments`). Safe to call on
/// every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Concurrent CREATE ... IF NOT EXISTS can still collide in pg_type;
    // serialize schema setup across instances.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            sensor_id     BIGINT PRIMARY KEY,
            sensor_type   SMALLINT         NOT NULL,
            region_id     BIGINT           NOT NULL,
            location_lat  DOUBLE PRECISION NOT NULL,
            location_long DOUBLE PRECISION NOT NULL,
            active        BOOLEAN          NOT NULL DEFAULT TRUE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only; one row per (sensor, timestamp)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            sensor_id       BIGINT           NOT NULL REFERENCES sensors (sensor_id),
            reading_time    TIMESTAMPTZ      NOT NULL,
            reading_value   DOUBLE PRECISION NOT NULL,
            alert_triggered BOOLEAN          NOT NULL,
            PRIMARY KEY (sensor_id, reading_time)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            resource_id       BIGINT PRIMARY KEY,
            resource_type     SMALLINT    NOT NULL,
            capacity          BIGINT      NOT NULL,
            current_region_id BIGINT      NOT NULL,
            available         BOOLEAN     NOT NULL DEFAULT TRUE,
            last_deployed     TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            deployment_id BIGINT PRIMARY KEY,
            resource_id   BIGINT      NOT NULL REFERENCES resources (resource_id),
            region_id     BIGINT      NOT NULL,
            start_time    TIMESTAMPTZ NOT NULL,
            end_time      TIMESTAMPTZ,
            status        SMALLINT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // At most one active (status = 1) deployment per resource
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_deployments_active_resource
            ON deployments (resource_id)
            WHERE status = 1;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_deployments_resource_id
            ON deployments (resource_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

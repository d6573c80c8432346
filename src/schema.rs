//! Database schema management for `sensorflow-cache`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the append-only `sensor_readings` table, the `weekly_sensor_averages`
/// aggregate table keyed by `(sensor_id, year, week_number)`, and the
/// `periodic_tasks` schedule records. Safe to call on every startup.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id          BIGSERIAL PRIMARY KEY,
            timestamp   TIMESTAMPTZ      NOT NULL DEFAULT now(),
            sensor_id   VARCHAR(50)      NOT NULL,
            temperature DOUBLE PRECISION,
            pressure    DOUBLE PRECISION,
            humidity    DOUBLE PRECISION,
            vcc         INTEGER
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // The composite primary key is what `FOR UPDATE` locks and what
    // `ON CONFLICT` arbitrates on.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weekly_sensor_averages (
            sensor_id             VARCHAR(50)      NOT NULL,
            year                  INTEGER          NOT NULL,
            week_number           INTEGER          NOT NULL,
            avg_temperature       DOUBLE PRECISION,
            avg_pressure          DOUBLE PRECISION,
            avg_humidity          DOUBLE PRECISION,
            avg_vcc               DOUBLE PRECISION,
            datapoints            INTEGER          NOT NULL DEFAULT 0 CHECK (datapoints >= 0),
            calculation_timestamp TIMESTAMPTZ      NOT NULL,
            PRIMARY KEY (sensor_id, year, week_number)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS periodic_tasks (
            name       TEXT PRIMARY KEY,
            every      INTEGER     NOT NULL CHECK (every > 0),
            period     TEXT        NOT NULL,
            task       TEXT        NOT NULL,
            enabled    BOOLEAN     NOT NULL DEFAULT TRUE,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_sensor_ts
            ON sensor_readings (sensor_id, timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_ts
            ON sensor_readings (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

//! Weekly aggregator and reading store.
//!
//! Every ingested reading is appended to `sensor_readings` and folded into the
//! `(sensor_id, year, week_number)` row of `weekly_sensor_averages` inside one
//! transaction. The aggregate row is read with `SELECT ... FOR UPDATE`, so two
//! concurrent readings for the same week serialize on that row instead of both
//! folding into the same stale average. Different weeks never contend.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, warn};

use crate::{
    error::StoreError,
    models::{RawReading, WeeklyAverage},
};

// ---

#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Append a reading and fold it into its weekly aggregate, atomically.
    async fn record_reading(&self, reading: &RawReading) -> Result<WeeklyAverage, StoreError>;

    /// All aggregate rows of a sensor, oldest week first.
    async fn weekly_averages(&self, sensor_id: &str) -> Result<Vec<WeeklyAverage>, StoreError>;

    /// Most recent readings of a sensor, newest first.
    async fn recent_readings(
        &self,
        sensor_id: &str,
        limit: u32,
    ) -> Result<Vec<RawReading>, StoreError>;
}

const SELECT_AGGREGATE_FOR_UPDATE: &str = r#"
    SELECT sensor_id, year, week_number,
           avg_temperature, avg_pressure, avg_humidity, avg_vcc,
           datapoints, calculation_timestamp
    FROM weekly_sensor_averages
    WHERE sensor_id = $1 AND year = $2 AND week_number = $3
    FOR UPDATE
"#;

/// Postgres-backed store. Locking is delegated entirely to the database.
#[derive(Clone)]
pub struct PgSensorStore {
    pool: PgPool,
}

impl PgSensorStore {
    pub fn new(pool: PgPool) -> Self {
        PgSensorStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin, apply and commit. Any failure after `begin` rolls back.
    async fn record_in_transaction(
        &self,
        reading: &RawReading,
    ) -> Result<WeeklyAverage, StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;

        match apply_reading(&mut tx, reading).await {
            Ok(aggregate) => {
                tx.commit().await?;
                debug!("Transaction committed for {}", reading.sensor_id);
                Ok(aggregate)
            }
            Err(e) => {
                info!("Rolling back transaction due to error.");
                if let Err(rb) = tx.rollback().await {
                    warn!("Rollback failed: {}", rb);
                }
                Err(e)
            }
        }
        // The connection returns to the pool when `tx` is consumed or dropped.
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    async fn record_reading(&self, reading: &RawReading) -> Result<WeeklyAverage, StoreError> {
        // ---
        let result = self.record_in_transaction(reading).await;
        if let Err(e) = &result {
            error!("Error recording reading for {}: {}", reading.sensor_id, e);
        }
        result
    }

    async fn weekly_averages(&self, sensor_id: &str) -> Result<Vec<WeeklyAverage>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, WeeklyAverage>(
            r#"
            SELECT sensor_id, year, week_number,
                   avg_temperature, avg_pressure, avg_humidity, avg_vcc,
                   datapoints, calculation_timestamp
            FROM weekly_sensor_averages
            WHERE sensor_id = $1
            ORDER BY year, week_number
            "#,
        )
        .bind(sensor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn recent_readings(
        &self,
        sensor_id: &str,
        limit: u32,
    ) -> Result<Vec<RawReading>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, RawReading>(
            r#"
            SELECT sensor_id, timestamp, temperature, pressure, humidity, vcc
            FROM sensor_readings
            WHERE sensor_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(sensor_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Steps run inside the transaction: insert, lock, fold or seed.
async fn apply_reading(
    tx: &mut Transaction<'_, Postgres>,
    reading: &RawReading,
) -> Result<WeeklyAverage, StoreError> {
    // ---
    insert_reading(tx, reading).await?;
    info!(
        "Inserted data for sensor {} at {}",
        reading.sensor_id,
        reading.timestamp.to_rfc3339()
    );

    let (year, week) = reading.iso_week();
    let now = Utc::now();

    if let Some(mut aggregate) = lock_aggregate(tx, &reading.sensor_id, year, week).await? {
        aggregate.fold(reading, now);
        update_aggregate(tx, &aggregate).await?;
        info!(
            "Updated weekly average for sensor {}, year {}, week {}. Datapoints: {}",
            aggregate.sensor_id, year, week, aggregate.datapoints
        );
        return Ok(aggregate);
    }

    let seed = WeeklyAverage::seed(reading, now);
    if insert_seed(tx, &seed).await? {
        info!(
            "Inserted new weekly average for sensor {}, year {}, week {}.",
            seed.sensor_id, year, week
        );
        return Ok(seed);
    }

    // Another transaction created the row between our select and insert.
    // Its insert has committed by now (ON CONFLICT waits for it), so lock and fold.
    let mut aggregate = lock_aggregate(tx, &reading.sensor_id, year, week)
        .await?
        .ok_or_else(|| {
            StoreError::Internal(format!(
                "aggregate row for {}/{}/{} vanished after insert conflict",
                reading.sensor_id, year, week
            ))
        })?;
    aggregate.fold(reading, now);
    update_aggregate(tx, &aggregate).await?;
    info!(
        "Updated weekly average for sensor {}, year {}, week {} after insert race. Datapoints: {}",
        aggregate.sensor_id, year, week, aggregate.datapoints
    );
    Ok(aggregate)
}

async fn insert_reading(
    tx: &mut Transaction<'_, Postgres>,
    reading: &RawReading,
) -> Result<(), StoreError> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO sensor_readings (timestamp, sensor_id, temperature, pressure, humidity, vcc)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(reading.timestamp)
    .bind(&reading.sensor_id)
    .bind(reading.temperature)
    .bind(reading.pressure)
    .bind(reading.humidity)
    .bind(reading.vcc)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn lock_aggregate(
    tx: &mut Transaction<'_, Postgres>,
    sensor_id: &str,
    year: i32,
    week: i32,
) -> Result<Option<WeeklyAverage>, StoreError> {
    // ---
    let row = sqlx::query_as::<_, WeeklyAverage>(SELECT_AGGREGATE_FOR_UPDATE)
        .bind(sensor_id)
        .bind(year)
        .bind(week)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(row)
}

/// Insert a fresh aggregate row. Returns `false` if the row already existed.
async fn insert_seed(
    tx: &mut Transaction<'_, Postgres>,
    seed: &WeeklyAverage,
) -> Result<bool, StoreError> {
    // ---
    let result = sqlx::query(
        r#"
        INSERT INTO weekly_sensor_averages
            (sensor_id, year, week_number,
             avg_temperature, avg_pressure, avg_humidity, avg_vcc,
             datapoints, calculation_timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (sensor_id, year, week_number) DO NOTHING
        "#,
    )
    .bind(&seed.sensor_id)
    .bind(seed.year)
    .bind(seed.week_number)
    .bind(seed.avg_temperature)
    .bind(seed.avg_pressure)
    .bind(seed.avg_humidity)
    .bind(seed.avg_vcc)
    .bind(seed.datapoints)
    .bind(seed.calculation_timestamp)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn update_aggregate(
    tx: &mut Transaction<'_, Postgres>,
    aggregate: &WeeklyAverage,
) -> Result<(), StoreError> {
    // ---
    sqlx::query(
        r#"
        UPDATE weekly_sensor_averages
        SET avg_temperature = $1, avg_pressure = $2, avg_humidity = $3, avg_vcc = $4,
            datapoints = $5, calculation_timestamp = $6
        WHERE sensor_id = $7 AND year = $8 AND week_number = $9
        "#,
    )
    .bind(aggregate.avg_temperature)
    .bind(aggregate.avg_pressure)
    .bind(aggregate.avg_humidity)
    .bind(aggregate.avg_vcc)
    .bind(aggregate.datapoints)
    .bind(aggregate.calculation_timestamp)
    .bind(&aggregate.sensor_id)
    .bind(aggregate.year)
    .bind(aggregate.week_number)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

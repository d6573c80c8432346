//! Shared test doubles: a scripted vendor and an in-memory reading store.
#![allow(dead_code)]

use std::{collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use sensorflow_cache::{
    error::{FetchError, StoreError},
    RawReading, SensorSource, SensorStore, WeeklyAverage,
};

// ---

/// What the scripted vendor does for one sensor.
#[derive(Clone)]
pub enum Script {
    Ok(Value),
    Status(u16),
    Timeout,
    /// Respond with the value after sleeping.
    Slow(Duration, Value),
}

/// Vendor stand-in returning canned responses per sensor.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, sensor_id: &str, script: Script) {
        self.scripts.lock().unwrap().insert(sensor_id.to_string(), script);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SensorSource for ScriptedSource {
    async fn fetch(&self, sensor_id: &str) -> Result<Value, FetchError> {
        // ---
        self.calls.lock().unwrap().push(sensor_id.to_string());
        let script = self.scripts.lock().unwrap().get(sensor_id).cloned();

        match script {
            Some(Script::Ok(v)) => Ok(v),
            Some(Script::Status(code)) => Err(FetchError::Status(code)),
            Some(Script::Timeout) => Err(FetchError::Timeout),
            Some(Script::Slow(delay, v)) => {
                tokio::time::sleep(delay).await;
                Ok(v)
            }
            None => Err(FetchError::Status(404)),
        }
    }
}

/// In-memory store. A single async mutex stands in for the row lock.
#[derive(Default)]
pub struct MemorySensorStore {
    inner: AsyncMutex<Inner>,
    fail_next: Mutex<bool>,
}

#[derive(Default)]
struct Inner {
    readings: Vec<RawReading>,
    aggregates: HashMap<(String, i32, i32), WeeklyAverage>,
}

impl MemorySensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `record_reading` fail after the raw insert, to check rollback.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub async fn reading_count(&self) -> usize {
        self.inner.lock().await.readings.len()
    }
}

#[async_trait]
impl SensorStore for MemorySensorStore {
    async fn record_reading(&self, reading: &RawReading) -> Result<WeeklyAverage, StoreError> {
        // ---
        let mut inner = self.inner.lock().await;
        let fail = std::mem::take(&mut *self.fail_next.lock().unwrap());
        if fail {
            // nothing was applied, the same as a rolled back transaction
            return Err(StoreError::Internal("injected failure".into()));
        }

        inner.readings.push(reading.clone());
        let (year, week) = reading.iso_week();
        let key = (reading.sensor_id.clone(), year, week);
        let now = chrono::Utc::now();

        let aggregate = match inner.aggregates.get_mut(&key) {
            Some(existing) => {
                existing.fold(reading, now);
                existing.clone()
            }
            None => {
                let seed = WeeklyAverage::seed(reading, now);
                inner.aggregates.insert(key, seed.clone());
                seed
            }
        };
        Ok(aggregate)
    }

    async fn weekly_averages(&self, sensor_id: &str) -> Result<Vec<WeeklyAverage>, StoreError> {
        // ---
        let inner = self.inner.lock().await;
        let mut rows: Vec<WeeklyAverage> = inner
            .aggregates
            .values()
            .filter(|a| a.sensor_id == sensor_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.year, a.week_number));
        Ok(rows)
    }

    async fn recent_readings(
        &self,
        sensor_id: &str,
        limit: u32,
    ) -> Result<Vec<RawReading>, StoreError> {
        // ---
        let inner = self.inner.lock().await;
        let mut rows: Vec<RawReading> = inner
            .readings
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

pub fn reading_at(
    sensor_id: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
    temperature: Option<f64>,
) -> RawReading {
    RawReading {
        sensor_id: sensor_id.to_string(),
        timestamp,
        temperature,
        pressure: Some(1000.0),
        humidity: Some(50.0),
        vcc: Some(4100),
    }
}

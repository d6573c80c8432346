//! Fan-out refresher: one fetch-and-cache task per sensor.
//!
//! `refresh_all` spawns every task and returns immediately. Tasks share no
//! mutable state; each writes its own `sensor:{id}` key. A failed fetch leaves
//! the previous entry in place and is logged for that sensor only.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    cache::CacheStore,
    client::SensorSource,
    error::{CacheError, FetchError},
    models::sensor_key,
};

// ---

/// Why one sensor's refresh did not update the cache.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("cache write failed: {0}")]
    Cache(#[from] CacheError),

    #[error("task aborted: {0}")]
    Aborted(String),
}

/// Outcome of one sensor's unit of work.
#[derive(Debug)]
pub struct FetchReport {
    pub sensor_id: String,
    pub result: Result<(), RefreshError>,
}

impl FetchReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Handles for one submitted fan-out.
///
/// Dropping the batch detaches the tasks; they still run to completion.
pub struct RefreshBatch {
    pub id: Uuid,
    handles: Vec<(String, JoinHandle<FetchReport>)>,
}

impl RefreshBatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task and collect their reports in submission order.
    pub async fn join(self) -> Vec<FetchReport> {
        // ---
        let mut reports = Vec::with_capacity(self.handles.len());
        for (sensor_id, handle) in self.handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => FetchReport {
                    sensor_id,
                    result: Err(RefreshError::Aborted(e.to_string())),
                },
            };
            reports.push(report);
        }
        reports
    }
}

#[derive(Clone)]
pub struct Refresher {
    // ---
    source: Arc<dyn SensorSource>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    permits: Arc<Semaphore>,
}

impl Refresher {
    pub fn new(
        source: Arc<dyn SensorSource>,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
        concurrency: usize,
    ) -> Self {
        // ---
        Refresher {
            source,
            cache,
            ttl,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Submit one fetch-and-cache task per sensor and return without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh_all(&self, sensor_ids: &[String]) -> RefreshBatch {
        // ---
        let id = Uuid::new_v4();
        info!("Refresh batch {} submitting {} sensors", id, sensor_ids.len());

        let handles = sensor_ids
            .iter()
            .map(|sensor_id| {
                let refresher = self.clone();
                let task_sensor = sensor_id.clone();
                let handle = tokio::spawn(async move {
                    // Closed semaphores are never produced here; treat as no limit.
                    let _permit = refresher.permits.clone().acquire_owned().await.ok();
                    refresher.fetch_and_cache(&task_sensor).await
                });
                (sensor_id.clone(), handle)
            })
            .collect();

        RefreshBatch { id, handles }
    }

    /// Fetch one sensor and write it through to the cache.
    ///
    /// Never panics or propagates; the outcome is logged and returned.
    pub async fn fetch_and_cache(&self, sensor_id: &str) -> FetchReport {
        // ---
        let result = self.try_fetch_and_cache(sensor_id).await;
        match &result {
            Ok(()) => debug!("{} data cached successfully", sensor_id),
            Err(e) => error!("{} refresh failed: {}", sensor_id, e),
        }
        FetchReport {
            sensor_id: sensor_id.to_string(),
            result,
        }
    }

    async fn try_fetch_and_cache(&self, sensor_id: &str) -> Result<(), RefreshError> {
        // ---
        let payload = self.source.fetch(sensor_id).await?;
        let body = serde_json::to_string(&payload).map_err(CacheError::from)?;
        self.cache.set(&sensor_key(sensor_id), body, self.ttl).await?;
        Ok(())
    }
}

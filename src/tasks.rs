//! Task bodies invoked by the periodic trigger.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    aggregator::SensorStore,
    models::SensorList,
    refresher::Refresher,
    scheduler::{TaskKind, TaskRunner},
    synthetic,
};

// ---

#[derive(Clone)]
pub struct PipelineTasks {
    // ---
    refresher: Refresher,
    store: Arc<dyn SensorStore>,
    sensors: Arc<SensorList>,
}

impl PipelineTasks {
    pub fn new(
        refresher: Refresher,
        store: Arc<dyn SensorStore>,
        sensors: Arc<SensorList>,
    ) -> Self {
        PipelineTasks {
            refresher,
            store,
            sensors,
        }
    }

    /// Submit a fan-out over every configured sensor without waiting for it.
    pub fn refresh_all_sensors(&self) {
        // ---
        let batch = self.refresher.refresh_all(self.sensors.ids());
        info!("Refresh batch {} submitted ({} tasks)", batch.id, batch.len());
    }

    /// Generate one synthetic reading and record it.
    pub async fn process_sensor_data(&self) {
        // ---
        info!("Starting process_sensor_data task...");
        let reading = {
            let mut rng = rand::thread_rng();
            synthetic::generate_reading(&mut rng, self.sensors.ids(), Utc::now())
        };

        let Some(reading) = reading else {
            warn!("No sensors configured, nothing to generate");
            return;
        };

        match self.store.record_reading(&reading).await {
            Ok(_) => info!("process_sensor_data task finished successfully."),
            Err(e) => error!("Error in process_sensor_data task: {}", e),
        }
    }
}

#[async_trait]
impl TaskRunner for PipelineTasks {
    async fn run(&self, task: TaskKind) {
        // ---
        match task {
            TaskKind::RefreshAllSensors => self.refresh_all_sensors(),
            TaskKind::ProcessSensorData => self.process_sensor_data().await,
        }
    }
}

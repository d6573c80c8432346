//! Periodic trigger.
//!
//! Schedule entries are registered by name at startup. Registering a name that
//! already exists replaces its interval and task instead of adding a second
//! ticker. Each tick spawns the task, so a slow run never delays the next
//! firing and overlapping runs are possible.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};

use crate::error::StoreError;

// ---

pub const REFRESH_ALL_TASK_NAME: &str = "Refresh All Sensor Cache";
pub const PROCESS_SENSOR_DATA_TASK_NAME: &str = "Process Sensor Data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Seconds => "seconds",
            Period::Minutes => "minutes",
            Period::Hours => "hours",
            Period::Days => "days",
        }
    }

    fn seconds(&self) -> u64 {
        match self {
            Period::Seconds => 1,
            Period::Minutes => 60,
            Period::Hours => 3_600,
            Period::Days => 86_400,
        }
    }
}

/// "Every N units". `every` is clamped to at least 1 when converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    pub every: u32,
    pub period: Period,
}

impl IntervalSchedule {
    pub fn minutes(every: u32) -> Self {
        IntervalSchedule {
            every,
            period: Period::Minutes,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.every.max(1)) * self.period.seconds())
    }
}

impl fmt::Display for IntervalSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {} {}", self.every, self.period.as_str())
    }
}

/// Units of work a schedule entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Fan-out refresh of every configured sensor.
    RefreshAllSensors,
    /// Generate one synthetic reading and fold it into the weekly aggregates.
    ProcessSensorData,
}

impl TaskKind {
    /// Stable identifier stored in `periodic_tasks.task`.
    pub fn identifier(&self) -> &'static str {
        match self {
            TaskKind::RefreshAllSensors => "sensor_data.tasks.refresh_all_sensors",
            TaskKind::ProcessSensorData => "sensor_data.tasks.process_sensor_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTask {
    pub name: String,
    pub interval: IntervalSchedule,
    pub task: TaskKind,
    pub enabled: bool,
}

impl PeriodicTask {
    pub fn new(name: &str, interval: IntervalSchedule, task: TaskKind) -> Self {
        PeriodicTask {
            name: name.to_string(),
            interval,
            task,
            enabled: true,
        }
    }
}

/// Executes the task a schedule entry names.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: TaskKind);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Updated,
}

struct Entry {
    task: PeriodicTask,
    handle: Option<JoinHandle<()>>,
}

/// In-process schedule keyed by entry name.
pub struct Scheduler {
    runner: Arc<dyn TaskRunner>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Scheduler {
            runner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create or update the entry named `task.name` and (re)start its ticker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, task: PeriodicTask) -> Registration {
        // ---
        let handle = task
            .enabled
            .then(|| spawn_ticker(self.runner.clone(), &task));

        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let name = task.name.clone();
        let previous = entries.insert(name.clone(), Entry { task, handle });

        match previous {
            Some(old) => {
                if let Some(h) = old.handle {
                    h.abort();
                }
                info!("Periodic task '{}' updated", name);
                Registration::Updated
            }
            None => {
                info!("Periodic task '{}' created", name);
                Registration::Created
            }
        }
    }

    /// Registered entries, sorted by name.
    pub fn tasks(&self) -> Vec<PeriodicTask> {
        // ---
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let mut tasks: Vec<PeriodicTask> = entries.values().map(|e| e.task.clone()).collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Stop every ticker. In-flight runs finish on their own.
    pub fn shutdown(&self) {
        // ---
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        for entry in entries.values_mut() {
            if let Some(h) = entry.handle.take() {
                h.abort();
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(|p| p.into_inner());
        for entry in entries.values_mut() {
            if let Some(h) = entry.handle.take() {
                h.abort();
            }
        }
    }
}

fn spawn_ticker(runner: Arc<dyn TaskRunner>, task: &PeriodicTask) -> JoinHandle<()> {
    // ---
    let name = task.name.clone();
    let kind = task.task;
    let period = task.interval.as_duration();
    info!("Scheduling '{}' ({}) {}", name, kind.identifier(), task.interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Firing periodic task '{}'", name);
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(kind).await });
        }
    })
}

/// `every` as stored in the `periodic_tasks.every` column (at least 1).
fn stored_every(interval: &IntervalSchedule) -> Result<i32, StoreError> {
    i32::try_from(interval.every.max(1)).map_err(|_| {
        StoreError::Internal(format!("interval too large to store: {}", interval))
    })
}

/// Upsert the schedule record by name into `periodic_tasks`.
pub async fn persist_task(pool: &PgPool, task: &PeriodicTask) -> Result<(), StoreError> {
    // ---
    let every = stored_every(&task.interval)?;

    sqlx::query(
        r#"
        INSERT INTO periodic_tasks (name, every, period, task, enabled, updated_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (name) DO UPDATE SET
            every = EXCLUDED.every,
            period = EXCLUDED.period,
            task = EXCLUDED.task,
            enabled = EXCLUDED.enabled,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&task.name)
    .bind(every)
    .bind(task.interval.period.as_str())
    .bind(task.task.identifier())
    .bind(task.enabled)
    .execute(pool)
    .await?;

    Ok(())
}

//! Sensor refresh, cache and weekly aggregation service.
//!
//! - [`refresher`] fans out one vendor fetch per configured sensor and writes
//!   each payload through to the [`cache`] with a TTL.
//! - [`aggregator`] appends readings and folds them into per-ISO-week running
//!   averages under a Postgres row lock.
//! - [`scheduler`] fires those tasks on fixed intervals.
//! - [`routes`] exposes cached data, weekly averages and summaries over HTTP.
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP): siblings
//! import shared types through the crate root rather than from each other's
//! internals.

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod refresher;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod state;
pub mod summary;
pub mod synthetic;
pub mod tasks;

pub use config::Config;
pub use state::AppState;

pub use aggregator::{PgSensorStore, SensorStore};
pub use cache::{CacheStore, MemoryCache, RedisCache};
pub use client::{HttpSensorClient, SensorSource};
pub use models::{RawReading, SensorList, SummaryEntry, WeeklyAverage};
pub use refresher::{FetchReport, RefreshBatch, Refresher};

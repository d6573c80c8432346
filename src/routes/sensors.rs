//! Cached sensor data endpoints.
//!
//! Sensor IDs are checked against the configured list before the cache is
//! touched, so an unknown ID is always a 400 and a cache miss for a known ID
//! is always a 503.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    cache,
    error::ApiError,
    models::{sensor_key, summary_key, SummaryEntry},
    AppState,
};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensors", get(list_cached))
        .route("/sensors/{sensor_id}", get(get_cached))
        .route("/sensors/summary/{sensor_id}", get(get_summary))
}

#[derive(Debug, Serialize)]
struct SensorDataResponse {
    sensor_id: String,
    data: Value,
}

/// Handle `GET /sensors/{sensor_id}`.
async fn get_cached(
    Path(sensor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SensorDataResponse>, ApiError> {
    // ---
    if !state.sensors.contains(&sensor_id) {
        return Err(ApiError::InvalidSensor);
    }

    let data: Option<Value> = cache::get_json(state.cache.as_ref(), &sensor_key(&sensor_id)).await?;
    match data {
        Some(data) => Ok(Json(SensorDataResponse { sensor_id, data })),
        None => {
            debug!("Cache miss for {}", sensor_id);
            Err(ApiError::Unavailable)
        }
    }
}

/// Handle `GET /sensors`: every configured sensor that currently has data.
async fn list_cached(State(state): State<AppState>) -> Json<Map<String, Value>> {
    // ---
    let mut all = Map::new();
    for sensor_id in state.sensors.ids() {
        match cache::get_json::<Value>(state.cache.as_ref(), &sensor_key(sensor_id)).await {
            Ok(Some(data)) => {
                all.insert(sensor_id.clone(), data);
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping {} in listing: {}", sensor_id, e),
        }
    }
    Json(all)
}

/// Handle `GET /sensors/summary/{sensor_id}`.
async fn get_summary(
    Path(sensor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SummaryEntry>, ApiError> {
    // ---
    if !state.sensors.contains(&sensor_id) {
        return Err(ApiError::InvalidSensor);
    }

    cache::get_json::<SummaryEntry>(state.cache.as_ref(), &summary_key(&sensor_id))
        .await?
        .map(Json)
        .ok_or(ApiError::Unavailable)
}

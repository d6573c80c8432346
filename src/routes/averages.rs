use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::info;

use crate::{error::ApiError, models::WeeklyAverage, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/sensors/get_average/{sensor_id}", get(handler))
}

/// Handle `GET /sensors/get_average/{sensor_id}`.
///
/// Rows are ordered by `(year, week_number)`. A known sensor with no rows yet
/// is a 404, not an empty list.
async fn handler(
    Path(sensor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<WeeklyAverage>>, ApiError> {
    // ---
    if !state.sensors.contains(&sensor_id) {
        return Err(ApiError::InvalidSensor);
    }

    let rows = state.store.weekly_averages(&sensor_id).await?;
    if rows.is_empty() {
        return Err(ApiError::NoHistory);
    }

    info!("Returning {} weekly averages for {}", rows.len(), sensor_id);
    Ok(Json(rows))
}

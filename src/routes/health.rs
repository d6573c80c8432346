// src/routes/health.rs
//! Liveness endpoint for container orchestrators and CI.
//!
//! Reports how many sensors this instance monitors. It never touches the
//! cache, the database, or the vendor API, so it stays green while any of
//! those are degraded; degraded data shows up as 503s on the sensor routes.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sensors: usize,
}

/// Handle `GET /health`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sensors: state.sensors.len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

mod averages;
mod health;
mod sensors;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(sensors::router())
        .merge(averages::router())
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use std::sync::Arc;

use crate::{aggregator::SensorStore, cache::CacheStore, models::SensorList};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SensorStore>,
    pub cache: Arc<dyn CacheStore>,
    pub sensors: Arc<SensorList>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SensorStore>,
        cache: Arc<dyn CacheStore>,
        sensors: Arc<SensorList>,
    ) -> Self {
        AppState {
            store,
            cache,
            sensors,
        }
    }
}

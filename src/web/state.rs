use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::services::presence_publisher::{PresencePublisher, PublishPolicy};
use crate::services::presence_store::PresenceStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: PresenceStore,
    pub publisher: PresencePublisher,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let store = PresenceStore::new(pool.clone(), config.presence.default_radius_meters);
        let publisher = PresencePublisher::new(store.clone(), PublishPolicy::from(&config.presence));
        Self {
            pool,
            store,
            publisher,
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

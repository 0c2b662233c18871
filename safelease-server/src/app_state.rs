use std::sync::Arc;

use crate::realtime::RealtimeHub;

/// Shared by every route and the realtime endpoint.
#[derive(Debug, Clone)]
pub struct AppState {
    pub(crate) pool: Option<sqlx::PgPool>,
    pub(crate) hub: Arc<RealtimeHub>,
}

impl AppState {
    #[must_use]
    pub fn new(hub: Arc<RealtimeHub>, pool: Option<sqlx::PgPool>) -> Self {
        Self { pool, hub }
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }
}

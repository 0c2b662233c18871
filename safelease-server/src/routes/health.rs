use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use tracing::warn;

use crate::{app_state::AppState, db::bootstrap};

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    store: &'a str,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            store: store_kind(&state),
        }),
    )
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = store_kind(&state);
    let schema_ready = match state.pool.as_ref() {
        Some(pool) => bootstrap::ensure_readiness(pool).await.is_ok(),
        None => true,
    };
    let ready = schema_ready && state.hub.store().ping().await.is_ok();

    let status = if ready { "ok" } else { "error" };
    metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => status)
        .increment(1);

    if ready {
        (StatusCode::OK, Json(HealthResponse { status: "ready", store }))
    } else {
        warn!(store, "readiness probe failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                store,
            }),
        )
    }
}

fn store_kind(state: &AppState) -> &'static str {
    if state.pool.is_some() {
        "postgres"
    } else {
        "memory"
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::JwtVerifier,
        realtime::RealtimeHub,
        services::{InMemoryMessageStore, InMemoryUserDirectory},
    };
    use axum::{body::Body, http::Request};
    use shared::config::server::ChatConfig;
    use tower::ServiceExt;

    fn state(store: Arc<InMemoryMessageStore>) -> Arc<AppState> {
        let hub = RealtimeHub::new(
            store,
            Arc::new(InMemoryUserDirectory::open()),
            Arc::new(JwtVerifier::new("secret", 0)),
            ChatConfig::default(),
        );
        Arc::new(AppState::new(Arc::new(hub), None))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = create_health_router().with_state(state(Arc::new(InMemoryMessageStore::new())));
        assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_follows_store_availability() {
        let store = Arc::new(InMemoryMessageStore::new());
        let app = create_health_router().with_state(state(store.clone()));
        assert_eq!(get_status(app.clone(), "/readyz").await, StatusCode::OK);

        store.set_offline(true);
        assert_eq!(
            get_status(app, "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

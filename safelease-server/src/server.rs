use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use shared::config::server::{Config, DatabaseConfig, LogFormat};

use crate::{
    app_state::AppState,
    auth::JwtVerifier,
    db::bootstrap,
    handlers::realtime::realtime_upgrade,
    middleware::request_context::{self, RequestIdState},
    realtime::RealtimeHub,
    routes,
    services::{
        InMemoryMessageStore, InMemoryUserDirectory, MessageStore, PgMessageStore,
        PgUserDirectory, UserDirectory,
    },
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder on first use and returns its handle.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("a global metrics recorder was already installed");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the global tracing subscriber; later calls are no-ops.
pub fn initialize_tracing(config: &Config) -> String {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Connects to Postgres, applying the configured statement timeout to every
/// pooled connection.
///
/// # Errors
/// Returns an error if the pool cannot be created.
pub async fn create_database_pool(
    db: &DatabaseConfig,
    url: &str,
) -> Result<sqlx::PgPool, sqlx::Error> {
    let timeout_ms = db.statement_timeout_ms;
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                let statement = format!("SET statement_timeout = {timeout_ms}");
                sqlx::query(&statement).execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Builds the hub over Postgres when a pool is given, in-memory otherwise.
pub fn create_hub(config: &Config, pool: Option<sqlx::PgPool>) -> Arc<RealtimeHub> {
    let (store, directory): (Arc<dyn MessageStore>, Arc<dyn UserDirectory>) = match pool {
        Some(pool) => (
            Arc::new(PgMessageStore::new(pool.clone())),
            Arc::new(PgUserDirectory::new(pool)),
        ),
        None => (
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(InMemoryUserDirectory::open()),
        ),
    };

    Arc::new(RealtimeHub::new(
        store,
        directory,
        Arc::new(JwtVerifier::from_config(&config.auth)),
        config.chat.clone(),
    ))
}

pub fn create_app_state(config: &Config, pool: Option<sqlx::PgPool>) -> Arc<AppState> {
    let hub = create_hub(config, pool.clone());
    Arc::new(AppState::new(hub, pool))
}

/// Any origin when none are configured; credentials only for an explicit
/// origin list.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins = config
        .server
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    cors.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(config.server.cors.allow_credentials)
}

pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(routes::conversations::create_router_conversations(state))
        .merge(routes::openapi::openapi_routes())
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .route(&config.server.realtime_path, get(realtime_upgrade))
        .nest("/api", create_api_router(Arc::clone(&state)))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(create_cors_layer(&config))
        .layer(tracer::create_trace_layer())
        .layer(from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves on Ctrl+C. If the handler cannot be installed the server keeps
/// running until killed.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the chat server with a fully resolved configuration.
///
/// # Errors
/// Returns an error if the database cannot be prepared or the listener
/// cannot be bound.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let pool = match config.db.url.as_deref() {
        Some(url) => {
            let pool = create_database_pool(&config.db, url)
                .await
                .context("failed to connect to the database")?;
            bootstrap::ensure_liveness(&pool)
                .await
                .context("database liveness check failed")?;
            bootstrap::run(&pool, &config.db)
                .await
                .context("database bootstrap failed")?;
            bootstrap::ensure_readiness(&pool)
                .await
                .context("database readiness check failed")?;
            Some(pool)
        }
        None => {
            warn!("no database configured; messages are kept in memory");
            None
        }
    };

    let state = create_app_state(&config, pool);
    let hub = Arc::clone(state.hub());
    let app = create_app_router(state, Arc::clone(&config), metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!(
        addr = %listener.local_addr()?,
        realtime_path = %config.server.realtime_path,
        "Listening"
    );

    serve(listener, app)
        .with_graceful_shutdown(async move {
            create_shutdown_signal().await;
            hub.shutdown();
        })
        .await?;

    Ok(())
}

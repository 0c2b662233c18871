use std::sync::Arc;

use axum::{Router, middleware, routing::get};

use crate::{
    app_state::AppState,
    handlers::conversations::{conversation_history, conversation_with},
    middleware::auth::require_bearer,
};

/// Bearer-protected conversation routes, mounted under `/api`.
pub fn create_router_conversations(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations/with/{peer}", get(conversation_with))
        .route(
            "/conversations/{conversation}/messages",
            get(conversation_history),
        )
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

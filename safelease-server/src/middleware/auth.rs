use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{
    app_state::AppState,
    auth::bearer_token,
    http::error::ApiError,
    middleware::request_context::RequestContext,
};

/// Requires `Authorization: Bearer <jwt>` naming a known user.
///
/// The resolved [`shared::models::SenderSummary`] is stored as a request
/// extension and on the [`RequestContext`].
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned);

    let user = state.hub.authenticate(token.as_deref()).await?;
    debug!(user_id = %user.id, path = %req.uri().path(), "bearer authenticated");

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.user = Some(user.clone());
    } else {
        req.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            user: Some(user.clone()),
        });
    }
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::instrument;

use shared::models::{
    ConversationHistoryResponse, ConversationKey, ConversationKeyResponse, SenderSummary,
};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};

/// Derive the conversation key shared by the caller and `peer`.
#[utoipa::path(
    get,
    path = "/api/conversations/with/{peer}",
    params(("peer" = String, Path, description = "User id of the other participant")),
    responses(
        (status = 200, description = "Conversation key", body = ConversationKeyResponse),
        (status = 400, description = "Invalid participant"),
        (status = 401, description = "Missing or invalid credential")
    ),
    tag = "Conversations"
)]
#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn conversation_with(
    Extension(user): Extension<SenderSummary>,
    Path(peer): Path<String>,
) -> AppResult<Json<ConversationKeyResponse>> {
    let conversation = ConversationKey::derive(&user.id, &peer)?;
    Ok(Json(ConversationKeyResponse {
        conversation,
        peer: peer.trim().to_string(),
    }))
}

/// Full ordered history of a conversation the caller takes part in.
#[utoipa::path(
    get,
    path = "/api/conversations/{conversation}/messages",
    params(("conversation" = String, Path, description = "Conversation key")),
    responses(
        (status = 200, description = "Ordered history", body = ConversationHistoryResponse),
        (status = 400, description = "Malformed conversation key"),
        (status = 401, description = "Missing or invalid credential"),
        (status = 403, description = "Caller is not a participant"),
        (status = 503, description = "Message store unavailable")
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn conversation_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SenderSummary>,
    Path(conversation): Path<String>,
) -> AppResult<Json<ConversationHistoryResponse>> {
    let conversation = ConversationKey::parse(&conversation)?;
    if !conversation.includes(&user.id) {
        return Err(ApiError::forbidden(format!(
            "user {} is not a participant of {conversation}",
            user.id
        )));
    }

    let messages = state.hub.history(&conversation).await?;
    Ok(Json(ConversationHistoryResponse {
        conversation,
        messages,
    }))
}

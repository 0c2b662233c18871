#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    ChatMessage, ConversationHistoryResponse, ConversationKey, ConversationKeyResponse,
    ErrorCode, FailureKind, SenderSummary, Timestamp,
};
use utoipa::OpenApi;

#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "SafeLease Chat API",
        version = "1.0.0",
        description = "Conversation history and key derivation for SafeLease realtime chat. Live traffic uses the WebSocket endpoint."
    ),
    paths(
        crate::handlers::conversations::conversation_with,
        crate::handlers::conversations::conversation_history,
    ),
    components(
        schemas(
            ChatMessage,
            ConversationHistoryResponse,
            ConversationKey,
            ConversationKeyResponse,
            ErrorCode,
            FailureKind,
            SenderSummary,
            Timestamp,
        )
    ),
    tags(
        (name = "Conversations", description = "Two-party conversation history")
    )
)]
pub struct ApiDoc;

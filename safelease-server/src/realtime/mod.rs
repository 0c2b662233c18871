//! Realtime chat sessions: authentication, room membership, and fan-out.

pub mod rooms;
pub mod session;

use thiserror::Error;

use shared::models::{ConversationKey, ConversationKeyError, ErrorCode};

use crate::services::StoreError;

pub use rooms::{ConnectionId, Outbound, QueueError, RoomRegistry};
pub use session::{ConnectionSession, RealtimeHub, SessionState};

/// Non-fatal failure of a single client operation.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("connection is not authenticated")]
    Unauthenticated,
    #[error("message content is empty")]
    EmptyContent,
    #[error("message exceeds {max} characters")]
    ContentTooLong { max: usize },
    #[error("user {user} is not a participant of {conversation}")]
    NotAParticipant {
        user: String,
        conversation: ConversationKey,
    },
    #[error("invalid conversation: {0}")]
    InvalidConversation(#[source] ConversationKeyError),
    #[error("join {0} before sending to it")]
    NotJoined(ConversationKey),
    #[error("message could not be stored: {0}")]
    PersistenceFailed(#[source] StoreError),
    #[error("history could not be loaded: {0}")]
    HistoryUnavailable(#[source] StoreError),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl RealtimeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::EmptyContent => ErrorCode::EmptyContent,
            Self::ContentTooLong { .. } => ErrorCode::ContentTooLong,
            Self::NotAParticipant { .. } => ErrorCode::NotAParticipant,
            Self::InvalidConversation(_) => ErrorCode::InvalidParticipant,
            Self::NotJoined(_) => ErrorCode::NotJoined,
            Self::PersistenceFailed(_) => ErrorCode::PersistenceFailed,
            Self::HistoryUnavailable(_) => ErrorCode::HistoryUnavailable,
            Self::MalformedFrame(_) => ErrorCode::MalformedFrame,
        }
    }
}

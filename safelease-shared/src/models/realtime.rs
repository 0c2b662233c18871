//! Frames exchanged over the realtime chat socket.
//!
//! Every frame is a JSON text message tagged by `type`.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ChatMessage, ConversationKey, SenderSummary};

/// Frames a client may send once its connection is authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Enter a conversation room, leaving any room joined before.
    Join { conversation: ConversationKey },
    /// Append a message to the conversation the connection has joined.
    Send {
        conversation: ConversationKey,
        content: String,
    },
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Credential check failed; the server closes the socket right after.
    AuthenticationFailed { reason: String },
    /// Credential accepted; carries the identity the server resolved.
    SessionReady { user: SenderSummary },
    /// Full ordered log for a freshly joined conversation, sent to the joiner only.
    History {
        conversation: ConversationKey,
        messages: Vec<ChatMessage>,
    },
    /// A message persisted in a room this connection belongs to.
    MessageAppended { message: ChatMessage },
    /// An operation from this connection was rejected; the socket stays open.
    OperationFailed {
        kind: FailureKind,
        code: ErrorCode,
        reason: String,
    },
}

/// Broad failure class reported with `operation_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    Validation,
    Persistence,
    Protocol,
}

/// Machine readable failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingCredential,
    InvalidCredential,
    ExpiredCredential,
    UnknownUser,
    Unauthenticated,
    EmptyContent,
    ContentTooLong,
    InvalidParticipant,
    NotAParticipant,
    PersistenceFailed,
    HistoryUnavailable,
    NotJoined,
    MalformedFrame,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::ExpiredCredential => "expired_credential",
            Self::UnknownUser => "unknown_user",
            Self::Unauthenticated => "unauthenticated",
            Self::EmptyContent => "empty_content",
            Self::ContentTooLong => "content_too_long",
            Self::InvalidParticipant => "invalid_participant",
            Self::NotAParticipant => "not_a_participant",
            Self::PersistenceFailed => "persistence_failed",
            Self::HistoryUnavailable => "history_unavailable",
            Self::NotJoined => "not_joined",
            Self::MalformedFrame => "malformed_frame",
        }
    }

    #[must_use]
    pub const fn kind(self) -> FailureKind {
        match self {
            Self::MissingCredential
            | Self::InvalidCredential
            | Self::ExpiredCredential
            | Self::UnknownUser
            | Self::Unauthenticated => FailureKind::Authentication,
            Self::EmptyContent
            | Self::ContentTooLong
            | Self::InvalidParticipant
            | Self::NotAParticipant => FailureKind::Validation,
            Self::PersistenceFailed | Self::HistoryUnavailable => FailureKind::Persistence,
            Self::NotJoined | Self::MalformedFrame => FailureKind::Protocol,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerFrame {
    #[must_use]
    pub fn failure(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            kind: code.kind(),
            code,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_parse_from_tagged_json() {
        let join: ClientFrame =
            serde_json::from_value(json!({ "type": "join", "conversation": "u1_u2" })).unwrap();
        assert_eq!(
            join,
            ClientFrame::Join {
                conversation: ConversationKey::derive("u2", "u1").unwrap()
            }
        );

        let send: ClientFrame = serde_json::from_value(
            json!({ "type": "send", "conversation": "u1_u2", "content": "hi" }),
        )
        .unwrap();
        assert!(matches!(send, ClientFrame::Send { content, .. } if content == "hi"));
    }

    #[test]
    fn client_frame_with_bad_key_is_rejected() {
        let result = serde_json::from_value::<ClientFrame>(
            json!({ "type": "join", "conversation": "not-a-pair" }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn failure_frame_carries_kind_and_code() {
        let frame = ServerFrame::failure(ErrorCode::EmptyContent, "message is empty");
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["type"], "operation_failed");
        assert_eq!(value["kind"], "validation");
        assert_eq!(value["code"], "empty_content");
    }

    #[test]
    fn error_codes_map_to_taxonomy() {
        assert_eq!(ErrorCode::ExpiredCredential.kind(), FailureKind::Authentication);
        assert_eq!(ErrorCode::InvalidParticipant.kind(), FailureKind::Validation);
        assert_eq!(ErrorCode::HistoryUnavailable.kind(), FailureKind::Persistence);
        assert_eq!(ErrorCode::NotJoined.kind(), FailureKind::Protocol);
        assert_eq!(ErrorCode::NotJoined.to_string(), "not_joined");
    }
}

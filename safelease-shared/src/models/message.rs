use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ConversationKey, Timestamp};

/// Store-assigned message identifier, strictly increasing in append order.
pub type MessageId = i64;

/// Sender identity resolved by the server from the authenticated user.
///
/// Clients never supply these fields; the server builds the summary once per
/// connection from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct SenderSummary {
    /// Opaque user identifier.
    pub id: String,
    /// Name shown next to the message.
    pub display_name: String,
}

impl SenderSummary {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Placeholder for a sender the directory no longer knows about.
    #[must_use]
    pub fn unknown(id: impl Into<String>) -> Self {
        Self::new(id, "Unknown user")
    }
}

/// A persisted message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation: ConversationKey,
    pub sender: SenderSummary,
    pub content: String,
    pub timestamp: Timestamp,
}

/// Response body for the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConversationHistoryResponse {
    pub conversation: ConversationKey,
    pub messages: Vec<ChatMessage>,
}

/// Response body for the key derivation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConversationKeyResponse {
    pub conversation: ConversationKey,
    pub peer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn chat_message_wire_shape() {
        let message = ChatMessage {
            id: 7,
            conversation: ConversationKey::derive("u1", "u2").unwrap(),
            sender: SenderSummary::new("u1", "Ada Lessor"),
            content: "hello".into(),
            timestamp: Timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["conversation"], "u1_u2");
        assert_eq!(value["sender"]["id"], "u1");
        assert_eq!(value["sender"]["display_name"], "Ada Lessor");
        assert_eq!(value["timestamp"], "2025-06-01T09:00:00Z");
    }

    #[test]
    fn unknown_sender_keeps_identifier() {
        let sender = SenderSummary::unknown("gone");
        assert_eq!(sender.id, "gone");
        assert_eq!(sender.display_name, "Unknown user");
    }
}

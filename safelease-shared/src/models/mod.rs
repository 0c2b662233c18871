pub mod conversation;
pub mod message;
pub mod realtime;
pub mod timestamp;

pub use conversation::{ConversationKey, ConversationKeyError, KEY_SEPARATOR};
pub use message::{
    ChatMessage, ConversationHistoryResponse, ConversationKeyResponse, MessageId, SenderSummary,
};
pub use realtime::{ClientFrame, ErrorCode, FailureKind, ServerFrame};
pub use timestamp::Timestamp;

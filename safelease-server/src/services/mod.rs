//! Storage-facing services: the append-only message log and the user directory.

pub mod message_store;
pub mod user_directory;

use thiserror::Error;

pub use message_store::{InMemoryMessageStore, MessageStore, PgMessageStore, StoredMessage};
pub use user_directory::{InMemoryUserDirectory, PgUserDirectory, UserDirectory};

/// Failure of a backing store. Always retryable from the caller's view.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

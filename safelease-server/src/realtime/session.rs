use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use shared::{
    config::server::ChatConfig,
    models::{
        ChatMessage, ClientFrame, ConversationKey, ConversationKeyError, SenderSummary, ServerFrame,
    },
};

use super::{
    RealtimeError,
    rooms::{ConnectionId, Outbound, RoomRegistry},
};
use crate::{
    auth::{AuthError, CredentialVerifier},
    services::{MessageStore, StoreError, StoredMessage, UserDirectory},
};

/// Process-wide owner of rooms and the collaborators every connection uses.
pub struct RealtimeHub {
    rooms: RoomRegistry,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
    verifier: Arc<dyn CredentialVerifier>,
    limits: ChatConfig,
    next_connection: AtomicU64,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("rooms", &self.rooms.room_count())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RealtimeHub {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        limits: ChatConfig,
    ) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            store,
            directory,
            verifier,
            limits,
            next_connection: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolves a credential to the sender summary of an existing user.
    ///
    /// # Errors
    /// Returns [`AuthError`] when the credential is absent, invalid, expired,
    /// or names an unknown user.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<SenderSummary, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingCredential)?;
        let user_id = self.verifier.resolve_credential(token).await?;
        self.directory
            .resolve_user(&user_id)
            .await
            .map_err(AuthError::DirectoryUnavailable)?
            .ok_or(AuthError::UnknownUser(user_id))
    }

    /// Authenticates a new connection and hands back its session and queue.
    ///
    /// The queue already holds `session_ready` when this returns. The
    /// session's [`closed_signal`](ConnectionSession::closed_signal) fires on
    /// server shutdown, on disconnect, and when the queue overflows.
    ///
    /// # Errors
    /// Returns [`AuthError`]; no session exists in that case.
    pub async fn connect(
        self: &Arc<Self>,
        credential: Option<&str>,
    ) -> Result<(ConnectionSession, Receiver<ServerFrame>), AuthError> {
        let user = match self.authenticate(credential).await {
            Ok(user) => user,
            Err(err) => {
                metrics::counter!("realtime_auth_failures_total", "code" => err.code())
                    .increment(1);
                warn!(code = err.code(), error = %err, "realtime authentication failed");
                return Err(err);
            }
        };

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (outbound, receiver) =
            Outbound::channel(self.limits.outbound_queue_capacity, self.shutdown.child_token());
        let _ = outbound.push(ServerFrame::SessionReady { user: user.clone() });

        metrics::counter!("realtime_connections_total").increment(1);
        metrics::gauge!("realtime_active_connections").increment(1.0);
        info!(connection_id = id, user_id = %user.id, "realtime connection authenticated");

        let session = ConnectionSession {
            hub: Arc::clone(self),
            id,
            user,
            outbound,
            state: SessionState::Authenticated,
        };
        Ok((session, receiver))
    }

    /// Full history of a conversation with senders resolved.
    ///
    /// # Errors
    /// Returns [`StoreError`] when either the log or the directory fails.
    pub async fn history(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>, StoreError> {
        let stored = self.store.list_by_conversation(key).await?;
        let mut senders: std::collections::HashMap<String, SenderSummary> =
            std::collections::HashMap::new();
        let mut messages = Vec::with_capacity(stored.len());

        for row in stored {
            let sender = if let Some(known) = senders.get(&row.sender_id) {
                known.clone()
            } else {
                let resolved = self
                    .directory
                    .resolve_user(&row.sender_id)
                    .await?
                    .unwrap_or_else(|| SenderSummary::unknown(&row.sender_id));
                senders.insert(row.sender_id.clone(), resolved.clone());
                resolved
            };
            messages.push(resolve(row, sender));
        }

        Ok(messages)
    }
}

/// The key error of a `join`/`send` frame that is otherwise well formed.
fn invalid_key(text: &str) -> Option<ConversationKeyError> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if !matches!(
        value.get("type").and_then(serde_json::Value::as_str),
        Some("join" | "send")
    ) {
        return None;
    }
    let raw = value.get("conversation")?.as_str()?;
    ConversationKey::parse(raw).err()
}

fn resolve(row: StoredMessage, sender: SenderSummary) -> ChatMessage {
    ChatMessage {
        id: row.id,
        conversation: row.conversation,
        sender,
        content: row.content,
        timestamp: row.timestamp,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    InRoom(ConversationKey),
    Closed,
}

/// Server-side state of one authenticated connection.
///
/// Dropping the session removes its room membership.
pub struct ConnectionSession {
    hub: Arc<RealtimeHub>,
    id: ConnectionId,
    user: SenderSummary,
    outbound: Outbound,
    state: SessionState,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("user", &self.user.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn user(&self) -> &SenderSummary {
        &self.user
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Cancelled when this connection must stop serving.
    #[must_use]
    pub fn closed_signal(&self) -> CancellationToken {
        self.outbound.closed().clone()
    }

    /// Parses a text frame and dispatches it.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => self.handle(frame).await,
            Err(err) => {
                let error = invalid_key(text).map_or_else(
                    || RealtimeError::MalformedFrame(err.to_string()),
                    RealtimeError::InvalidConversation,
                );
                self.report(&error);
            }
        }
    }

    /// Runs one client operation; failures go back to this connection only.
    pub async fn handle(&mut self, frame: ClientFrame) {
        let result = match frame {
            ClientFrame::Join { conversation } => self.join(conversation).await,
            ClientFrame::Send {
                conversation,
                content,
            } => self.send(&conversation, &content).await,
        };

        if let Err(err) = result {
            self.report(&err);
        }
    }

    #[instrument(skip(self), fields(connection_id = self.id, user_id = %self.user.id))]
    async fn join(&mut self, key: ConversationKey) -> Result<(), RealtimeError> {
        if self.state == SessionState::Closed {
            return Err(RealtimeError::Unauthenticated);
        }
        if self.hub.limits.enforce_participants && !key.includes(&self.user.id) {
            return Err(RealtimeError::NotAParticipant {
                user: self.user.id.clone(),
                conversation: key,
            });
        }

        self.leave_room();

        let hub = Arc::clone(&self.hub);
        let gate = hub.rooms.acquire_gate(&key).await;
        hub.rooms.join(&key, self.id, self.outbound.clone());

        let result = match hub.history(&key).await {
            Ok(messages) => {
                debug!(count = messages.len(), "replaying history");
                self.deliver(ServerFrame::History {
                    conversation: key.clone(),
                    messages,
                });
                self.state = SessionState::InRoom(key.clone());
                info!(conversation = %key, "joined conversation");
                Ok(())
            }
            Err(err) => {
                hub.rooms.leave(&key, self.id);
                Err(RealtimeError::HistoryUnavailable(err))
            }
        };

        drop(gate);
        hub.rooms.prune(&key);
        result
    }

    #[instrument(skip(self, content), fields(connection_id = self.id, user_id = %self.user.id))]
    async fn send(&mut self, key: &ConversationKey, content: &str) -> Result<(), RealtimeError> {
        if self.state == SessionState::Closed {
            return Err(RealtimeError::Unauthenticated);
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(RealtimeError::EmptyContent);
        }
        let max = self.hub.limits.max_message_length;
        if content.chars().count() > max {
            return Err(RealtimeError::ContentTooLong { max });
        }
        if self.state != SessionState::InRoom(key.clone()) {
            return Err(RealtimeError::NotJoined(key.clone()));
        }

        let hub = Arc::clone(&self.hub);
        let gate = hub.rooms.acquire_gate(key).await;
        let result = match hub.store.append(key, &self.user.id, content).await {
            Ok(stored) => {
                metrics::counter!("chat_messages_persisted_total").increment(1);
                let message = resolve(stored, self.user.clone());
                let message_id = message.id;
                let delivered = hub
                    .rooms
                    .broadcast(key, &ServerFrame::MessageAppended { message });
                metrics::counter!("realtime_broadcast_deliveries_total")
                    .increment(delivered as u64);
                debug!(conversation = %key, message_id, delivered, "message broadcast");
                Ok(())
            }
            Err(err) => Err(RealtimeError::PersistenceFailed(err)),
        };
        drop(gate);
        hub.rooms.prune(key);
        result
    }

    fn report(&self, err: &RealtimeError) {
        let code = err.code();
        metrics::counter!("realtime_operation_failures_total", "code" => code.as_str())
            .increment(1);
        warn!(connection_id = self.id, user_id = %self.user.id, code = %code, error = %err, "operation failed");
        self.deliver(ServerFrame::failure(code, err.to_string()));
    }

    fn deliver(&self, frame: ServerFrame) {
        if let Err(err) = self.outbound.push(frame) {
            warn!(connection_id = self.id, error = %err, "frame not delivered, closing connection");
        }
    }

    fn leave_room(&mut self) {
        if let SessionState::InRoom(key) = &self.state {
            self.hub.rooms.leave(key, self.id);
            debug!(connection_id = self.id, conversation = %key, "left conversation");
        }
        self.state = SessionState::Authenticated;
    }

    /// Removes membership and marks the session closed. Idempotent.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.leave_room();
        self.state = SessionState::Closed;
        self.outbound.closed().cancel();
        metrics::gauge!("realtime_active_connections").decrement(1.0);
        info!(connection_id = self.id, user_id = %self.user.id, "realtime connection closed");
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

//! Transport-agnostic controller for one chat view.
//!
//! The controller owns the conversation state for a single local user and
//! peer. Hosts feed it inputs (credential changes, socket events, user
//! actions) and execute the [`ClientCommand`]s it returns; it never touches a
//! socket itself, so the same logic drives the terminal client and browser
//! views.

use thiserror::Error;
use tracing::debug;

use crate::models::{
    ChatMessage, ClientFrame, ConversationKey, ConversationKeyError, ErrorCode, ServerFrame,
};

/// Lifecycle of the view's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// Inputs incomplete or view unmounted; no connection held.
    Idle,
    /// Open requested, waiting for the transport.
    Connecting,
    /// Transport open, waiting for the server to confirm the session.
    Connected,
    /// Join sent, waiting for history.
    Joining,
    /// History received; live messages flow and sends are allowed.
    Live,
    /// Connection gone and no automatic reconnect remains.
    Closed,
}

/// Who ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOrigin {
    /// The server closed the socket.
    Server,
    /// The transport failed underneath us.
    Transport,
}

/// Side effects the host must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Open a connection authenticated with `credential`.
    Open { credential: String },
    /// Close the current connection and drop its subscriptions.
    Close,
    /// Write a frame to the open connection.
    Transmit(ClientFrame),
    /// Show a transient notification.
    Notify(Notice),
}

/// User-visible transient notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    AuthenticationFailed(String),
    OperationFailed { code: ErrorCode, reason: String },
    InvalidConversation(String),
    Reconnecting,
    ConnectionLost,
}

/// Why a send was not issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendBlocked {
    #[error("message is empty")]
    EmptyInput,
    #[error("not connected to the conversation")]
    NotConnected,
    #[error("conversation is not resolved yet")]
    NoConversation,
}

#[derive(Debug)]
pub struct ChatController {
    credential: Option<String>,
    peer: Option<String>,
    local_user: Option<String>,
    mounted: bool,
    phase: ClientPhase,
    key: Option<ConversationKey>,
    messages: Vec<ChatMessage>,
    reconnect_available: bool,
    auth_rejected: bool,
}

impl Default for ChatController {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            credential: None,
            peer: None,
            local_user: None,
            mounted: false,
            phase: ClientPhase::Idle,
            key: None,
            messages: Vec::new(),
            reconnect_available: true,
            auth_rejected: false,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    #[must_use]
    pub fn conversation(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    /// History followed by live messages, in server order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn local_user(&self) -> Option<&str> {
        self.local_user.as_deref()
    }

    pub fn mount(&mut self) -> Vec<ClientCommand> {
        self.mounted = true;
        self.reconcile()
    }

    pub fn unmount(&mut self) -> Vec<ClientCommand> {
        self.mounted = false;
        self.reconcile()
    }

    pub fn set_credential(&mut self, credential: Option<String>) -> Vec<ClientCommand> {
        let credential = credential.filter(|value| !value.trim().is_empty());
        if credential == self.credential {
            return Vec::new();
        }
        let mut commands = self.teardown();
        self.credential = credential;
        self.auth_rejected = false;
        self.reconnect_available = true;
        commands.extend(self.reconcile());
        commands
    }

    pub fn set_peer(&mut self, peer: Option<String>) -> Vec<ClientCommand> {
        let peer = peer.filter(|value| !value.trim().is_empty());
        if peer == self.peer {
            return Vec::new();
        }
        let mut commands = self.teardown();
        self.peer = peer;
        self.key = None;
        self.reconnect_available = true;
        commands.extend(self.reconcile());
        commands
    }

    /// Pins the local user; otherwise it is learned from the session.
    pub fn set_local_user(&mut self, user: Option<String>) -> Vec<ClientCommand> {
        let user = user.filter(|value| !value.trim().is_empty());
        if user == self.local_user {
            return Vec::new();
        }
        let mut commands = self.teardown();
        self.local_user = user;
        self.key = None;
        commands.extend(self.reconcile());
        commands
    }

    pub fn on_open(&mut self) -> Vec<ClientCommand> {
        if self.phase == ClientPhase::Connecting {
            self.phase = ClientPhase::Connected;
        }
        Vec::new()
    }

    pub fn on_frame(&mut self, frame: ServerFrame) -> Vec<ClientCommand> {
        match frame {
            ServerFrame::SessionReady { user } => {
                if self.phase != ClientPhase::Connected {
                    return Vec::new();
                }
                if self.local_user.is_none() {
                    self.local_user = Some(user.id);
                }
                self.join()
            }
            ServerFrame::History {
                conversation,
                messages,
            } => {
                if self.key.as_ref() != Some(&conversation) {
                    return Vec::new();
                }
                debug!(conversation = %conversation, count = messages.len(), "history received");
                self.messages = messages;
                self.phase = ClientPhase::Live;
                self.reconnect_available = true;
                Vec::new()
            }
            ServerFrame::MessageAppended { message } => {
                if self.key.as_ref() == Some(&message.conversation)
                    && !self.messages.iter().any(|known| known.id == message.id)
                {
                    self.messages.push(message);
                }
                Vec::new()
            }
            ServerFrame::OperationFailed { code, reason, .. } => {
                if code == ErrorCode::HistoryUnavailable && self.phase == ClientPhase::Joining {
                    self.phase = ClientPhase::Connected;
                }
                vec![ClientCommand::Notify(Notice::OperationFailed { code, reason })]
            }
            ServerFrame::AuthenticationFailed { reason } => {
                self.auth_rejected = true;
                self.phase = ClientPhase::Closed;
                vec![
                    ClientCommand::Notify(Notice::AuthenticationFailed(reason)),
                    ClientCommand::Close,
                ]
            }
        }
    }

    /// Retries the join after a `history_unavailable` failure.
    pub fn rejoin(&mut self) -> Vec<ClientCommand> {
        if self.phase == ClientPhase::Connected && self.local_user.is_some() {
            self.join()
        } else {
            Vec::new()
        }
    }

    /// Handles a close the client did not ask for.
    pub fn on_closed(&mut self, origin: CloseOrigin) -> Vec<ClientCommand> {
        match self.phase {
            ClientPhase::Idle | ClientPhase::Closed => return Vec::new(),
            _ => {}
        }

        debug!(?origin, phase = ?self.phase, "connection closed by remote");
        if self.auth_rejected || !self.reconnect_available {
            self.phase = ClientPhase::Closed;
            return vec![ClientCommand::Notify(Notice::ConnectionLost)];
        }

        self.reconnect_available = false;
        match self.credential.clone() {
            Some(credential) if self.mounted && self.peer.is_some() => {
                self.phase = ClientPhase::Connecting;
                vec![
                    ClientCommand::Notify(Notice::Reconnecting),
                    ClientCommand::Open { credential },
                ]
            }
            _ => {
                self.phase = ClientPhase::Closed;
                vec![ClientCommand::Notify(Notice::ConnectionLost)]
            }
        }
    }

    /// Builds the frame for an outgoing message. Nothing is appended locally;
    /// the message shows up once the server broadcasts it back.
    ///
    /// # Errors
    /// Returns [`SendBlocked`] when the input is blank, the view is not live,
    /// or the conversation is unresolved.
    pub fn compose(&self, input: &str) -> Result<ClientCommand, SendBlocked> {
        let content = input.trim();
        if content.is_empty() {
            return Err(SendBlocked::EmptyInput);
        }
        let conversation = self.key.clone().ok_or(SendBlocked::NoConversation)?;
        if self.phase != ClientPhase::Live {
            return Err(SendBlocked::NotConnected);
        }
        Ok(ClientCommand::Transmit(ClientFrame::Send {
            conversation,
            content: content.to_string(),
        }))
    }

    fn join(&mut self) -> Vec<ClientCommand> {
        let (Some(local), Some(peer)) = (self.local_user.as_deref(), self.peer.as_deref()) else {
            return Vec::new();
        };
        match ConversationKey::derive(local, peer) {
            Ok(key) => {
                self.key = Some(key.clone());
                self.phase = ClientPhase::Joining;
                vec![ClientCommand::Transmit(ClientFrame::Join { conversation: key })]
            }
            Err(err) => invalid_conversation(&err),
        }
    }

    fn ready(&self) -> bool {
        self.mounted && self.credential.is_some() && self.peer.is_some()
    }

    /// Client-initiated close: releases the connection and clears local state.
    fn teardown(&mut self) -> Vec<ClientCommand> {
        let held = !matches!(self.phase, ClientPhase::Idle | ClientPhase::Closed);
        self.phase = ClientPhase::Idle;
        self.messages.clear();
        if held {
            vec![ClientCommand::Close]
        } else {
            Vec::new()
        }
    }

    fn reconcile(&mut self) -> Vec<ClientCommand> {
        if !self.ready() {
            return self.teardown();
        }
        if self.phase != ClientPhase::Idle || self.auth_rejected {
            return Vec::new();
        }
        match self.credential.clone() {
            Some(credential) => {
                self.phase = ClientPhase::Connecting;
                vec![ClientCommand::Open { credential }]
            }
            None => Vec::new(),
        }
    }
}

fn invalid_conversation(err: &ConversationKeyError) -> Vec<ClientCommand> {
    vec![ClientCommand::Notify(Notice::InvalidConversation(
        err.to_string(),
    ))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SenderSummary, Timestamp};

    fn key() -> ConversationKey {
        ConversationKey::derive("u1", "u2").unwrap()
    }

    fn message(id: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            conversation: key(),
            sender: SenderSummary::new("u1", "Ada"),
            content: content.into(),
            timestamp: Timestamp::now(),
        }
    }

    fn live_controller() -> ChatController {
        let mut controller = ChatController::new();
        controller.set_credential(Some("token".into()));
        controller.set_peer(Some("u2".into()));
        controller.mount();
        controller.on_open();
        controller.on_frame(ServerFrame::SessionReady {
            user: SenderSummary::new("u1", "Ada"),
        });
        controller.on_frame(ServerFrame::History {
            conversation: key(),
            messages: vec![message(1, "hello")],
        });
        controller
    }

    #[test]
    fn opens_only_when_all_inputs_are_ready() {
        let mut controller = ChatController::new();
        assert!(controller.set_credential(Some("token".into())).is_empty());
        assert!(controller.mount().is_empty());

        let commands = controller.set_peer(Some("u2".into()));
        assert_eq!(
            commands,
            vec![ClientCommand::Open {
                credential: "token".into()
            }]
        );
        assert_eq!(controller.phase(), ClientPhase::Connecting);
    }

    #[test]
    fn joins_after_session_ready_with_derived_key() {
        let mut controller = ChatController::new();
        controller.set_credential(Some("token".into()));
        controller.set_peer(Some("u1".into()));
        controller.mount();
        controller.on_open();

        let commands = controller.on_frame(ServerFrame::SessionReady {
            user: SenderSummary::new("u2", "Bo"),
        });

        assert_eq!(
            commands,
            vec![ClientCommand::Transmit(ClientFrame::Join {
                conversation: key()
            })]
        );
        assert_eq!(controller.local_user(), Some("u2"));
        assert_eq!(controller.phase(), ClientPhase::Joining);
    }

    #[test]
    fn history_then_live_messages_render_in_order() {
        let mut controller = live_controller();
        controller.on_frame(ServerFrame::MessageAppended {
            message: message(2, "hi back"),
        });
        controller.on_frame(ServerFrame::MessageAppended {
            message: message(2, "hi back"),
        });

        let contents: Vec<_> = controller
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, ["hello", "hi back"]);
    }

    #[test]
    fn messages_for_other_conversations_are_ignored() {
        let mut controller = live_controller();
        let mut foreign = message(9, "elsewhere");
        foreign.conversation = ConversationKey::derive("u1", "u3").unwrap();

        controller.on_frame(ServerFrame::MessageAppended { message: foreign });
        assert_eq!(controller.messages().len(), 1);
    }

    #[test]
    fn compose_is_gated() {
        let mut controller = ChatController::new();
        assert_eq!(controller.compose("hi"), Err(SendBlocked::NoConversation));

        controller.set_credential(Some("token".into()));
        controller.set_peer(Some("u2".into()));
        controller.mount();
        controller.on_open();
        controller.on_frame(ServerFrame::SessionReady {
            user: SenderSummary::new("u1", "Ada"),
        });
        assert_eq!(controller.compose("hi"), Err(SendBlocked::NotConnected));

        let mut controller = live_controller();
        assert_eq!(controller.compose("   "), Err(SendBlocked::EmptyInput));
        assert_eq!(
            controller.compose("  hi  "),
            Ok(ClientCommand::Transmit(ClientFrame::Send {
                conversation: key(),
                content: "hi".into()
            }))
        );
        assert_eq!(controller.messages().len(), 1, "no optimistic echo");
        controller.unmount();
        assert_eq!(controller.compose("hi"), Err(SendBlocked::NotConnected));
    }

    #[test]
    fn unmount_and_credential_loss_close_and_clear() {
        let mut controller = live_controller();
        assert_eq!(controller.unmount(), vec![ClientCommand::Close]);
        assert!(controller.messages().is_empty());
        assert_eq!(controller.phase(), ClientPhase::Idle);
        assert!(controller.on_closed(CloseOrigin::Server).is_empty());

        let mut controller = live_controller();
        assert_eq!(controller.set_credential(None), vec![ClientCommand::Close]);
        assert!(controller.messages().is_empty());
        assert!(controller.on_closed(CloseOrigin::Server).is_empty(), "no reconnect");
    }

    #[test]
    fn switching_peer_reopens_connection() {
        let mut controller = live_controller();
        let commands = controller.set_peer(Some("u3".into()));

        assert_eq!(
            commands,
            vec![
                ClientCommand::Close,
                ClientCommand::Open {
                    credential: "token".into()
                }
            ]
        );
        assert!(controller.messages().is_empty());
        assert!(controller.conversation().is_none());
    }

    #[test]
    fn server_close_reconnects_exactly_once() {
        let mut controller = ChatController::new();
        controller.set_credential(Some("token".into()));
        controller.set_peer(Some("u2".into()));
        controller.mount();
        controller.on_open();

        let first = controller.on_closed(CloseOrigin::Server);
        assert_eq!(
            first,
            vec![
                ClientCommand::Notify(Notice::Reconnecting),
                ClientCommand::Open {
                    credential: "token".into()
                }
            ]
        );

        controller.on_open();
        let second = controller.on_closed(CloseOrigin::Transport);
        assert_eq!(second, vec![ClientCommand::Notify(Notice::ConnectionLost)]);
        assert_eq!(controller.phase(), ClientPhase::Closed);
    }

    #[test]
    fn successful_rejoin_restores_reconnect_allowance() {
        let mut controller = live_controller();
        assert!(matches!(
            controller.on_closed(CloseOrigin::Server).last(),
            Some(ClientCommand::Open { .. })
        ));

        controller.on_open();
        controller.on_frame(ServerFrame::SessionReady {
            user: SenderSummary::new("u1", "Ada"),
        });
        controller.on_frame(ServerFrame::History {
            conversation: key(),
            messages: vec![message(1, "hello"), message(2, "later")],
        });
        assert_eq!(controller.messages().len(), 2);
        assert!(matches!(
            controller.on_closed(CloseOrigin::Server).last(),
            Some(ClientCommand::Open { .. })
        ));
    }

    #[test]
    fn authentication_failure_never_reconnects() {
        let mut controller = ChatController::new();
        controller.set_credential(Some("expired".into()));
        controller.set_peer(Some("u2".into()));
        controller.mount();
        controller.on_open();

        let commands = controller.on_frame(ServerFrame::AuthenticationFailed {
            reason: "token expired".into(),
        });
        assert_eq!(
            commands,
            vec![
                ClientCommand::Notify(Notice::AuthenticationFailed("token expired".into())),
                ClientCommand::Close
            ]
        );
        assert!(controller.on_closed(CloseOrigin::Server).is_empty());
        assert_eq!(controller.phase(), ClientPhase::Closed);

        let retry = controller.set_credential(Some("fresh".into()));
        assert_eq!(
            retry,
            vec![ClientCommand::Open {
                credential: "fresh".into()
            }]
        );
    }

    #[test]
    fn failures_surface_as_notices_and_history_can_be_retried() {
        let mut controller = ChatController::new();
        controller.set_credential(Some("token".into()));
        controller.set_peer(Some("u2".into()));
        controller.mount();
        controller.on_open();
        controller.on_frame(ServerFrame::SessionReady {
            user: SenderSummary::new("u1", "Ada"),
        });

        let commands = controller.on_frame(ServerFrame::failure(
            ErrorCode::HistoryUnavailable,
            "store offline",
        ));
        assert_eq!(
            commands,
            vec![ClientCommand::Notify(Notice::OperationFailed {
                code: ErrorCode::HistoryUnavailable,
                reason: "store offline".into()
            })]
        );
        assert_eq!(controller.phase(), ClientPhase::Connected);
        assert_eq!(
            controller.rejoin(),
            vec![ClientCommand::Transmit(ClientFrame::Join {
                conversation: key()
            })]
        );
    }

    #[test]
    fn invalid_peer_is_reported_without_joining() {
        let mut controller = ChatController::new();
        controller.set_credential(Some("token".into()));
        controller.set_peer(Some("bad_peer".into()));
        controller.mount();
        controller.on_open();

        let commands = controller.on_frame(ServerFrame::SessionReady {
            user: SenderSummary::new("u1", "Ada"),
        });
        assert!(matches!(
            commands.as_slice(),
            [ClientCommand::Notify(Notice::InvalidConversation(_))]
        ));
        assert_eq!(controller.phase(), ClientPhase::Connected);
    }
}

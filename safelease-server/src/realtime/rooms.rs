//! Explicit conversation room membership.
//!
//! Each room maps connection ids to their outbound queues. Membership changes
//! and the fan-out of a broadcast both run under the registry lock, so a
//! broadcast never reaches a connection that already left and never misses
//! one that joined before it. Each room also carries an async send gate that
//! serializes persist-then-broadcast for that room only.
//!
//! Outbound queues are bounded. A member whose queue is full is treated like
//! a closed one: it is dropped from the room and its connection is signalled
//! to shut down.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard,
    mpsc::{self, Receiver, Sender, error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use shared::models::{ConversationKey, ServerFrame};

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// Sending half of one connection's frame queue, paired with the signal that
/// ends the connection.
#[derive(Debug, Clone)]
pub struct Outbound {
    queue: Sender<ServerFrame>,
    closed: CancellationToken,
}

impl Outbound {
    /// Creates a queue holding at most `capacity` frames (at least one).
    #[must_use]
    pub fn channel(capacity: usize, closed: CancellationToken) -> (Self, Receiver<ServerFrame>) {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        (Self { queue, closed }, receiver)
    }

    /// Queues `frame` without waiting. A full or closed queue cancels the
    /// connection.
    ///
    /// # Errors
    /// Returns [`QueueError`] when the frame was not queued.
    pub fn push(&self, frame: ServerFrame) -> Result<(), QueueError> {
        let result = match self.queue.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => QueueError::Full,
            Err(TrySendError::Closed(_)) => QueueError::Closed,
        };
        self.closed.cancel();
        Err(result)
    }

    /// Cancelled once the connection should stop.
    #[must_use]
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

#[derive(Debug, Default)]
struct Room {
    members: HashMap<ConnectionId, Outbound>,
    gate: Arc<AsyncMutex<()>>,
}

impl Room {
    fn is_idle(&self) -> bool {
        self.members.is_empty() && Arc::strong_count(&self.gate) == 1
    }
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<ConversationKey, Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationKey, Room>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock still holds valid membership.
        self.rooms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Waits for exclusive use of the room's send gate.
    pub async fn acquire_gate(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let gate = {
            let mut rooms = self.lock();
            Arc::clone(&rooms.entry(key.clone()).or_default().gate)
        };
        gate.lock_owned().await
    }

    pub fn join(&self, key: &ConversationKey, connection: ConnectionId, outbound: Outbound) {
        self.lock()
            .entry(key.clone())
            .or_default()
            .members
            .insert(connection, outbound);
    }

    pub fn leave(&self, key: &ConversationKey, connection: ConnectionId) {
        let mut rooms = self.lock();
        if let Some(room) = rooms.get_mut(key) {
            room.members.remove(&connection);
            if room.is_idle() {
                rooms.remove(key);
            }
        }
    }

    /// Drops the room entry once nobody is in it or waiting on its gate.
    pub fn prune(&self, key: &ConversationKey) {
        let mut rooms = self.lock();
        if rooms.get(key).is_some_and(Room::is_idle) {
            rooms.remove(key);
        }
    }

    /// Delivers `frame` to every current member; returns the delivery count.
    pub fn broadcast(&self, key: &ConversationKey, frame: &ServerFrame) -> usize {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(key) else {
            return 0;
        };

        let mut delivered = 0;
        room.members
            .retain(|connection, outbound| match outbound.push(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(err) => {
                    warn!(connection_id = *connection, conversation = %key, error = %err, "dropping member");
                    false
                }
            });
        delivered
    }

    #[must_use]
    pub fn members(&self, key: &ConversationKey) -> Vec<ConnectionId> {
        let mut members: Vec<_> = self
            .lock()
            .get(key)
            .map(|room| room.members.keys().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::SenderSummary;

    fn queue(capacity: usize) -> (Outbound, Receiver<ServerFrame>) {
        Outbound::channel(capacity, CancellationToken::new())
    }

    fn key(a: &str, b: &str) -> ConversationKey {
        ConversationKey::derive(a, b).unwrap()
    }

    fn ready(id: &str) -> ServerFrame {
        ServerFrame::SessionReady {
            user: SenderSummary::new(id, id),
        }
    }

    #[test]
    fn broadcast_reaches_only_room_members() {
        let rooms = RoomRegistry::new();
        let (x_tx, mut x_rx) = queue(8);
        let (y_tx, mut y_rx) = queue(8);
        let (z_tx, mut z_rx) = queue(8);
        rooms.join(&key("a", "b"), 1, x_tx);
        rooms.join(&key("a", "b"), 2, y_tx);
        rooms.join(&key("a", "c"), 3, z_tx);

        assert_eq!(rooms.broadcast(&key("a", "b"), &ready("a")), 2);

        assert!(x_rx.try_recv().is_ok());
        assert!(y_rx.try_recv().is_ok());
        assert!(z_rx.try_recv().is_err());
        assert!(x_rx.try_recv().is_err(), "delivered exactly once");
    }

    #[test]
    fn leave_removes_member_and_empty_room() {
        let rooms = RoomRegistry::new();
        let (tx, mut rx) = queue(8);
        rooms.join(&key("a", "b"), 1, tx);
        assert_eq!(rooms.members(&key("a", "b")), vec![1]);

        rooms.leave(&key("a", "b"), 1);

        assert!(rooms.members(&key("a", "b")).is_empty());
        assert_eq!(rooms.room_count(), 0);
        assert_eq!(rooms.broadcast(&key("a", "b"), &ready("a")), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_dropped_on_broadcast() {
        let rooms = RoomRegistry::new();
        let (tx, rx) = queue(8);
        rooms.join(&key("a", "b"), 1, tx);
        drop(rx);

        assert_eq!(rooms.broadcast(&key("a", "b"), &ready("a")), 0);
        assert!(rooms.members(&key("a", "b")).is_empty());
    }

    #[test]
    fn full_member_is_dropped_and_signalled_while_others_receive() {
        let rooms = RoomRegistry::new();
        let room = key("a", "b");
        let (x_tx, mut x_rx) = queue(8);
        let (y_tx, _y_rx) = queue(2);
        let y_closed = y_tx.closed().clone();
        rooms.join(&room, 1, x_tx);
        rooms.join(&room, 2, y_tx);

        assert_eq!(rooms.broadcast(&room, &ready("a")), 2);
        assert_eq!(rooms.broadcast(&room, &ready("a")), 2);
        assert!(!y_closed.is_cancelled());

        assert_eq!(rooms.broadcast(&room, &ready("a")), 1);
        assert_eq!(rooms.members(&room), vec![1]);
        assert!(y_closed.is_cancelled());

        assert_eq!(rooms.broadcast(&room, &ready("a")), 1);
        assert_eq!(std::iter::from_fn(|| x_rx.try_recv().ok()).count(), 4);
    }

    #[test]
    fn push_to_a_dropped_receiver_cancels_the_connection() {
        let (tx, rx) = queue(1);
        drop(rx);

        assert_eq!(tx.push(ready("a")), Err(QueueError::Closed));
        assert!(tx.closed().is_cancelled());
    }

    #[tokio::test]
    async fn gates_serialize_per_room_only() {
        let rooms = RoomRegistry::new();
        let held = rooms.acquire_gate(&key("a", "b")).await;

        let other = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            rooms.acquire_gate(&key("a", "c")),
        )
        .await;
        assert!(other.is_ok(), "different rooms never contend");

        let same = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            rooms.acquire_gate(&key("a", "b")),
        )
        .await;
        assert!(same.is_err(), "same room waits for the gate");

        drop(held);
        drop(other);
        rooms.prune(&key("a", "b"));
        rooms.prune(&key("a", "c"));
        assert_eq!(rooms.room_count(), 0);
    }
}

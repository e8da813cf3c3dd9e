use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// In-process publish/subscribe hub for room events.
///
/// Cheap to clone; every clone shares the same state. Publishing happens
/// under the state lock, so all subscribers of a room observe its events in
/// one and the same order. Senders are unbounded, so `publish` never blocks
/// while the lock is held.
#[derive(Clone, Default)]
pub struct RoomBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    /// Connection id -> channel feeding that connection's send loop
    senders: HashMap<Uuid, UnboundedSender<GatewayEvent>>,
    /// Room name -> subscribed connections
    rooms: HashMap<String, HashSet<Uuid>>,
    /// Connection id -> rooms it joined, for cleanup on detach
    memberships: HashMap<Uuid, HashSet<String>>,
}

impl RoomBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().expect("broker lock poisoned")
    }

    /// Register a new connection. The returned receiver yields every event
    /// addressed to it until the connection detaches or the broker shuts
    /// down.
    pub fn attach(&self) -> (Uuid, UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().senders.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Subscribe a connection to a room. Idempotent; no capacity limit and
    /// no membership check beyond the token presented at upgrade.
    pub fn join(&self, conn_id: Uuid, room: &str) {
        let mut state = self.state();
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id);
        state
            .memberships
            .entry(conn_id)
            .or_default()
            .insert(room.to_string());
    }

    /// Unsubscribe a connection from one room.
    pub fn leave(&self, conn_id: Uuid, room: &str) {
        let mut state = self.state();
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
        if let Some(rooms) = state.memberships.get_mut(&conn_id) {
            rooms.remove(room);
        }
    }

    /// Deliver an event to every current subscriber of a room.
    pub fn publish(&self, room: &str, event: GatewayEvent) {
        let state = self.state();
        let Some(members) = state.rooms.get(room) else {
            return;
        };
        for conn_id in members {
            if let Some(tx) = state.senders.get(conn_id) {
                // A closed receiver just means the connection is going away
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to every subscriber of a room except one
    /// connection. Typing indicators use this to skip their own sender.
    pub fn publish_except(&self, room: &str, event: GatewayEvent, skip: Uuid) {
        let state = self.state();
        let Some(members) = state.rooms.get(room) else {
            return;
        };
        for conn_id in members {
            if *conn_id == skip {
                continue;
            }
            if let Some(tx) = state.senders.get(conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to a single connection.
    pub fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        if let Some(tx) = self.state().senders.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop a connection and all its subscriptions. Closes the receiver
    /// handed out by `attach`, which ends the connection's forward loop.
    pub fn detach(&self, conn_id: Uuid) {
        let mut state = self.state();
        state.senders.remove(&conn_id);
        if let Some(rooms) = state.memberships.remove(&conn_id) {
            for room in rooms {
                if let Some(members) = state.rooms.get_mut(&room) {
                    members.remove(&conn_id);
                    if members.is_empty() {
                        state.rooms.remove(&room);
                    }
                }
            }
        }
    }

    /// Drop every connection. Used on server shutdown so connection loops
    /// end instead of idling on a channel nobody feeds.
    pub fn shutdown(&self) {
        let mut state = self.state();
        let dropped = state.senders.len();
        state.senders.clear();
        state.rooms.clear();
        state.memberships.clear();
        info!("Room broker shut down, {} connections dropped", dropped);
    }

    /// Number of connections currently subscribed to a room.
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.state().rooms.get(room).map_or(0, HashSet::len)
    }
}

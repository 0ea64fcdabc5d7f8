// ============================
// crates/backend-lib/src/gateway.rs
// ============================
//! Connection gateway.
//!
//! Owns the live connection table (connection id -> outbound queue) and the
//! `RoomRegistry`. Inbound envelopes are decoded and validated here, turned into
//! registry calls, and the resulting deliveries are pushed to each recipient's
//! queue.
//!
//! Every registry mutation and the fan-out of its result happen under one
//! mutex, so within a room every connection observes events in mutation order.
//! Fan-out uses `try_send` and never waits on a recipient: a full or closed
//! queue loses that one event for that one connection.

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use roomchat_common::{ClientEvent, ConnectionId, ServerEvent};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::config::Settings;
use crate::metrics::{
    DELIVERY_DROPPED, EVENT_RECEIVED, EVENT_REJECTED, MESSAGE_STORED, ROOM_CREATED, ROOM_DELETED,
    WS_ACTIVE, WS_CONNECTION,
};
use crate::registry::{
    Delivery, IntoDeliveries, RegistryError, RoomRegistry, RoomSnapshot, RoomSummary,
};
use crate::validation;

/// Transport-independent half of the WebSocket server
pub struct ConnectionGateway {
    registry: Mutex<RoomRegistry>,
    connections: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    channel_capacity: usize,
}

impl ConnectionGateway {
    pub fn new(settings: &Settings) -> Self {
        Self::with_registry(
            RoomRegistry::with_history_limit(settings.max_history),
            settings.channel_capacity,
        )
    }

    pub fn with_registry(registry: RoomRegistry, channel_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(registry),
            connections: DashMap::new(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register a new connection and hand back its id and outbound queue
    pub fn accept(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.connections.insert(connection_id, tx);

        counter!(WS_CONNECTION).increment(1);
        gauge!(WS_ACTIVE).increment(1.0);
        tracing::debug!(%connection_id, "connection accepted");

        (connection_id, rx)
    }

    /// Decode one text frame and dispatch it. Malformed frames are logged and dropped.
    pub fn handle_text(&self, connection_id: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.dispatch(connection_id, event),
            Err(e) => {
                counter!(EVENT_REJECTED, "reason" => "malformed").increment(1);
                tracing::warn!(%connection_id, error = %e, "dropping malformed envelope");
            },
        }
    }

    /// Validate `event`, apply it to the registry and deliver the results
    pub fn dispatch(&self, connection_id: ConnectionId, event: ClientEvent) {
        let name = event.name();
        counter!(EVENT_RECEIVED, "event" => name).increment(1);

        if let Err(e) = validation::validate_client_event(&event) {
            counter!(EVENT_REJECTED, "reason" => "invalid").increment(1);
            tracing::warn!(%connection_id, event = name, error = %e, "dropping invalid event");
            return;
        }

        let mut registry = self.registry.lock();

        // Disconnect removes the entry under this same lock
        if !self.connections.contains_key(&connection_id) {
            tracing::debug!(%connection_id, event = name, "dropping event from closed connection");
            return;
        }

        let result = match event {
            ClientEvent::JoinRoom(payload) => registry
                .join(connection_id, &payload.username, &payload.room)
                .map(|outcome| {
                    if outcome.created {
                        counter!(ROOM_CREATED).increment(1);
                    }
                    if outcome.previous.as_ref().is_some_and(|p| p.room_deleted) {
                        counter!(ROOM_DELETED).increment(1);
                    }
                    tracing::info!(
                        %connection_id,
                        room = %payload.room.trim(),
                        username = %payload.username.trim(),
                        "joined room"
                    );
                    outcome.into_deliveries()
                }),
            ClientEvent::SendMessage(payload) => registry
                .send(connection_id, &payload.room, &payload.message)
                .map(|delivery| {
                    counter!(MESSAGE_STORED).increment(1);
                    delivery.into_deliveries()
                }),
            ClientEvent::Typing(payload) => registry
                .set_typing(
                    connection_id,
                    &payload.room,
                    &payload.username,
                    payload.is_typing,
                )
                .map(IntoDeliveries::into_deliveries),
            ClientEvent::MessageReaction(payload) => {
                // The reactor is whoever this connection joined as
                let reactor = registry
                    .is_member(connection_id, &payload.room)
                    .then(|| registry.display_name(connection_id))
                    .flatten()
                    .map(str::to_string);
                match reactor {
                    Some(reactor) => registry
                        .react(
                            &payload.room,
                            payload.message_index,
                            &payload.emoji,
                            &reactor,
                        )
                        .map(IntoDeliveries::into_deliveries),
                    None => Err(RegistryError::NotAMember {
                        connection_id,
                        room: payload.room.trim().to_string(),
                    }),
                }
            },
            ClientEvent::LeaveRoom(payload) => {
                let outcome = registry.leave(connection_id, &payload.room);
                if outcome.as_ref().is_some_and(|o| o.room_deleted) {
                    counter!(ROOM_DELETED).increment(1);
                }
                Ok(outcome.into_deliveries())
            },
        };

        match result {
            Ok(deliveries) => self.deliver(deliveries),
            Err(e) => {
                counter!(EVENT_REJECTED, "reason" => e.error_code()).increment(1);
                tracing::warn!(
                    %connection_id,
                    event = name,
                    code = e.error_code(),
                    error = %e,
                    "event dropped"
                );
            },
        }
    }

    /// Tear down a connection and clean up its room membership.
    ///
    /// Only the first call for a connection does anything; it returns true.
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let mut registry = self.registry.lock();

        if self.connections.remove(&connection_id).is_none() {
            return false;
        }
        gauge!(WS_ACTIVE).decrement(1.0);

        match registry.disconnect(connection_id) {
            Some(outcome) => {
                tracing::info!(
                    %connection_id,
                    room = %outcome.room,
                    username = %outcome.participant.display_name,
                    room_deleted = outcome.room_deleted,
                    "connection left room"
                );
                if outcome.room_deleted {
                    counter!(ROOM_DELETED).increment(1);
                }
                self.deliver(outcome.into_deliveries());
            },
            None => tracing::debug!(%connection_id, "connection closed outside any room"),
        }

        true
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { recipients, event } in deliveries {
            for connection_id in recipients {
                let Some(tx) = self.connections.get(&connection_id) else {
                    tracing::debug!(%connection_id, event = event.name(), "recipient already gone");
                    continue;
                };

                match tx.try_send(event.clone()) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        counter!(DELIVERY_DROPPED, "reason" => "full").increment(1);
                        tracing::warn!(%connection_id, event = event.name(), "outbound queue full, event dropped");
                    },
                    Err(TrySendError::Closed(_)) => {
                        counter!(DELIVERY_DROPPED, "reason" => "closed").increment(1);
                        tracing::debug!(%connection_id, event = event.name(), "outbound queue closed, event dropped");
                    },
                }
            }
        }
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.registry.lock().rooms()
    }

    pub fn room(&self, room_name: &str) -> Option<RoomSnapshot> {
        self.registry.lock().snapshot(room_name)
    }

    #[cfg(test)]
    fn inspect<T>(&self, f: impl FnOnce(&RoomRegistry) -> T) -> T {
        f(&self.registry.lock())
    }
}

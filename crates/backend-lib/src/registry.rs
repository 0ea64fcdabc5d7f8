// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! Room registry.
//!
//! `RoomRegistry` is the single source of truth for room membership, message
//! history and reaction state. Every mutation returns the events it produced
//! together with the connections that must receive them; the registry never
//! touches a transport. Delivery is the gateway's job.
//!
//! Invariants kept by every operation:
//! - a room with zero members does not exist
//! - `memberships` (connection -> room) and each room's member list agree exactly
//! - a connection is a member of at most one room

use std::collections::{HashMap, VecDeque};

use chrono::Local;
use roomchat_common::{
    ChatMessage, ConnectionId, ReactionUpdate, RosterEntry, SequenceIndex, ServerEvent,
    UserTyping, SYSTEM_AUTHOR,
};
use serde::Serialize;
use thiserror::Error;

/// Why a registry operation was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Display name must not be empty")]
    EmptyDisplayName,

    #[error("Room name must not be empty")]
    EmptyRoomName,

    #[error("Emoji must not be empty")]
    EmptyEmoji,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Connection {connection_id} is not a member of room {room}")]
    NotAMember {
        connection_id: ConnectionId,
        room: String,
    },

    #[error("No message at index {index} in room {room}")]
    InvalidIndex { room: String, index: SequenceIndex },
}

impl RegistryError {
    /// Short code used in logs and metric labels
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::EmptyDisplayName => "REG_001",
            RegistryError::EmptyRoomName => "REG_002",
            RegistryError::EmptyEmoji => "REG_003",
            RegistryError::RoomNotFound(_) => "REG_004",
            RegistryError::NotAMember { .. } => "REG_005",
            RegistryError::InvalidIndex { .. } => "REG_006",
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A connection's presence in a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

/// One stored chat utterance. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub author: String,
    pub body: String,
    pub timestamp: String,
    pub sequence_index: SequenceIndex,
}

/// Reactions attached to one message: emoji -> distinct reactors.
///
/// Emoji and reactors keep first-seen order so broadcasts are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSet {
    entries: Vec<(String, Vec<String>)>,
}

impl ReactionSet {
    /// Record `reactor` under `emoji`. Returns false if the pair was already present.
    pub fn add(&mut self, emoji: &str, reactor: &str) -> bool {
        match self.entries.iter_mut().find(|(e, _)| e == emoji) {
            Some((_, reactors)) => {
                if reactors.iter().any(|r| r == reactor) {
                    return false;
                }
                reactors.push(reactor.to_string());
                true
            },
            None => {
                self.entries
                    .push((emoji.to_string(), vec![reactor.to_string()]));
                true
            },
        }
    }

    pub fn reactors(&self, emoji: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(e, _)| e == emoji)
            .map(|(_, reactors)| reactors.as_slice())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(emoji, reactors)| (emoji.as_str(), reactors.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An event and the connections it is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipients: Vec<ConnectionId>,
    pub event: ServerEvent,
}

impl Delivery {
    fn to_one(connection_id: ConnectionId, event: ServerEvent) -> Self {
        Self {
            recipients: vec![connection_id],
            event,
        }
    }

    fn to_many(recipients: Vec<ConnectionId>, event: ServerEvent) -> Self {
        Self { recipients, event }
    }
}

/// Result of a successful `join`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Departure from the room the connection was in before, if any
    pub previous: Option<DepartureOutcome>,
    /// True when this join created the room
    pub created: bool,
    /// System welcome, joiner only
    pub welcome: Delivery,
    /// System "has joined" message, every other member
    pub announcement: Delivery,
    /// Full roster, every member including the joiner
    pub roster: Delivery,
}

/// Result of a connection leaving its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartureOutcome {
    pub room: String,
    pub participant: Participant,
    /// System "has left" message for the remaining members, none if the room was deleted
    pub announcement: Option<Delivery>,
    /// Roster for the remaining members, none if the room was deleted
    pub roster: Option<Delivery>,
    pub room_deleted: bool,
}

/// Flattens an operation result into the deliveries the gateway performs, in order
pub trait IntoDeliveries {
    fn into_deliveries(self) -> Vec<Delivery>;
}

impl IntoDeliveries for Delivery {
    fn into_deliveries(self) -> Vec<Delivery> {
        vec![self]
    }
}

impl IntoDeliveries for DepartureOutcome {
    fn into_deliveries(self) -> Vec<Delivery> {
        self.announcement.into_iter().chain(self.roster).collect()
    }
}

impl IntoDeliveries for JoinOutcome {
    fn into_deliveries(self) -> Vec<Delivery> {
        let mut deliveries = self.previous.into_deliveries();
        deliveries.push(self.welcome);
        if !self.announcement.recipients.is_empty() {
            deliveries.push(self.announcement);
        }
        deliveries.push(self.roster);
        deliveries
    }
}

impl<T: IntoDeliveries> IntoDeliveries for Option<T> {
    fn into_deliveries(self) -> Vec<Delivery> {
        self.map(IntoDeliveries::into_deliveries).unwrap_or_default()
    }
}

/// Point-in-time view of a room for the HTTP surface
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub name: String,
    pub members: usize,
    pub messages: usize,
}

/// Point-in-time view of one room including its roster
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub name: String,
    pub users: Vec<RosterEntry>,
    pub messages: usize,
    pub next_index: SequenceIndex,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<Participant>,
    history: VecDeque<Message>,
    next_index: SequenceIndex,
    reactions: HashMap<SequenceIndex, ReactionSet>,
}

impl Room {
    fn member(&self, connection_id: ConnectionId) -> Option<&Participant> {
        self.members
            .iter()
            .find(|p| p.connection_id == connection_id)
    }

    fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.iter().map(|p| p.connection_id).collect()
    }

    fn member_ids_except(&self, connection_id: ConnectionId) -> Vec<ConnectionId> {
        self.members
            .iter()
            .map(|p| p.connection_id)
            .filter(|id| *id != connection_id)
            .collect()
    }

    fn roster(&self) -> Vec<RosterEntry> {
        self.members
            .iter()
            .map(|p| RosterEntry {
                id: p.connection_id,
                username: p.display_name.clone(),
            })
            .collect()
    }

    fn message(&self, index: SequenceIndex) -> Option<&Message> {
        let first = self.history.front()?.sequence_index;
        let offset = index.checked_sub(first)?;
        self.history.get(usize::try_from(offset).ok()?)
    }

    fn append(&mut self, author: String, body: String, max_history: Option<usize>) -> Message {
        let message = Message {
            author,
            body,
            timestamp: timestamp(),
            sequence_index: self.next_index,
        };
        self.next_index += 1;
        self.history.push_back(message.clone());

        if let Some(limit) = max_history {
            while self.history.len() > limit {
                if let Some(evicted) = self.history.pop_front() {
                    self.reactions.remove(&evicted.sequence_index);
                }
            }
        }

        message
    }
}

/// Wall-clock time of day, formatted like a browser's `toLocaleTimeString`
fn timestamp() -> String {
    Local::now().format("%-I:%M:%S %p").to_string()
}

fn system_message(room: &str, message: String) -> ServerEvent {
    ServerEvent::ReceiveMessage(ChatMessage {
        room: room.to_string(),
        author: SYSTEM_AUTHOR.to_string(),
        message,
        time: timestamp(),
        sequence_index: None,
    })
}

/// In-memory room/session coordinator.
///
/// Not internally synchronised: the owner serialises access (the gateway keeps
/// it behind a single mutex).
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    memberships: HashMap<ConnectionId, String>,
    max_history: Option<usize>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that keeps at most `max_history` messages per room
    pub fn with_history_limit(max_history: Option<usize>) -> Self {
        Self {
            max_history,
            ..Self::default()
        }
    }

    /// Add `connection_id` to `room_name` as `display_name`, creating the room if needed.
    ///
    /// A connection already in another room is detached from it first, with the
    /// usual departure events. Rejoining the current room keeps the room intact.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        display_name: &str,
        room_name: &str,
    ) -> RegistryResult<JoinOutcome> {
        let display_name = display_name.trim();
        let room_name = room_name.trim();
        if display_name.is_empty() {
            return Err(RegistryError::EmptyDisplayName);
        }
        if room_name.is_empty() {
            return Err(RegistryError::EmptyRoomName);
        }

        if self.room_of(connection_id) == Some(room_name) {
            if let Some(outcome) = self.rejoin(connection_id, display_name, room_name) {
                return Ok(outcome);
            }
        }

        let previous = self.disconnect(connection_id);

        let created = !self.rooms.contains_key(room_name);
        let room = self.rooms.entry(room_name.to_string()).or_default();
        let others = room.member_ids();
        room.members.push(Participant {
            connection_id,
            display_name: display_name.to_string(),
        });

        let welcome = Delivery::to_one(
            connection_id,
            system_message(
                room_name,
                format!("Welcome {display_name} to room {room_name}!"),
            ),
        );
        let announcement = Delivery::to_many(
            others,
            system_message(room_name, format!("{display_name} has joined the chat")),
        );
        let roster = Delivery::to_many(room.member_ids(), ServerEvent::RoomUsers(room.roster()));

        self.memberships
            .insert(connection_id, room_name.to_string());
        debug_assert!(self.is_consistent());

        tracing::debug!(%connection_id, room = room_name, display_name, created, "joined room");

        Ok(JoinOutcome {
            previous,
            created,
            welcome,
            announcement,
            roster,
        })
    }

    /// Join of the room the connection is already in. Position, history and
    /// reactions stay; the display name is replaced and the roster re-sent.
    fn rejoin(
        &mut self,
        connection_id: ConnectionId,
        display_name: &str,
        room_name: &str,
    ) -> Option<JoinOutcome> {
        let room = self.rooms.get_mut(room_name)?;
        let participant = room
            .members
            .iter_mut()
            .find(|p| p.connection_id == connection_id)?;
        participant.display_name = display_name.to_string();

        let welcome = Delivery::to_one(
            connection_id,
            system_message(
                room_name,
                format!("Welcome {display_name} to room {room_name}!"),
            ),
        );
        let announcement = Delivery::to_many(
            Vec::new(),
            system_message(room_name, format!("{display_name} has joined the chat")),
        );
        let roster = Delivery::to_many(room.member_ids(), ServerEvent::RoomUsers(room.roster()));
        debug_assert!(self.is_consistent());

        tracing::debug!(%connection_id, room = room_name, display_name, "rejoined current room");

        Some(JoinOutcome {
            previous: None,
            created: false,
            welcome,
            announcement,
            roster,
        })
    }

    /// Append a chat message from `connection_id` to `room_name`.
    ///
    /// The author is the sender's joined display name. The event goes to every
    /// member, sender included.
    pub fn send(
        &mut self,
        connection_id: ConnectionId,
        room_name: &str,
        body: &str,
    ) -> RegistryResult<Delivery> {
        let room_name = room_name.trim();
        let max_history = self.max_history;
        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| RegistryError::RoomNotFound(room_name.to_string()))?;
        let author = room
            .member(connection_id)
            .ok_or_else(|| RegistryError::NotAMember {
                connection_id,
                room: room_name.to_string(),
            })?
            .display_name
            .clone();

        let message = room.append(author, body.to_string(), max_history);

        Ok(Delivery::to_many(
            room.member_ids(),
            ServerEvent::ReceiveMessage(ChatMessage {
                room: room_name.to_string(),
                author: message.author,
                message: message.body,
                time: message.timestamp,
                sequence_index: Some(message.sequence_index),
            }),
        ))
    }

    /// Relay a typing indicator to every member except the originator. Nothing is stored.
    pub fn set_typing(
        &self,
        connection_id: ConnectionId,
        room_name: &str,
        display_name: &str,
        is_typing: bool,
    ) -> RegistryResult<Delivery> {
        let room_name = room_name.trim();
        let room = self
            .rooms
            .get(room_name)
            .ok_or_else(|| RegistryError::RoomNotFound(room_name.to_string()))?;
        let participant = room
            .member(connection_id)
            .ok_or_else(|| RegistryError::NotAMember {
                connection_id,
                room: room_name.to_string(),
            })?;

        if participant.display_name != display_name.trim() {
            tracing::debug!(
                %connection_id,
                claimed = display_name,
                actual = %participant.display_name,
                "typing name differs from joined name"
            );
        }

        Ok(Delivery::to_many(
            room.member_ids_except(connection_id),
            ServerEvent::UserTyping(UserTyping {
                username: participant.display_name.clone(),
                is_typing,
            }),
        ))
    }

    /// Add `reactor` under `emoji` for message `index` of `room_name`.
    ///
    /// Adding an existing pair changes nothing but still yields the update so
    /// late clients converge. Unknown or evicted indices are rejected.
    pub fn react(
        &mut self,
        room_name: &str,
        index: SequenceIndex,
        emoji: &str,
        reactor: &str,
    ) -> RegistryResult<Delivery> {
        let room_name = room_name.trim();
        let emoji = emoji.trim();
        let reactor = reactor.trim();
        if emoji.is_empty() {
            return Err(RegistryError::EmptyEmoji);
        }
        if reactor.is_empty() {
            return Err(RegistryError::EmptyDisplayName);
        }

        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| RegistryError::RoomNotFound(room_name.to_string()))?;
        if room.message(index).is_none() {
            return Err(RegistryError::InvalidIndex {
                room: room_name.to_string(),
                index,
            });
        }

        let set = room.reactions.entry(index).or_default();
        if !set.add(emoji, reactor) {
            tracing::trace!(room = room_name, index, emoji, reactor, "duplicate reaction");
        }
        let reactors = set.reactors(emoji).to_vec();

        Ok(Delivery::to_many(
            room.member_ids(),
            ServerEvent::MessageReaction(ReactionUpdate {
                message_index: index,
                emoji: emoji.to_string(),
                reactor: reactor.to_string(),
                reactors,
            }),
        ))
    }

    /// Remove `connection_id` from whatever room it is in.
    ///
    /// Returns `None` when the connection is in no room, so repeated calls are no-ops.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<DepartureOutcome> {
        let room_name = self.memberships.remove(&connection_id)?;
        self.depart(connection_id, room_name)
    }

    /// Remove `connection_id` from `room_name` only. No-op if it is not a member there.
    pub fn leave(
        &mut self,
        connection_id: ConnectionId,
        room_name: &str,
    ) -> Option<DepartureOutcome> {
        if self.room_of(connection_id) != Some(room_name.trim()) {
            return None;
        }
        self.disconnect(connection_id)
    }

    fn depart(
        &mut self,
        connection_id: ConnectionId,
        room_name: String,
    ) -> Option<DepartureOutcome> {
        let Some(room) = self.rooms.get_mut(&room_name) else {
            tracing::error!(%connection_id, room = %room_name, "membership index points at a missing room");
            return None;
        };
        let Some(position) = room
            .members
            .iter()
            .position(|p| p.connection_id == connection_id)
        else {
            tracing::error!(%connection_id, room = %room_name, "membership index points at a room without the connection");
            return None;
        };
        let participant = room.members.remove(position);

        if room.members.is_empty() {
            self.rooms.remove(&room_name);
            debug_assert!(self.is_consistent());
            tracing::debug!(%connection_id, room = %room_name, "last member left, room deleted");
            return Some(DepartureOutcome {
                room: room_name,
                participant,
                announcement: None,
                roster: None,
                room_deleted: true,
            });
        }

        let remaining = room.member_ids();
        let announcement = Delivery::to_many(
            remaining.clone(),
            system_message(
                &room_name,
                format!("{} has left the chat", participant.display_name),
            ),
        );
        let roster = Delivery::to_many(remaining, ServerEvent::RoomUsers(room.roster()));
        debug_assert!(self.is_consistent());

        tracing::debug!(%connection_id, room = %room_name, "left room");

        Some(DepartureOutcome {
            room: room_name,
            participant,
            announcement: Some(announcement),
            roster: Some(roster),
            room_deleted: false,
        })
    }

    pub fn room_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.memberships.get(&connection_id).map(String::as_str)
    }

    /// Display name `connection_id` joined its current room with
    pub fn display_name(&self, connection_id: ConnectionId) -> Option<&str> {
        let room = self.rooms.get(self.room_of(connection_id)?)?;
        room.member(connection_id).map(|p| p.display_name.as_str())
    }

    pub fn is_member(&self, connection_id: ConnectionId, room_name: &str) -> bool {
        self.room_of(connection_id) == Some(room_name.trim())
    }

    pub fn contains_room(&self, room_name: &str) -> bool {
        self.rooms.contains_key(room_name)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn roster(&self, room_name: &str) -> Option<Vec<RosterEntry>> {
        self.rooms.get(room_name).map(Room::roster)
    }

    /// Stored messages of a room, oldest first
    pub fn history(&self, room_name: &str) -> Option<Vec<Message>> {
        self.rooms
            .get(room_name)
            .map(|room| room.history.iter().cloned().collect())
    }

    pub fn reactions(&self, room_name: &str, index: SequenceIndex) -> Option<ReactionSet> {
        self.rooms.get(room_name)?.reactions.get(&index).cloned()
    }

    /// All rooms, sorted by name
    pub fn rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(name, room)| RoomSummary {
                name: name.clone(),
                members: room.members.len(),
                messages: room.history.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub fn snapshot(&self, room_name: &str) -> Option<RoomSnapshot> {
        self.rooms.get(room_name).map(|room| RoomSnapshot {
            name: room_name.to_string(),
            users: room.roster(),
            messages: room.history.len(),
            next_index: room.next_index,
        })
    }

    /// Check the membership invariants. Cost is linear in the number of members.
    pub fn is_consistent(&self) -> bool {
        let indexed_members: usize = self.rooms.values().map(|r| r.members.len()).sum();
        if indexed_members != self.memberships.len() {
            return false;
        }
        if self.rooms.values().any(|r| r.members.is_empty()) {
            return false;
        }
        self.memberships.iter().all(|(connection_id, room_name)| {
            self.rooms
                .get(room_name)
                .is_some_and(|room| room.member(*connection_id).is_some())
        })
    }
}

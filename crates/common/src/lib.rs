// ================
// crates/common/src/lib.rs
// ================
//! Common types shared by the room chat server and its clients.
//! This module defines the WebSocket protocol envelopes and their payloads.
//!
//! Every frame is a JSON object of the form `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier assigned to a transport session at accept time
pub type ConnectionId = Uuid;

/// Position of a chat message in its room's history
pub type SequenceIndex = u64;

/// Author used for server-generated messages
pub const SYSTEM_AUTHOR: &str = "System";

/// Events sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join (and implicitly create) a room
    JoinRoom(JoinRoom),
    /// Post a chat message to a room
    SendMessage(SendMessage),
    /// Start or stop the typing indicator
    Typing(Typing),
    /// React to a message with an emoji
    MessageReaction(ReactionRequest),
    /// Leave a room without closing the connection
    LeaveRoom(LeaveRoom),
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::MessageReaction(_) => "message_reaction",
            ClientEvent::LeaveRoom(_) => "leave_room",
        }
    }

    /// Room the event is addressed to
    pub fn room(&self) -> &str {
        match self {
            ClientEvent::JoinRoom(p) => &p.room,
            ClientEvent::SendMessage(p) => &p.room,
            ClientEvent::Typing(p) => &p.room,
            ClientEvent::MessageReaction(p) => &p.room,
            ClientEvent::LeaveRoom(p) => &p.room,
        }
    }
}

/// Payload of `join_room`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinRoom {
    /// Display name, not unique
    pub username: String,
    /// Room to join, case-sensitive
    pub room: String,
}

/// Payload of `send_message`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub room: String,
    /// Client-claimed author. The server uses the sender's joined name instead.
    pub author: String,
    pub message: String,
}

/// Payload of `typing`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub room: String,
    pub username: String,
    pub is_typing: bool,
}

/// Payload of inbound `message_reaction`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub room: String,
    pub message_index: SequenceIndex,
    pub emoji: String,
    pub reactor: String,
}

/// Payload of `leave_room`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LeaveRoom {
    pub room: String,
}

/// Events sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A chat or system message
    ReceiveMessage(ChatMessage),
    /// Full roster of a room, re-sent on every membership change
    RoomUsers(Vec<RosterEntry>),
    /// Someone else started or stopped typing
    UserTyping(UserTyping),
    /// Reaction state of one emoji on one message
    MessageReaction(ReactionUpdate),
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::RoomUsers(_) => "room_users",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::MessageReaction(_) => "message_reaction",
        }
    }
}

/// Payload of `receive_message`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room: String,
    pub author: String,
    pub message: String,
    /// Wall-clock time formatted when the message was created
    pub time: String,
    /// Set for stored chat messages, absent on system messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_index: Option<SequenceIndex>,
}

/// One entry of `room_users`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: ConnectionId,
    pub username: String,
}

/// Payload of `user_typing`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub username: String,
    pub is_typing: bool,
}

/// Payload of outbound `message_reaction`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub message_index: SequenceIndex,
    pub emoji: String,
    /// Reactor that triggered this update
    pub reactor: String,
    /// Every distinct reactor for this emoji, in first-reaction order
    pub reactors: Vec<String>,
}

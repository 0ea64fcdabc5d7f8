// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Inbound event validation module.

use roomchat_common::ClientEvent;
use thiserror::Error;

// Common validation constants, counted in characters
const MAX_USERNAME_LENGTH: usize = 64;
const MAX_ROOM_NAME_LENGTH: usize = 128;
const MAX_MESSAGE_LENGTH: usize = 4000;
const MAX_EMOJI_LENGTH: usize = 32;

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid room name: {0}")]
    InvalidRoomName(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid emoji: {0}")]
    InvalidEmoji(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

fn check_text(
    value: &str,
    max: usize,
    what: &str,
    err: fn(String) -> ValidationError,
) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(err(format!("{what} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(err(format!("{what} cannot exceed {max} characters")));
    }
    Ok(())
}

/// Validate a display name
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    check_text(
        username,
        MAX_USERNAME_LENGTH,
        "Username",
        ValidationError::InvalidUsername,
    )?;
    Ok(username.trim())
}

/// Validate a room name
pub fn validate_room_name(room: &str) -> ValidationResult<&str> {
    check_text(
        room,
        MAX_ROOM_NAME_LENGTH,
        "Room name",
        ValidationError::InvalidRoomName,
    )?;
    Ok(room.trim())
}

/// Validate a chat message body. The body itself is kept untrimmed.
pub fn validate_message_body(body: &str) -> ValidationResult<&str> {
    check_text(
        body,
        MAX_MESSAGE_LENGTH,
        "Message",
        ValidationError::InvalidMessage,
    )?;
    Ok(body)
}

/// Validate a reaction emoji
pub fn validate_emoji(emoji: &str) -> ValidationResult<&str> {
    check_text(emoji, MAX_EMOJI_LENGTH, "Emoji", ValidationError::InvalidEmoji)?;
    Ok(emoji.trim())
}

/// Validate a client event.
///
/// Only fields the server acts on are checked. Claimed authors, typing names
/// and reactors are replaced by the joined display name, so they pass as-is.
pub fn validate_client_event(event: &ClientEvent) -> ValidationResult<()> {
    validate_room_name(event.room())?;

    match event {
        ClientEvent::JoinRoom(payload) => {
            validate_username(&payload.username)?;
        },
        ClientEvent::SendMessage(payload) => {
            validate_message_body(&payload.message)?;
        },
        ClientEvent::MessageReaction(payload) => {
            validate_emoji(&payload.emoji)?;
        },
        ClientEvent::Typing(_) | ClientEvent::LeaveRoom(_) => {},
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomchat_common::{JoinRoom, ReactionRequest, SendMessage, Typing};

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LENGTH + 1)).is_err());
        assert!(validate_username(&"é".repeat(MAX_USERNAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_room_names_are_case_sensitive_and_free_form() {
        assert_eq!(validate_room_name("Lobby").unwrap(), "Lobby");
        assert_eq!(validate_room_name("room #1 (ops)").unwrap(), "room #1 (ops)");
        assert!(validate_room_name("\t").is_err());
    }

    #[test]
    fn test_validate_message_keeps_body() {
        assert_eq!(validate_message_body("  hi  ").unwrap(), "  hi  ");
        assert!(validate_message_body(" ").is_err());
        assert!(validate_message_body(&"x".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_client_event() {
        let join = ClientEvent::JoinRoom(JoinRoom {
            username: "alice".to_string(),
            room: "lobby".to_string(),
        });
        assert!(validate_client_event(&join).is_ok());

        let empty_room = ClientEvent::SendMessage(SendMessage {
            room: String::new(),
            author: "alice".to_string(),
            message: "hi".to_string(),
        });
        assert!(matches!(
            validate_client_event(&empty_room),
            Err(ValidationError::InvalidRoomName(_))
        ));

        let no_emoji = ClientEvent::MessageReaction(ReactionRequest {
            room: "lobby".to_string(),
            message_index: 0,
            emoji: " ".to_string(),
            reactor: "alice".to_string(),
        });
        assert!(matches!(
            validate_client_event(&no_emoji),
            Err(ValidationError::InvalidEmoji(_))
        ));
    }

    #[test]
    fn test_ignored_identity_fields_are_not_checked() {
        let typing = ClientEvent::Typing(Typing {
            room: "lobby".to_string(),
            username: String::new(),
            is_typing: true,
        });
        assert!(validate_client_event(&typing).is_ok());

        let reaction = ClientEvent::MessageReaction(ReactionRequest {
            room: "lobby".to_string(),
            message_index: 0,
            emoji: "👍".to_string(),
            reactor: " ".to_string(),
        });
        assert!(validate_client_event(&reaction).is_ok());
    }
}

//! Chat relay: turns a raw chat request into an attributed message.
//!
//! Attribution comes from the roster, never from the client payload:
//! the moderator always posts as the fixed teacher name, students post
//! under their joined display name, and unjoined connections are
//! rejected.

use classpoll_core::{ChatMessage, ConnectionId, SessionError};

use crate::registry::ParticipantRegistry;

/// Build the chat message for a `send-chat-message` request from
/// `conn`. Fails with `Unauthorized` when the connection has not
/// joined the session.
pub fn send(
    registry: &ParticipantRegistry,
    conn: &ConnectionId,
    body: String,
) -> Result<ChatMessage, SessionError> {
    if registry.is_moderator(conn) {
        return Ok(ChatMessage::from_teacher(body));
    }
    if let Some(name) = registry.find(conn) {
        return Ok(ChatMessage::from_student(name, body));
    }
    Err(SessionError::Unauthorized)
}

use tracing::instrument;

use classpoll_core::{ChatMessage, MessageId, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Chat transcript storage.
pub struct ChatRepo {
    db: Database,
}

impl ChatRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, sender, role, body, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.as_str(),
                    message.sender,
                    message.role.to_string(),
                    message.body,
                    message.sent_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// The last `limit` messages, returned in chronological order.
    #[instrument(skip(self))]
    pub fn recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, role, body, sent_at FROM chat_messages
                 ORDER BY sent_at DESC, id DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }
            messages.reverse();
            Ok(messages)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    let id: String = row_helpers::get(row, 0, "chat_messages", "id")?;
    let sender: String = row_helpers::get(row, 1, "chat_messages", "sender")?;
    let role_raw: String = row_helpers::get(row, 2, "chat_messages", "role")?;
    let role: Role = row_helpers::parse_enum(&role_raw, "chat_messages", "role")?;
    let body: String = row_helpers::get(row, 3, "chat_messages", "body")?;
    let sent_raw: String = row_helpers::get(row, 4, "chat_messages", "sent_at")?;

    Ok(ChatMessage {
        id: MessageId::from_raw(id),
        sender,
        role,
        body,
        sent_at: row_helpers::parse_timestamp(&sent_raw, "chat_messages", "sent_at")?,
    })
}

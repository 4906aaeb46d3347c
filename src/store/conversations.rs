//! Conversation and message persistence.
//!
//! Messages are append-only: there is no update or delete path.

use sqlx::SqlitePool;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{now_timestamp, StoreError};
use crate::types::{ChatMessage, Conversation, ConversationPurpose, SenderTag};

/// Row type returned by SQLite queries for conversations.
type ConversationRow = (i64, i64, String, String, bool);

/// Row type returned by SQLite queries for messages.
type MessageRow = (i64, i64, String, String, Option<String>, String);

fn conversation_from_row(row: ConversationRow) -> Result<Conversation, StoreError> {
    let (id, participant_id, purpose, session_id, is_active) = row;
    Ok(Conversation {
        id,
        participant_id,
        purpose: ConversationPurpose::parse(&purpose)?,
        session_id,
        is_active,
    })
}

fn message_from_row(row: MessageRow) -> Result<ChatMessage, StoreError> {
    let (id, conversation_id, sender, body, transport_message_id, created_at) = row;
    Ok(ChatMessage {
        id,
        conversation_id,
        sender: SenderTag::parse(&sender)?,
        body,
        transport_message_id,
        created_at,
    })
}

async fn find_active(
    db: &SqlitePool,
    participant_id: i64,
    purpose: ConversationPurpose,
) -> Result<Option<Conversation>, StoreError> {
    let row: Option<ConversationRow> = sqlx::query_as(
        "SELECT id, participant_id, purpose, session_id, is_active FROM conversations \
         WHERE participant_id = ?1 AND purpose = ?2 AND is_active = 1",
    )
    .bind(participant_id)
    .bind(purpose.as_str())
    .fetch_optional(db)
    .await?;
    row.map(conversation_from_row).transpose()
}

/// Return the active conversation for a participant and purpose, creating one
/// with a fresh session id if none exists.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn get_or_create_conversation(
    db: &SqlitePool,
    participant_id: i64,
    purpose: ConversationPurpose,
) -> Result<Conversation, StoreError> {
    if let Some(existing) = find_active(db, participant_id, purpose).await? {
        return Ok(existing);
    }

    let session_id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    // The partial unique index makes a concurrent duplicate insert a no-op.
    sqlx::query(
        "INSERT OR IGNORE INTO conversations \
         (participant_id, purpose, session_id, is_active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
    )
    .bind(participant_id)
    .bind(purpose.as_str())
    .bind(&session_id)
    .bind(&now)
    .execute(db)
    .await?;

    let conversation = find_active(db, participant_id, purpose)
        .await?
        .ok_or_else(|| StoreError::ParticipantNotFound(participant_id.to_string()))?;
    debug!(
        participant_id,
        purpose = purpose.as_str(),
        session_id = %conversation.session_id,
        "conversation opened"
    );
    Ok(conversation)
}

/// Close the active conversation so the next message opens a fresh session.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn close_conversation(db: &SqlitePool, conversation_id: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE conversations SET is_active = 0, updated_at = ?1 WHERE id = ?2")
        .bind(now_timestamp())
        .bind(conversation_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Append a message to a conversation.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn append_message(
    db: &SqlitePool,
    conversation_id: i64,
    sender: SenderTag,
    body: &str,
    transport_message_id: Option<&str>,
) -> Result<ChatMessage, StoreError> {
    let created_at = now_timestamp();
    let result = sqlx::query(
        "INSERT INTO messages (conversation_id, sender, body, transport_message_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(conversation_id)
    .bind(sender.as_str())
    .bind(body)
    .bind(transport_message_id)
    .bind(&created_at)
    .execute(db)
    .await?;

    sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE id = ?2")
        .bind(&created_at)
        .bind(conversation_id)
        .execute(db)
        .await?;

    let id = result.last_insert_rowid();
    trace!(conversation_id, message_id = id, sender = sender.as_str(), "message appended");
    Ok(ChatMessage {
        id,
        conversation_id,
        sender,
        body: body.to_owned(),
        transport_message_id: transport_message_id.map(str::to_owned),
        created_at,
    })
}

/// Most recent messages of a conversation, oldest first.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn recent_messages(
    db: &SqlitePool,
    conversation_id: i64,
    limit: u32,
) -> Result<Vec<ChatMessage>, StoreError> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id, conversation_id, sender, body, transport_message_id, created_at \
         FROM (SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2) \
         ORDER BY id ASC",
    )
    .bind(conversation_id)
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;
    rows.into_iter().map(message_from_row).collect()
}

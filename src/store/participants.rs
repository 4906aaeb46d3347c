//! Participant resolution and persistence.

use sqlx::SqlitePool;
use tracing::{debug, trace};

use super::{now_timestamp, StoreError};
use crate::phone;
use crate::types::{Participant, Role};

/// Row type returned by SQLite queries for participants.
type ParticipantRow = (i64, String, String, String, bool, String);

const SELECT_COLUMNS: &str = "SELECT id, phone, name, role, is_active, created_at FROM participants";

fn from_row(row: ParticipantRow) -> Result<Participant, StoreError> {
    let (id, phone, name, role, is_active, created_at) = row;
    Ok(Participant {
        id,
        phone,
        name,
        role: Role::parse(&role)?,
        is_active,
        created_at,
    })
}

/// Default display name for a participant first seen with no name.
pub fn default_display_name(role: Role, key: &str) -> String {
    let suffix = phone::short_suffix(key);
    match role {
        Role::Client => format!("Client {suffix}"),
        Role::Coordinator => "Coordinator".to_owned(),
        Role::Therapist => format!("Therapist {suffix}"),
        Role::Admin => format!("Admin {suffix}"),
    }
}

/// Return the participant for `raw_phone`, creating it on first contact.
///
/// The phone is normalized before lookup. An existing participant keeps its
/// stored name and role.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn get_or_create_participant(
    db: &SqlitePool,
    raw_phone: &str,
    role: Role,
    name: Option<&str>,
) -> Result<Participant, StoreError> {
    let key = phone::normalize(raw_phone);
    let display = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_owned(),
        None => default_display_name(role, &key),
    };
    let now = now_timestamp();

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO participants (phone, name, role, is_active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
    )
    .bind(&key)
    .bind(&display)
    .bind(role.as_str())
    .bind(&now)
    .execute(db)
    .await?;

    if inserted.rows_affected() > 0 {
        debug!(phone = %key, role = role.as_str(), "participant created");
    }

    find_participant_by_phone(db, &key)
        .await?
        .ok_or(StoreError::ParticipantNotFound(key))
}

/// Look up a participant by phone (normalized before lookup).
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn find_participant_by_phone(
    db: &SqlitePool,
    raw_phone: &str,
) -> Result<Option<Participant>, StoreError> {
    let key = phone::normalize(raw_phone);
    let row: Option<ParticipantRow> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE phone = ?1"))
            .bind(&key)
            .fetch_optional(db)
            .await?;
    row.map(from_row).transpose()
}

/// Load a participant by ID.
///
/// # Errors
///
/// Returns [`StoreError::ParticipantNotFound`] if no row matches, or
/// [`StoreError::Database`] on SQLite failure.
pub async fn get_participant(db: &SqlitePool, id: i64) -> Result<Participant, StoreError> {
    let row: Option<ParticipantRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(db)
        .await?;
    match row {
        Some(r) => from_row(r),
        None => Err(StoreError::ParticipantNotFound(id.to_string())),
    }
}

/// Search participants by phone fragment or case-insensitive name match.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn search_participants(
    db: &SqlitePool,
    term: &str,
    limit: u32,
) -> Result<Vec<Participant>, StoreError> {
    let term = term.trim();
    if term.is_empty() {
        return Ok(Vec::new());
    }
    let name_pattern = format!("%{term}%");
    let key = phone::normalize(term);
    let phone_pattern = if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
        format!("%{key}%")
    } else {
        // Non-numeric terms only match names.
        String::new()
    };

    let rows: Vec<ParticipantRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE name LIKE ?1 COLLATE NOCASE OR (?2 != '' AND phone LIKE ?2) \
         ORDER BY id LIMIT ?3"
    ))
    .bind(&name_pattern)
    .bind(&phone_pattern)
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;
    trace!(term, matches = rows.len(), "participant search");
    rows.into_iter().map(from_row).collect()
}

/// List active participants with the given role.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn list_by_role(db: &SqlitePool, role: Role) -> Result<Vec<Participant>, StoreError> {
    let rows: Vec<ParticipantRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE role = ?1 AND is_active = 1 ORDER BY id"
    ))
    .bind(role.as_str())
    .fetch_all(db)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Mark a participant inactive. Participants are never deleted.
///
/// # Errors
///
/// Returns [`StoreError::ParticipantNotFound`] if no row matches, or
/// [`StoreError::Database`] on SQLite failure.
pub async fn deactivate_participant(db: &SqlitePool, id: i64) -> Result<(), StoreError> {
    let result =
        sqlx::query("UPDATE participants SET is_active = 0, updated_at = ?1 WHERE id = ?2")
            .bind(now_timestamp())
            .bind(id)
            .execute(db)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::ParticipantNotFound(id.to_string()));
    }
    debug!(participant_id = id, "participant deactivated");
    Ok(())
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::{ConversationId, ParticipantRef, Participation, ParticipationId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::models::{fmt_ts, json_column, json_text, ts_column};

const COLUMNS: &str =
    "id, conversation_id, participant_id, participant_type, settings, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Participation> {
    Ok(Participation {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        participant: ParticipantRef {
            id: row.get(2)?,
            kind: row.get(3)?,
        },
        settings: json_column(row, 4)?,
        created_at: ts_column(row, 5)?,
        updated_at: ts_column(row, 6)?,
    })
}

/// Join a participant to a conversation. Joining twice keeps the existing
/// row (and its settings).
pub fn insert(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
    now: DateTime<Utc>,
) -> Result<Participation> {
    conn.execute(
        "INSERT INTO participation (conversation_id, participant_id, participant_type, settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, '{}', ?4, ?4)
         ON CONFLICT(conversation_id, participant_id, participant_type) DO NOTHING",
        params![conversation_id, participant.id, participant.kind, fmt_ts(now)],
    )?;

    find(conn, conversation_id, participant)?
        .ok_or_else(|| anyhow::anyhow!("Participation vanished after insert: {}", participant))
}

pub fn find(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
) -> Result<Option<Participation>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM participation
         WHERE conversation_id = ?1 AND participant_id = ?2 AND participant_type = ?3"
    );
    Ok(conn
        .query_row(&sql, params![conversation_id, participant.id, participant.kind], from_row)
        .optional()?)
}

pub fn find_by_id(conn: &Connection, id: ParticipationId) -> Result<Option<Participation>> {
    let sql = format!("SELECT {COLUMNS} FROM participation WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

/// Members of a conversation in join order.
pub fn list(conn: &Connection, conversation_id: ConversationId) -> Result<Vec<Participation>> {
    let sql = format!("SELECT {COLUMNS} FROM participation WHERE conversation_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([conversation_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch members for a set of conversations.
pub fn list_for_conversations(
    conn: &Connection,
    conversation_ids: &[ConversationId],
) -> Result<Vec<Participation>> {
    if conversation_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {COLUMNS} FROM participation WHERE conversation_id IN ({}) ORDER BY id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(conn: &Connection, conversation_id: ConversationId) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM participation WHERE conversation_id = ?1",
        [conversation_id],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}

pub fn delete(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM participation
         WHERE conversation_id = ?1 AND participant_id = ?2 AND participant_type = ?3",
        params![conversation_id, participant.id, participant.kind],
    )?;
    Ok(removed > 0)
}

pub fn update_settings(
    conn: &Connection,
    id: ParticipationId,
    settings: &Value,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE participation SET settings = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, json_text(settings), fmt_ts(now)],
    )?;
    Ok(())
}

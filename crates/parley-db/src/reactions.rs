use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::{MessageId, ParticipantRef, Reaction};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{fmt_ts, ts_column};

const COLUMNS: &str = "id, message_id, participant_id, participant_type, reaction, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: row.get(0)?,
        message_id: row.get(1)?,
        participant: ParticipantRef {
            id: row.get(2)?,
            kind: row.get(3)?,
        },
        reaction: row.get(4)?,
        created_at: ts_column(row, 5)?,
    })
}

/// Insert the reaction unless the participant already holds it.
/// Returns the stored row and whether this call created it.
pub fn insert_if_absent(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
    reaction: &str,
    now: DateTime<Utc>,
) -> Result<(Reaction, bool)> {
    let inserted = conn.execute(
        "INSERT INTO reactions (message_id, participant_id, participant_type, reaction, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(message_id, participant_id, participant_type, reaction) DO NOTHING",
        params![message_id, participant.id, participant.kind, reaction, fmt_ts(now)],
    )?;

    let row = find(conn, message_id, participant, reaction)?
        .ok_or_else(|| anyhow::anyhow!("Reaction vanished after insert on message {}", message_id))?;
    Ok((row, inserted == 1))
}

pub fn find(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
    reaction: &str,
) -> Result<Option<Reaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM reactions
         WHERE message_id = ?1 AND participant_id = ?2 AND participant_type = ?3 AND reaction = ?4"
    );
    Ok(conn
        .query_row(&sql, params![message_id, participant.id, participant.kind, reaction], from_row)
        .optional()?)
}

/// Delete the reaction if present. Returns the removed row.
pub fn delete(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
    reaction: &str,
) -> Result<Option<Reaction>> {
    let sql = format!(
        "DELETE FROM reactions
         WHERE message_id = ?1 AND participant_id = ?2 AND participant_type = ?3 AND reaction = ?4
         RETURNING {COLUMNS}"
    );
    Ok(conn
        .query_row(&sql, params![message_id, participant.id, participant.kind, reaction], from_row)
        .optional()?)
}

pub fn list(conn: &Connection, message_id: MessageId) -> Result<Vec<Reaction>> {
    let sql = format!("SELECT {COLUMNS} FROM reactions WHERE message_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([message_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_by_participant(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
) -> Result<Vec<Reaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM reactions
         WHERE message_id = ?1 AND participant_id = ?2 AND participant_type = ?3
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![message_id, participant.id, participant.kind], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// `reaction = None` matches any reaction by the participant.
pub fn has_reacted(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
    reaction: Option<&str>,
) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM reactions
            WHERE message_id = ?1 AND participant_id = ?2 AND participant_type = ?3
              AND (?4 IS NULL OR reaction = ?4))",
        params![message_id, participant.id, participant.kind, reaction],
        |r| r.get(0),
    )?;
    Ok(exists)
}

/// Reaction token -> number of participants holding it.
pub fn summary(conn: &Connection, message_id: MessageId) -> Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(
        "SELECT reaction, COUNT(*) FROM reactions WHERE message_id = ?1 GROUP BY reaction",
    )?;

    let rows = stmt
        .query_map([message_id], |row| {
            let count: i64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, count as u64))
        })?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

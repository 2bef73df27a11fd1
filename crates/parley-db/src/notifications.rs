//! Per-participant message ledger.
//!
//! Every message gets exactly one row per member of its conversation at
//! send time. Read, flag and delete state live here so the shared message
//! row is never touched when one participant acts on it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::{ConversationId, MessageId, Notification, NotificationId, ParticipantRef, Participation};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{MessageRow, fmt_ts, opt_ts_column, ts_column};

const COLUMNS: &str = "id, message_id, conversation_id, participant_id, participant_type, \
     is_seen, is_sender, flagged, created_at, updated_at, deleted_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        message_id: row.get(1)?,
        conversation_id: row.get(2)?,
        participant: ParticipantRef {
            id: row.get(3)?,
            kind: row.get(4)?,
        },
        is_seen: row.get(5)?,
        is_sender: row.get(6)?,
        flagged: row.get(7)?,
        created_at: ts_column(row, 8)?,
        read_at: ts_column(row, 9)?,
        deleted_at: opt_ts_column(row, 10)?,
    })
}

/// Insert one ledger row per member. The sender's row starts seen.
/// Returns the number of rows written.
pub fn fan_out(conn: &Connection, message: &MessageRow, members: &[Participation]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO notifications
            (message_id, conversation_id, participant_id, participant_type, is_seen, is_sender, flagged, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, ?6, ?6)",
    )?;

    let ts = fmt_ts(message.created_at);
    let mut written = 0;
    for member in members {
        let is_sender = member.participant == message.sender;
        written += stmt.execute(params![
            message.id,
            message.conversation_id,
            member.participant.id,
            member.participant.kind,
            is_sender,
            ts,
        ])?;
    }

    Ok(written)
}

pub fn find(conn: &Connection, message_id: MessageId, participant: &ParticipantRef) -> Result<Option<Notification>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM notifications
         WHERE message_id = ?1 AND participant_id = ?2 AND participant_type = ?3"
    );
    Ok(conn
        .query_row(&sql, params![message_id, participant.id, participant.kind], from_row)
        .optional()?)
}

pub fn list_for_message(conn: &Connection, message_id: MessageId) -> Result<Vec<Notification>> {
    let sql = format!("SELECT {COLUMNS} FROM notifications WHERE message_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([message_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_seen(conn: &Connection, id: NotificationId, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE notifications SET is_seen = 1, updated_at = ?2 WHERE id = ?1",
        params![id, fmt_ts(now)],
    )?;
    Ok(())
}

/// Flip the flag in place; returns the new value.
pub fn toggle_flag(conn: &Connection, id: NotificationId, now: DateTime<Utc>) -> Result<bool> {
    let flagged: bool = conn.query_row(
        "UPDATE notifications SET flagged = NOT flagged, updated_at = ?2 WHERE id = ?1
         RETURNING flagged",
        params![id, fmt_ts(now)],
        |r| r.get(0),
    )?;
    Ok(flagged)
}

/// Soft-delete one participant's row for a message. Rows already deleted
/// are left alone; returns the number of rows changed (0 or 1).
pub fn soft_delete(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
    now: DateTime<Utc>,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE notifications SET deleted_at = ?4, updated_at = ?4
         WHERE message_id = ?1 AND participant_id = ?2 AND participant_type = ?3
           AND deleted_at IS NULL",
        params![message_id, participant.id, participant.kind, fmt_ts(now)],
    )?;
    Ok(changed)
}

pub fn live_count_for_message(conn: &Connection, message_id: MessageId) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE message_id = ?1 AND deleted_at IS NULL",
        [message_id],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}

pub fn live_count_for_conversation(conn: &Connection, conversation_id: ConversationId) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE conversation_id = ?1 AND deleted_at IS NULL",
        [conversation_id],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}

/// Unseen, undeleted rows for a participant, optionally within one conversation.
pub fn unread_count(
    conn: &Connection,
    participant: &ParticipantRef,
    conversation_id: Option<ConversationId>,
) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications
         WHERE participant_id = ?1 AND participant_type = ?2
           AND is_seen = 0 AND deleted_at IS NULL
           AND (?3 IS NULL OR conversation_id = ?3)",
        params![participant.id, participant.kind, conversation_id],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}

pub fn unread(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
) -> Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM notifications
         WHERE conversation_id = ?1 AND participant_id = ?2 AND participant_type = ?3
           AND is_seen = 0 AND deleted_at IS NULL
         ORDER BY message_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![conversation_id, participant.id, participant.kind], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark every row of the participant in the conversation seen.
pub fn read_all(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
    now: DateTime<Utc>,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE notifications SET is_seen = 1, updated_at = ?4
         WHERE conversation_id = ?1 AND participant_id = ?2 AND participant_type = ?3
           AND is_seen = 0",
        params![conversation_id, participant.id, participant.kind, fmt_ts(now)],
    )?;
    Ok(changed)
}

/// Soft-delete every live row of the participant in the conversation.
pub fn clear(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
    now: DateTime<Utc>,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE notifications SET deleted_at = ?4, updated_at = ?4
         WHERE conversation_id = ?1 AND participant_id = ?2 AND participant_type = ?3
           AND deleted_at IS NULL",
        params![conversation_id, participant.id, participant.kind, fmt_ts(now)],
    )?;
    Ok(changed)
}

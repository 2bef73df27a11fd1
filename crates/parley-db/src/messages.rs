use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::{ConversationId, MessageId, ParticipantRef, ParticipationId, SortOrder};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::models::{
    MESSAGE_COLUMN_COUNT, MESSAGE_COLUMNS, MessageRow, MessageViewRow, fmt_ts, json_text,
    message_from_row, opt_ts_column, ts_column,
};

pub struct NewMessage<'a> {
    pub conversation_id: ConversationId,
    pub participation_id: ParticipationId,
    pub sender: &'a ParticipantRef,
    /// Already sealed when `is_encrypted` is set.
    pub body: &'a str,
    pub kind: &'a str,
    pub data: &'a Value,
    pub is_encrypted: bool,
}

/// Which slice of a conversation one participant sees: their live ledger
/// rows, or the ones they trashed.
#[derive(Debug, Clone, Copy)]
pub struct MessageScope<'a> {
    pub conversation_id: ConversationId,
    pub participant: &'a ParticipantRef,
    pub deleted: bool,
}

impl MessageScope<'_> {
    fn deleted_clause(&self) -> &'static str {
        if self.deleted {
            "n.deleted_at IS NOT NULL"
        } else {
            "n.deleted_at IS NULL"
        }
    }
}

fn view_from_row(row: &Row<'_>) -> rusqlite::Result<MessageViewRow> {
    let base = MESSAGE_COLUMN_COUNT;
    Ok(MessageViewRow {
        message: message_from_row(row)?,
        notification_id: row.get(base)?,
        is_seen: row.get(base + 1)?,
        is_sender: row.get(base + 2)?,
        flagged: row.get(base + 3)?,
        read_at: ts_column(row, base + 4)?,
        deleted_at: opt_ts_column(row, base + 5)?,
    })
}

const VIEW_COLUMNS: &str = "n.id, n.is_seen, n.is_sender, n.flagged, n.updated_at, n.deleted_at";

pub fn insert(conn: &Connection, new: &NewMessage<'_>, now: DateTime<Utc>) -> Result<MessageRow> {
    conn.execute(
        "INSERT INTO messages
            (conversation_id, participation_id, sender_id, sender_type, body, type, data, is_encrypted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            new.conversation_id,
            new.participation_id,
            new.sender.id,
            new.sender.kind,
            new.body,
            new.kind,
            json_text(new.data),
            new.is_encrypted,
            fmt_ts(now),
        ],
    )?;

    Ok(MessageRow {
        id: conn.last_insert_rowid(),
        conversation_id: new.conversation_id,
        participation_id: Some(new.participation_id),
        sender: new.sender.clone(),
        body: new.body.to_string(),
        kind: new.kind.to_string(),
        data: new.data.clone(),
        is_encrypted: new.is_encrypted,
        created_at: now,
        updated_at: now,
    })
}

pub fn find(conn: &Connection, id: MessageId) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    Ok(conn.query_row(&sql, [id], message_from_row).optional()?)
}

pub fn count_visible(conn: &Connection, scope: &MessageScope<'_>) -> Result<u64> {
    let sql = format!(
        "SELECT COUNT(*) FROM messages m
         JOIN notifications n ON n.message_id = m.id
         WHERE m.conversation_id = ?1 AND n.participant_id = ?2 AND n.participant_type = ?3
           AND {}",
        scope.deleted_clause()
    );
    let count: i64 = conn.query_row(
        &sql,
        params![scope.conversation_id, scope.participant.id, scope.participant.kind],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}

/// Offset page of a participant's view, ordered by message id.
pub fn page_visible(
    conn: &Connection,
    scope: &MessageScope<'_>,
    sorting: SortOrder,
    limit: u32,
    offset: u64,
) -> Result<Vec<MessageViewRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}, {VIEW_COLUMNS} FROM messages m
         JOIN notifications n ON n.message_id = m.id
         WHERE m.conversation_id = ?1 AND n.participant_id = ?2 AND n.participant_type = ?3
           AND {}
         ORDER BY m.id {}
         LIMIT ?4 OFFSET ?5",
        scope.deleted_clause(),
        sorting.as_sql()
    );
    let Ok(offset) = i64::try_from(offset) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                scope.conversation_id,
                scope.participant.id,
                scope.participant.kind,
                limit,
                offset
            ],
            view_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Keyset read: up to `limit` rows strictly past `after` in `sorting` order
/// (from the start when `after` is `None`). Rows inserted between calls can
/// only land past the newest id, so nothing is skipped or repeated.
pub fn seek_visible(
    conn: &Connection,
    scope: &MessageScope<'_>,
    sorting: SortOrder,
    after: Option<MessageId>,
    limit: u32,
) -> Result<Vec<MessageViewRow>> {
    let seek = match (after, sorting) {
        (None, _) => "",
        (Some(_), SortOrder::Asc) => " AND m.id > ?5",
        (Some(_), SortOrder::Desc) => " AND m.id < ?5",
    };
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}, {VIEW_COLUMNS} FROM messages m
         JOIN notifications n ON n.message_id = m.id
         WHERE m.conversation_id = ?1 AND n.participant_id = ?2 AND n.participant_type = ?3
           AND {}{seek}
         ORDER BY m.id {}
         LIMIT ?4",
        scope.deleted_clause(),
        sorting.as_sql()
    );

    let mut params: Vec<&dyn ToSql> = vec![
        &scope.conversation_id,
        &scope.participant.id,
        &scope.participant.kind,
        &limit,
    ];
    if let Some(after) = after.as_ref() {
        params.push(after);
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), view_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Newest message the participant has not removed from their view.
pub fn last_visible(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         JOIN notifications n ON n.message_id = m.id
         WHERE m.conversation_id = ?1 AND n.participant_id = ?2 AND n.participant_type = ?3
           AND n.deleted_at IS NULL
         ORDER BY m.id DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![conversation_id, participant.id, participant.kind], message_from_row)
        .optional()?)
}

pub fn last_in_conversation(conn: &Connection, conversation_id: ConversationId) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.conversation_id = ?1
         ORDER BY m.id DESC
         LIMIT 1"
    );
    Ok(conn.query_row(&sql, [conversation_id], message_from_row).optional()?)
}

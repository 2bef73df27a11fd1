/// Row types and column helpers shared by the query modules.
///
/// Conversations, participation, notifications and reactions map straight
/// onto `parley-types` models. Messages keep a dedicated row type because
/// the stored body may still be sealed; opening it is the caller's job.
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use parley_types::{
    ConversationId, MessageId, NotificationId, ParticipantRef, ParticipationId,
};
use rusqlite::Row;
use rusqlite::types::Type;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub participation_id: Option<ParticipationId>,
    pub sender: ParticipantRef,
    /// Plaintext, or base64 sealed body when `is_encrypted` is set.
    pub body: String,
    pub kind: String,
    pub data: Value,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message joined with one participant's ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageViewRow {
    pub message: MessageRow,
    pub notification_id: NotificationId,
    pub is_seen: bool,
    pub is_sender: bool,
    pub flagged: bool,
    pub read_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Column list matching `message_from_row`, for a `messages m` alias.
pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.participation_id, \
     m.sender_id, m.sender_type, m.body, m.type, m.data, m.is_encrypted, \
     m.created_at, m.updated_at";

pub(crate) const MESSAGE_COLUMN_COUNT: usize = 11;

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        participation_id: row.get(2)?,
        sender: ParticipantRef {
            id: row.get(3)?,
            kind: row.get(4)?,
        },
        body: row.get(5)?,
        kind: row.get(6)?,
        data: json_column(row, 7)?,
        is_encrypted: row.get(8)?,
        created_at: ts_column(row, 9)?,
        updated_at: ts_column(row, 10)?,
    })
}

/// Fixed-width UTC timestamp so lexical order matches chronological order.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') carry no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
}

pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse_ts(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

pub(crate) fn json_text(value: &Value) -> String {
    value.to_string()
}

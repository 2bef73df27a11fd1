use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::{Conversation, ConversationFilters, ConversationId, ParticipantRef};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::models::{fmt_ts, json_column, json_text, ts_column};

const COLUMNS: &str = "c.id, c.private, c.direct_message, c.data, c.created_at, c.updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        private: row.get(1)?,
        direct_message: row.get(2)?,
        data: json_column(row, 3)?,
        created_at: ts_column(row, 4)?,
        updated_at: ts_column(row, 5)?,
    })
}

/// New conversations start private.
pub fn insert(
    conn: &Connection,
    direct_message: bool,
    data: &Value,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    let ts = fmt_ts(now);
    conn.execute(
        "INSERT INTO conversations (private, direct_message, data, created_at, updated_at)
         VALUES (1, ?1, ?2, ?3, ?3)",
        params![direct_message, json_text(data), ts],
    )?;

    Ok(Conversation {
        id: conn.last_insert_rowid(),
        private: true,
        direct_message,
        data: data.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn find(conn: &Connection, id: ConversationId) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {COLUMNS} FROM conversations c WHERE c.id = ?1");
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

pub fn set_private(conn: &Connection, id: ConversationId, private: bool, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET private = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, private, fmt_ts(now)],
    )?;
    Ok(())
}

pub fn set_direct(conn: &Connection, id: ConversationId, direct: bool, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET direct_message = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, direct, fmt_ts(now)],
    )?;
    Ok(())
}

pub fn update_data(conn: &Connection, id: ConversationId, data: &Value, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET data = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, json_text(data), fmt_ts(now)],
    )?;
    Ok(())
}

/// Bump `updated_at`; drives the ordering of conversation lists.
pub fn touch(conn: &Connection, id: ConversationId, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
        params![id, fmt_ts(now)],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: ConversationId) -> Result<bool> {
    let removed = conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
    Ok(removed > 0)
}

// -- Direct pairs --

fn pair_keys(a: &ParticipantRef, b: &ParticipantRef) -> (String, String) {
    let (a, b) = (a.key(), b.key());
    if a <= b { (a, b) } else { (b, a) }
}

/// Record the participant pair of a direct conversation. Returns false when
/// another conversation already owns the pair (nothing is written).
pub fn claim_direct_pair(
    conn: &Connection,
    id: ConversationId,
    a: &ParticipantRef,
    b: &ParticipantRef,
) -> Result<bool> {
    let (first, second) = pair_keys(a, b);
    let inserted = conn.execute(
        "INSERT INTO direct_pairs (conversation_id, first_key, second_key)
         VALUES (?1, ?2, ?3)
         ON CONFLICT DO NOTHING",
        params![id, first, second],
    )?;
    Ok(inserted == 1)
}

pub fn release_direct_pair(conn: &Connection, id: ConversationId) -> Result<()> {
    conn.execute("DELETE FROM direct_pairs WHERE conversation_id = ?1", [id])?;
    Ok(())
}

/// Ids of the direct conversations a participant belongs to.
pub fn direct_conversation_ids(conn: &Connection, participant: &ParticipantRef) -> Result<Vec<ConversationId>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM conversations c
         JOIN participation p ON p.conversation_id = c.id
         WHERE p.participant_id = ?1 AND p.participant_type = ?2 AND c.direct_message = 1
         ORDER BY c.id",
    )?;

    let ids = stmt
        .query_map(params![participant.id, participant.kind], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn participant_conversations(
    conn: &Connection,
    participant: &ParticipantRef,
    direct_only: bool,
) -> Result<Vec<Conversation>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM conversations c
         JOIN participation p ON p.conversation_id = c.id
         WHERE p.participant_id = ?1 AND p.participant_type = ?2
           AND (?3 = 0 OR c.direct_message = 1)
         ORDER BY c.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![participant.id, participant.kind, direct_only], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Listings --

/// WHERE fragment and bound values for the optional listing filters.
fn filter_clause(filters: &ConversationFilters, first_param: usize) -> (String, Vec<bool>) {
    let mut clause = String::new();
    let mut values = Vec::new();

    if let Some(private) = filters.private {
        values.push(private);
        clause.push_str(&format!(" AND c.private = ?{}", first_param + values.len() - 1));
    }
    if let Some(direct) = filters.direct_message {
        values.push(direct);
        clause.push_str(&format!(" AND c.direct_message = ?{}", first_param + values.len() - 1));
    }

    (clause, values)
}

fn run_list(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Conversations the participant belongs to, most recently active first.
pub fn list_for_participant(
    conn: &Connection,
    participant: &ParticipantRef,
    filters: &ConversationFilters,
    limit: u32,
    offset: u64,
) -> Result<Vec<Conversation>> {
    let (clause, values) = filter_clause(filters, 5);
    let sql = format!(
        "SELECT {COLUMNS} FROM conversations c
         JOIN participation p ON p.conversation_id = c.id
         WHERE p.participant_id = ?1 AND p.participant_type = ?2{clause}
         ORDER BY c.updated_at DESC, c.id DESC
         LIMIT ?3 OFFSET ?4"
    );

    // Past the last row SQLite can address.
    let Ok(offset) = i64::try_from(offset) else {
        return Ok(Vec::new());
    };
    let mut params: Vec<&dyn ToSql> = vec![&participant.id, &participant.kind, &limit, &offset];
    params.extend(values.iter().map(|v| v as &dyn ToSql));
    run_list(conn, &sql, &params)
}

pub fn count_for_participant(
    conn: &Connection,
    participant: &ParticipantRef,
    filters: &ConversationFilters,
) -> Result<u64> {
    let (clause, values) = filter_clause(filters, 3);
    let sql = format!(
        "SELECT COUNT(DISTINCT c.id) FROM conversations c
         JOIN participation p ON p.conversation_id = c.id
         WHERE p.participant_id = ?1 AND p.participant_type = ?2{clause}"
    );

    let mut params: Vec<&dyn ToSql> = vec![&participant.id, &participant.kind];
    params.extend(values.iter().map(|v| v as &dyn ToSql));
    let count: i64 = conn.query_row(&sql, params.as_slice(), |r| r.get(0))?;
    Ok(count as u64)
}

/// Public conversations; membership is not considered.
pub fn list_public(
    conn: &Connection,
    filters: &ConversationFilters,
    limit: u32,
    offset: u64,
) -> Result<Vec<Conversation>> {
    let direct_only = ConversationFilters {
        private: None,
        direct_message: filters.direct_message,
    };
    let (clause, values) = filter_clause(&direct_only, 3);
    let sql = format!(
        "SELECT {COLUMNS} FROM conversations c
         WHERE c.private = 0{clause}
         ORDER BY c.updated_at DESC, c.id DESC
         LIMIT ?1 OFFSET ?2"
    );

    let Ok(offset) = i64::try_from(offset) else {
        return Ok(Vec::new());
    };
    let mut params: Vec<&dyn ToSql> = vec![&limit, &offset];
    params.extend(values.iter().map(|v| v as &dyn ToSql));
    run_list(conn, &sql, &params)
}

pub fn count_public(conn: &Connection, filters: &ConversationFilters) -> Result<u64> {
    let direct_only = ConversationFilters {
        private: None,
        direct_message: filters.direct_message,
    };
    let (clause, values) = filter_clause(&direct_only, 1);
    let sql = format!("SELECT COUNT(*) FROM conversations c WHERE c.private = 0{clause}");

    let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
    let count: i64 = conn.query_row(&sql, params.as_slice(), |r| r.get(0))?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::participation;
    use crate::testing::{at, user};
    use serde_json::json;

    fn seed(db: &Database) -> (Conversation, Conversation, Conversation) {
        db.with_tx(|tx| -> Result<_> {
            let a = insert(tx, false, &json!({"title": "a"}), at(0))?;
            let b = insert(tx, true, &json!({}), at(1))?;
            let c = insert(tx, false, &json!({}), at(2))?;
            for conv in [&a, &b] {
                participation::insert(tx, conv.id, &user("alice"), at(3))?;
            }
            participation::insert(tx, b.id, &user("bob"), at(3))?;
            set_private(tx, c.id, false, at(2))?;
            Ok((a, b, c))
        })
        .unwrap()
    }

    #[test]
    fn insert_defaults_to_private() {
        let db = Database::open_in_memory().unwrap();
        let (a, ..) = seed(&db);

        let found = db.with_conn(|conn| find(conn, a.id)).unwrap().unwrap();
        assert!(found.private);
        assert!(!found.direct_message);
        assert_eq!(found.data["title"], "a");
    }

    #[test]
    fn direct_pair_is_unique_regardless_of_order() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, _) = seed(&db);

        db.with_tx(|tx| -> Result<()> {
            assert!(claim_direct_pair(tx, b.id, &user("alice"), &user("bob"))?);
            assert!(!claim_direct_pair(tx, a.id, &user("bob"), &user("alice"))?);

            release_direct_pair(tx, b.id)?;
            assert!(claim_direct_pair(tx, a.id, &user("bob"), &user("alice"))?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn lists_order_by_activity_then_id() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, _) = seed(&db);

        db.with_tx(|tx| -> Result<()> {
            touch(tx, a.id, at(10))?;
            touch(tx, b.id, at(10))?;
            Ok(())
        })
        .unwrap();

        let rows = db
            .with_conn(|conn| {
                list_for_participant(conn, &user("alice"), &ConversationFilters::default(), 10, 0)
            })
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn offset_beyond_sqlite_range_is_empty() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let filters = ConversationFilters::default();
        let offset = u64::MAX;

        db.with_conn(|conn| -> Result<()> {
            assert!(list_for_participant(conn, &user("alice"), &filters, 10, offset)?.is_empty());
            assert!(list_public(conn, &filters, 10, offset)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn filters_apply_to_participant_and_public_lists() {
        let db = Database::open_in_memory().unwrap();
        let (_, b, c) = seed(&db);

        db.with_conn(|conn| -> Result<()> {
            let alice = user("alice");

            let direct = list_for_participant(
                conn,
                &alice,
                &ConversationFilters::default().direct(true),
                10,
                0,
            )?;
            assert_eq!(direct.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id]);
            assert_eq!(count_for_participant(conn, &alice, &ConversationFilters::default())?, 2);

            let public = list_public(conn, &ConversationFilters::default(), 10, 0)?;
            assert_eq!(public.iter().map(|c| c.id).collect::<Vec<_>>(), vec![c.id]);
            assert_eq!(count_public(conn, &ConversationFilters::default())?, 1);

            assert_eq!(direct_conversation_ids(conn, &alice)?, vec![b.id]);
            assert_eq!(participant_conversations(conn, &alice, false)?.len(), 2);
            assert_eq!(participant_conversations(conn, &alice, true)?[0].id, b.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_cascades_participation() {
        let db = Database::open_in_memory().unwrap();
        let (_, b, _) = seed(&db);

        db.with_tx(|tx| -> Result<()> {
            assert!(delete(tx, b.id)?);
            assert_eq!(participation::count(tx, b.id)?, 0);
            assert!(!delete(tx, b.id)?);
            Ok(())
        })
        .unwrap();
    }
}

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Chat DB: running migration v1 (conversations, participation, messages, ledger)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                private         INTEGER NOT NULL DEFAULT 1,
                direct_message  INTEGER NOT NULL DEFAULT 0,
                data            TEXT NOT NULL DEFAULT '{}',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_recent
                ON conversations(updated_at DESC, id DESC);

            CREATE TABLE participation (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id   INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                participant_id    TEXT NOT NULL,
                participant_type  TEXT NOT NULL,
                settings          TEXT NOT NULL DEFAULT '{}',
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL,
                UNIQUE(conversation_id, participant_id, participant_type)
            );

            CREATE INDEX idx_participation_participant
                ON participation(participant_id, participant_type);

            -- One row per direct conversation holding its sorted participant pair.
            -- The UNIQUE constraint backs the application-level duplicate check.
            CREATE TABLE direct_pairs (
                conversation_id  INTEGER PRIMARY KEY REFERENCES conversations(id) ON DELETE CASCADE,
                first_key        TEXT NOT NULL,
                second_key       TEXT NOT NULL,
                UNIQUE(first_key, second_key)
            );

            CREATE TABLE messages (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id   INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                participation_id  INTEGER REFERENCES participation(id) ON DELETE SET NULL,
                sender_id         TEXT NOT NULL,
                sender_type       TEXT NOT NULL,
                body              TEXT NOT NULL,
                type              TEXT NOT NULL DEFAULT 'text',
                data              TEXT NOT NULL DEFAULT '{}',
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, id);

            CREATE TABLE notifications (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id        INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                conversation_id   INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                participant_id    TEXT NOT NULL,
                participant_type  TEXT NOT NULL,
                is_seen           INTEGER NOT NULL DEFAULT 0,
                is_sender         INTEGER NOT NULL DEFAULT 0,
                flagged           INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL,
                deleted_at        TEXT,
                UNIQUE(message_id, participant_id, participant_type)
            );

            CREATE INDEX idx_notifications_participant
                ON notifications(participant_id, participant_type, conversation_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Chat DB: running migration v2 (reactions)");
        conn.execute_batch(
            "
            CREATE TABLE reactions (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id        INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                participant_id    TEXT NOT NULL,
                participant_type  TEXT NOT NULL,
                reaction          TEXT NOT NULL,
                created_at        TEXT NOT NULL,
                UNIQUE(message_id, participant_id, participant_type, reaction)
            );

            CREATE INDEX idx_reactions_message
                ON reactions(message_id);

            CREATE INDEX idx_reactions_participant
                ON reactions(participant_id, participant_type);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Chat DB: running migration v3 (per-message encryption flag)");
        conn.execute_batch(
            "
            ALTER TABLE messages ADD COLUMN is_encrypted INTEGER NOT NULL DEFAULT 0;

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    Ok(())
}

use parley_db::messages::{self as store, MessageScope, NewMessage};
use parley_db::models::MessageViewRow;
use parley_db::rusqlite::Connection;
use parley_db::{conversations, notifications, participation};
use parley_types::{
    ChatEvent, ConversationId, CursorPage, CursorParams, Message, MessageId, MessageView,
    Notification, Page, PageParams, ParticipantRef,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::Chat;
use crate::conversations::{require_conversation, require_participation};
use crate::cursor::{Cursor, Direction};
use crate::error::{ChatError, Result};

/// A message about to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub body: String,
    pub kind: String,
    pub data: Value,
}

impl Outgoing {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            kind: "text".to_string(),
            data: json!({}),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

pub(crate) fn require_message(conn: &Connection, id: MessageId) -> Result<parley_db::models::MessageRow> {
    store::find(conn, id)?.ok_or_else(|| ChatError::not_found("message", id))
}

fn require_notification(
    conn: &Connection,
    message_id: MessageId,
    participant: &ParticipantRef,
) -> Result<Notification> {
    require_message(conn, message_id)?;
    notifications::find(conn, message_id, participant)?.ok_or_else(|| ChatError::NotificationNotFound {
        message_id,
        participant: participant.clone(),
    })
}

impl Chat {
    /// Store a message and write one ledger row per current member, in one
    /// transaction. The author must be a member.
    pub fn send(
        &self,
        conversation_id: ConversationId,
        sender: &ParticipantRef,
        outgoing: Outgoing,
    ) -> Result<Message> {
        let (stored_body, is_encrypted) = self.seal_body(&outgoing.body)?;
        let now = Self::now();

        let (row, recipients) = self.db.with_tx(|tx| -> Result<_> {
            require_conversation(tx, conversation_id)?;
            let author = require_participation(tx, conversation_id, sender)?;

            let row = store::insert(
                tx,
                &NewMessage {
                    conversation_id,
                    participation_id: author.id,
                    sender,
                    body: &stored_body,
                    kind: &outgoing.kind,
                    data: &outgoing.data,
                    is_encrypted,
                },
                now,
            )?;
            conversations::touch(tx, conversation_id, now)?;

            let members = participation::list(tx, conversation_id)?;
            let written = notifications::fan_out(tx, &row, &members)?;
            if written != members.len() {
                return Err(anyhow::anyhow!(
                    "Ledger fan-out wrote {} of {} rows for message {}",
                    written,
                    members.len(),
                    row.id
                )
                .into());
            }
            Ok((row, written))
        })?;

        debug!(
            "Message {} sent to conversation {} ({} ledger rows, encrypted: {})",
            row.id, conversation_id, recipients, is_encrypted
        );

        let message = crate::with_body(row, outgoing.body);
        self.publish(vec![ChatEvent::MessageSent {
            id: message.id,
            conversation_id,
            body: message.body.clone(),
            kind: message.kind.clone(),
            data: message.data.clone(),
            sender: message.sender.clone(),
            sender_details: self.details(&message.sender),
            created_at: message.created_at,
        }]);

        Ok(message)
    }

    pub fn message(&self, id: MessageId) -> Result<Message> {
        let row = self.db.with_conn(|conn| require_message(conn, id))?;
        self.open_row(row)
    }

    /// The participant's ledger row for a message.
    pub fn notification(&self, message_id: MessageId, participant: &ParticipantRef) -> Result<Notification> {
        self.db
            .with_conn(|conn| require_notification(conn, message_id, participant))
    }

    /// Remove a message from one participant's view. The message row itself
    /// stays; trashing an already trashed row changes nothing.
    pub fn trash(&self, message_id: MessageId, participant: &ParticipantRef) -> Result<()> {
        let now = Self::now();
        let events = self.db.with_tx(|tx| -> Result<_> {
            let message = require_message(tx, message_id)?;
            require_notification(tx, message_id, participant)?;

            if notifications::soft_delete(tx, message_id, participant, now)? == 0 {
                return Ok(vec![]);
            }

            let conversation_id = message.conversation_id;
            let mut events = vec![ChatEvent::MessageDeleted {
                message_id,
                conversation_id,
                participant: participant.clone(),
            }];
            if notifications::live_count_for_message(tx, message_id)? == 0 {
                events.push(ChatEvent::AllParticipantsDeletedMessage {
                    message_id,
                    conversation_id,
                });
            }
            if notifications::live_count_for_conversation(tx, conversation_id)? == 0 {
                events.push(ChatEvent::AllParticipantsClearedConversation { conversation_id });
            }
            Ok(events)
        })?;

        if !events.is_empty() {
            debug!("Message {} trashed by {}", message_id, participant);
        }
        self.publish(events);
        Ok(())
    }

    /// Mark the participant's row seen. Idempotent.
    pub fn mark_read(&self, message_id: MessageId, participant: &ParticipantRef) -> Result<Notification> {
        let now = Self::now();
        self.db.with_tx(|tx| -> Result<_> {
            let row = require_notification(tx, message_id, participant)?;
            if row.is_seen {
                return Ok(row);
            }
            notifications::mark_seen(tx, row.id, now)?;
            require_notification(tx, message_id, participant)
        })
    }

    /// Flip the participant's flag on a message. Returns the new state.
    pub fn toggle_flag(&self, message_id: MessageId, participant: &ParticipantRef) -> Result<bool> {
        let now = Self::now();
        self.db.with_tx(|tx| -> Result<_> {
            let row = require_notification(tx, message_id, participant)?;
            Ok(notifications::toggle_flag(tx, row.id, now)?)
        })
    }

    /// Offset page of the participant's view of a conversation, ordered by
    /// message id. `deleted` selects the trashed messages instead. Without
    /// `params` the configured pagination defaults apply.
    pub fn messages(
        &self,
        conversation_id: ConversationId,
        participant: &ParticipantRef,
        params: Option<&PageParams>,
        deleted: bool,
    ) -> Result<Page<MessageView>> {
        let defaults;
        let params = match params {
            Some(params) => params,
            None => {
                defaults = self.page_params();
                &defaults
            }
        };
        let scope = MessageScope {
            conversation_id,
            participant,
            deleted,
        };
        let limit = params.per_page.max(1);

        let (rows, total) = self.db.with_conn(|conn| -> Result<_> {
            require_conversation(conn, conversation_id)?;
            let total = store::count_visible(conn, &scope)?;
            let rows = store::page_visible(conn, &scope, params.sorting, limit, params.offset())?;
            Ok((rows, total))
        })?;

        let items = rows
            .into_iter()
            .map(|row| self.message_view(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, total, params))
    }

    /// Keyset page of the participant's view. Follow `next_cursor` /
    /// `prev_cursor` from the returned page; rows inserted between calls are
    /// neither skipped nor repeated.
    pub fn messages_with_cursor(
        &self,
        conversation_id: ConversationId,
        participant: &ParticipantRef,
        params: Option<&CursorParams>,
        deleted: bool,
    ) -> Result<CursorPage<MessageView>> {
        let defaults;
        let params = match params {
            Some(params) => params,
            None => {
                defaults = self.cursor_params();
                &defaults
            }
        };
        let cursor = match params.cursor.as_deref() {
            Some(token) => Some(Cursor::decode(token).inspect_err(|e| warn!("{}", e))?),
            None => None,
        };
        let direction = cursor.map_or(Direction::Next, |c| c.direction);
        let order = match direction {
            Direction::Next => params.sorting,
            Direction::Prev => params.sorting.reverse(),
        };
        let limit = params.per_page.max(1);
        let scope = MessageScope {
            conversation_id,
            participant,
            deleted,
        };

        let mut rows = self.db.with_conn(|conn| -> Result<_> {
            require_conversation(conn, conversation_id)?;
            let after = cursor.map(|c| c.message_id);
            Ok(store::seek_visible(conn, &scope, order, after, limit.saturating_add(1))?)
        })?;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        if direction == Direction::Prev {
            rows.reverse();
        }

        let first = rows.first().map(|r| r.message.id);
        let last = rows.last().map(|r| r.message.id);
        let (next, prev) = match direction {
            Direction::Next => (
                last.filter(|_| has_more).map(Cursor::next),
                first.filter(|_| cursor.is_some()).map(Cursor::prev),
            ),
            Direction::Prev => (
                last.map(Cursor::next),
                first.filter(|_| has_more).map(Cursor::prev),
            ),
        };

        let items = rows
            .into_iter()
            .map(|row| self.message_view(row))
            .collect::<Result<Vec<_>>>()?;

        Ok(CursorPage {
            items,
            per_page: limit,
            next_cursor: next.map(|c| c.encode()),
            prev_cursor: prev.map(|c| c.encode()),
            cursor_name: params.cursor_name.clone(),
        })
    }

    fn message_view(&self, row: MessageViewRow) -> Result<MessageView> {
        let sender_details = self.details(&row.message.sender);
        Ok(MessageView {
            message: self.open_row(row.message)?,
            notification_id: row.notification_id,
            is_seen: row.is_seen,
            is_sender: row.is_sender,
            flagged: row.flagged,
            read_at: row.read_at,
            deleted_at: row.deleted_at,
            sender_details,
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_db::Database;
    use parley_types::{ChatEvent, CursorParams, PageParams, SortOrder};
    use serde_json::json;

    use super::*;
    use crate::ChatConfig;
    use crate::testing::{Harness, user};

    fn send_all(h: &Harness, conv: ConversationId, bodies: &[(&str, &str)]) -> Vec<MessageId> {
        bodies
            .iter()
            .map(|(who, body)| h.chat.send(conv, &user(who), Outgoing::text(*body)).unwrap().id)
            .collect()
    }

    fn bodies(items: &[MessageView]) -> Vec<String> {
        items.iter().map(|v| v.message.body.clone()).collect()
    }

    #[test]
    fn send_writes_one_ledger_row_per_member() {
        let mut h = Harness::new();
        let conv = h.group(&["alice", "bob", "carol"]);
        h.drain();

        let message = h
            .chat
            .send(conv, &user("alice"), Outgoing::text("hi").with_data(json!({"k": 1})))
            .unwrap();
        assert_eq!(message.body, "hi");
        assert_eq!(message.kind, "text");
        assert!(!message.is_encrypted);

        let mine = h.chat.notification(message.id, &user("alice")).unwrap();
        assert!(mine.is_seen && mine.is_sender);
        let theirs = h.chat.notification(message.id, &user("bob")).unwrap();
        assert!(!theirs.is_seen && !theirs.is_sender);

        assert_eq!(h.chat.unread_count(&user("bob"), Some(conv)).unwrap(), 1);
        assert_eq!(h.chat.unread_count(&user("alice"), None).unwrap(), 0);

        match h.drain().as_slice() {
            [ChatEvent::MessageSent { id, body, data, sender_details, .. }] => {
                assert_eq!(*id, message.id);
                assert_eq!(body, "hi");
                assert_eq!(data["k"], 1);
                assert_eq!(sender_details.as_ref().unwrap()["name"], "alice");
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn send_requires_membership() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);

        let err = h.chat.send(conv, &user("dave"), Outgoing::text("hey")).unwrap_err();
        assert!(matches!(err, ChatError::NotFound { entity: "participation", .. }));
        let err = h.chat.send(404, &user("alice"), Outgoing::text("hey")).unwrap_err();
        assert!(matches!(err, ChatError::NotFound { entity: "conversation", .. }));
    }

    #[test]
    fn late_joiner_gets_no_backfill() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        let old = h.chat.send(conv, &user("alice"), Outgoing::text("before")).unwrap();

        h.chat.add_participants(conv, &[user("dave")]).unwrap();
        let new = h.chat.send(conv, &user("alice"), Outgoing::text("after")).unwrap();

        let page = h.chat.messages(conv, &user("dave"), None, false).unwrap();
        assert_eq!(bodies(&page.items), vec!["after"]);

        let err = h.chat.mark_read(old.id, &user("dave")).unwrap_err();
        assert!(matches!(err, ChatError::NotificationNotFound { .. }));
        assert!(h.chat.mark_read(new.id, &user("dave")).unwrap().is_seen);
    }

    #[test]
    fn mark_read_and_flag_are_per_participant() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        let id = h.chat.send(conv, &user("alice"), Outgoing::text("x")).unwrap().id;

        let first = h.chat.mark_read(id, &user("bob")).unwrap();
        let second = h.chat.mark_read(id, &user("bob")).unwrap();
        assert!(first.is_seen);
        assert_eq!(first, second);

        assert!(h.chat.toggle_flag(id, &user("bob")).unwrap());
        assert!(!h.chat.notification(id, &user("alice")).unwrap().flagged);
        assert!(!h.chat.toggle_flag(id, &user("bob")).unwrap());

        assert!(matches!(h.chat.mark_read(999, &user("bob")), Err(ChatError::NotFound { .. })));
        assert!(matches!(
            h.chat.toggle_flag(id, &user("carol")),
            Err(ChatError::NotificationNotFound { .. })
        ));
    }

    #[test]
    fn trash_is_isolated_per_participant() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        let ids = send_all(&h, conv, &[("alice", "one"), ("alice", "two")]);

        h.chat.trash(ids[0], &user("alice")).unwrap();

        assert_eq!(h.chat.unread_count(&user("bob"), Some(conv)).unwrap(), 2);
        let alice = h.chat.messages(conv, &user("alice"), None, false).unwrap();
        assert_eq!(bodies(&alice.items), vec!["two"]);
        let bob = h.chat.messages(conv, &user("bob"), None, false).unwrap();
        assert_eq!(bob.total, 2);

        let trashed = h.chat.messages(conv, &user("alice"), None, true).unwrap();
        assert_eq!(bodies(&trashed.items), vec!["one"]);
        assert!(trashed.items[0].deleted_at.is_some());

        // The message row is untouched.
        assert_eq!(h.chat.message(ids[0]).unwrap().body, "one");
        // Trashed rows still answer to read/flag.
        assert!(h.chat.toggle_flag(ids[0], &user("alice")).unwrap());
    }

    #[test]
    fn last_trash_signals_fire_once() {
        let mut h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        let ids = send_all(&h, conv, &[("alice", "one"), ("bob", "two")]);
        h.drain();

        h.chat.trash(ids[0], &user("alice")).unwrap();
        assert_eq!(h.drain_names(), vec!["chat.message_deleted"]);

        h.chat.trash(ids[0], &user("bob")).unwrap();
        assert_eq!(
            h.drain_names(),
            vec!["chat.message_deleted", "chat.all_participants_deleted_message"]
        );

        h.chat.trash(ids[1], &user("alice")).unwrap();
        h.chat.trash(ids[1], &user("bob")).unwrap();
        let names = h.drain_names();
        assert_eq!(
            names
                .iter()
                .filter(|n| **n == "chat.all_participants_cleared_conversation")
                .count(),
            1
        );

        // Already trashed: no-op, no events.
        h.chat.trash(ids[1], &user("bob")).unwrap();
        assert!(h.drain().is_empty());
    }

    #[test]
    fn offset_pages_in_both_orders() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        send_all(
            &h,
            conv,
            &[("alice", "m0"), ("bob", "m1"), ("alice", "m2"), ("bob", "m3"), ("alice", "m4")],
        );

        let desc = PageParams {
            per_page: 2,
            sorting: SortOrder::Desc,
            ..Default::default()
        };
        let page = h.chat.messages(conv, &user("bob"), Some(&desc), false).unwrap();
        assert_eq!(bodies(&page.items), vec!["m4", "m3"]);
        assert_eq!(page.total, 5);
        assert_eq!(page.last_page, 3);
        assert!(page.items[1].is_sender);
        assert!(!page.items[0].is_seen);

        let asc = PageParams {
            page: 3,
            per_page: 2,
            ..Default::default()
        };
        let page = h.chat.messages(conv, &user("bob"), Some(&asc), false).unwrap();
        assert_eq!(bodies(&page.items), vec!["m4"]);
        assert!(!page.has_more_pages());
    }

    #[test]
    fn cursor_pages_two_two_one() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        send_all(
            &h,
            conv,
            &[("alice", "m0"), ("bob", "m1"), ("alice", "m2"), ("bob", "m3"), ("alice", "m4")],
        );

        let mut params = CursorParams {
            per_page: 2,
            ..Default::default()
        };
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        let mut pages = Vec::new();
        loop {
            let page = h
                .chat
                .messages_with_cursor(conv, &user("alice"), Some(&params), false)
                .unwrap();
            sizes.push(page.items.len());
            seen.extend(bodies(&page.items));
            let next = page.next_cursor.clone();
            pages.push(page);
            match next {
                Some(token) => params.cursor = Some(token),
                None => break,
            }
        }

        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert!(pages[0].prev_cursor.is_none());
        assert_eq!(pages[2].cursor_name, "cursor");

        // Walk back from the last page.
        params.cursor = pages[2].prev_cursor.clone();
        let back = h.chat.messages_with_cursor(conv, &user("alice"), Some(&params), false).unwrap();
        assert_eq!(bodies(&back.items), vec!["m2", "m3"]);
        assert!(back.next_cursor.is_some());

        params.cursor = back.prev_cursor.clone();
        let start = h
            .chat
            .messages_with_cursor(conv, &user("alice"), Some(&params), false)
            .unwrap();
        assert_eq!(bodies(&start.items), vec!["m0", "m1"]);
        assert!(start.prev_cursor.is_none());
    }

    #[test]
    fn cursor_is_stable_under_inserts() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        send_all(&h, conv, &[("alice", "m0"), ("bob", "m1"), ("alice", "m2")]);

        let desc = CursorParams {
            per_page: 2,
            sorting: SortOrder::Desc,
            ..Default::default()
        };
        let first = h.chat.messages_with_cursor(conv, &user("bob"), Some(&desc), false).unwrap();
        assert_eq!(bodies(&first.items), vec!["m2", "m1"]);

        send_all(&h, conv, &[("bob", "late")]);

        let params = CursorParams {
            cursor: first.next_cursor.clone(),
            ..desc
        };
        let second = h.chat.messages_with_cursor(conv, &user("bob"), Some(&params), false).unwrap();
        assert_eq!(bodies(&second.items), vec!["m0"]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn bad_cursor_is_rejected() {
        let h = Harness::new();
        let conv = h.group(&["alice"]);
        let params = CursorParams {
            cursor: Some("not-a-cursor".into()),
            ..Default::default()
        };
        let err = h
            .chat
            .messages_with_cursor(conv, &user("alice"), Some(&params), false)
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidCursor(_)));
    }

    #[test]
    fn sender_details_follow_whitelist() {
        let h = Harness::with_config(ChatConfig {
            sender_fields_whitelist: vec!["email".into()],
            ..Default::default()
        });
        let conv = h.group(&["alice", "bob"]);
        send_all(&h, conv, &[("alice", "hi")]);

        let page = h.chat.messages(conv, &user("bob"), None, false).unwrap();
        let details = page.items[0].sender_details.as_ref().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details["email"], "alice@example.com");
    }

    #[test]
    fn encryption_keeps_mixed_history_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let key = parley_crypto::keys::generate_key();

        let (conv, plain_id) = {
            let h = Harness::with_database(Database::open(&path).unwrap(), ChatConfig::default());
            let conv = h.group(&["alice", "bob"]);
            let id = send_all(&h, conv, &[("alice", "in the clear")])[0];
            (conv, id)
        };

        let h = Harness::with_database(
            Database::open(&path).unwrap(),
            ChatConfig {
                encrypt_messages: true,
                encryption_key: Some(key),
                ..Default::default()
            },
        );
        let sealed = h.chat.send(conv, &user("bob"), Outgoing::text("secret")).unwrap();
        assert!(sealed.is_encrypted);
        assert_eq!(sealed.body, "secret");

        let stored = h
            .chat
            .database()
            .with_conn(|conn| store::find(conn, sealed.id))
            .unwrap()
            .unwrap();
        assert!(stored.is_encrypted);
        assert_ne!(stored.body, "secret");

        let page = h.chat.messages(conv, &user("alice"), None, false).unwrap();
        assert_eq!(bodies(&page.items), vec!["in the clear", "secret"]);
        assert!(!h.chat.message(plain_id).unwrap().is_encrypted);
        drop(h);

        // Without the key the sealed row cannot be opened.
        let keyless = Harness::with_database(Database::open(&path).unwrap(), ChatConfig::default());
        assert!(matches!(keyless.chat.message(sealed.id), Err(ChatError::Crypto(_))));
        assert_eq!(keyless.chat.message(plain_id).unwrap().body, "in the clear");
    }

    #[test]
    fn encryption_without_key_fails_fast() {
        let config = ChatConfig {
            encrypt_messages: true,
            ..Default::default()
        };
        let result = Chat::new(
            Database::open_in_memory().unwrap(),
            config,
            Default::default(),
            std::sync::Arc::new(crate::NullSink),
        );
        assert!(matches!(result, Err(ChatError::Config(_))));
    }

    #[test]
    fn configured_page_size_applies_without_params() {
        let config = ChatConfig::from_lookup(|key| match key {
            "PARLEY_PER_PAGE" => Some("2".to_string()),
            "PARLEY_SORTING" => Some("desc".to_string()),
            _ => None,
        })
        .unwrap();
        let h = Harness::with_config(config);
        let conv = h.group(&["alice", "bob"]);
        send_all(
            &h,
            conv,
            &[("alice", "m0"), ("bob", "m1"), ("alice", "m2"), ("bob", "m3"), ("alice", "m4")],
        );

        let page = h.chat.messages(conv, &user("bob"), None, false).unwrap();
        assert_eq!(bodies(&page.items), vec!["m4", "m3"]);
        assert_eq!(page.per_page, 2);
        assert_eq!(page.last_page, 3);

        let cursor = h.chat.messages_with_cursor(conv, &user("bob"), None, false).unwrap();
        assert_eq!(bodies(&cursor.items), vec!["m4", "m3"]);
        assert_eq!(cursor.per_page, 2);

        // Explicit params still win over the configured defaults.
        let wide = PageParams {
            per_page: 10,
            ..h.chat.page_params()
        };
        let page = h.chat.messages(conv, &user("bob"), Some(&wide), false).unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].message.body, "m4");
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        send_all(&h, conv, &[("alice", "m0"), ("bob", "m1"), ("alice", "m2")]);

        let params = PageParams {
            page: u32::MAX,
            per_page: u32::MAX,
            ..Default::default()
        };
        let page = h.chat.messages(conv, &user("bob"), Some(&params), false).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.current_page, u32::MAX);
    }

    #[test]
    fn cursor_page_reports_applied_limit() {
        let h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        send_all(&h, conv, &[("alice", "m0"), ("bob", "m1")]);

        let params = CursorParams {
            per_page: 0,
            ..Default::default()
        };
        let page = h
            .chat
            .messages_with_cursor(conv, &user("alice"), Some(&params), false)
            .unwrap();
        assert_eq!(bodies(&page.items), vec!["m0"]);
        assert_eq!(page.per_page, 1);
        assert!(page.next_cursor.is_some());
    }

    #[test]
    fn failed_fan_out_leaves_no_message() {
        let mut h = Harness::new();
        let conv = h.group(&["alice", "bob"]);
        let before = h.chat.conversation(conv).unwrap();
        h.drain();

        h.chat
            .database()
            .with_conn(|conn| -> anyhow::Result<()> {
                conn.execute_batch(
                    "CREATE TRIGGER ledger_down BEFORE INSERT ON notifications
                     BEGIN SELECT RAISE(ABORT, 'ledger unavailable'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let err = h.chat.send(conv, &user("alice"), Outgoing::text("lost")).unwrap_err();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));

        let stored = h
            .chat
            .database()
            .with_conn(|conn| store::last_in_conversation(conn, conv))
            .unwrap();
        assert!(stored.is_none());
        assert!(matches!(h.chat.message(1), Err(ChatError::NotFound { entity: "message", .. })));
        assert_eq!(h.chat.conversation(conv).unwrap().updated_at, before.updated_at);
        assert_eq!(h.chat.unread_count(&user("bob"), None).unwrap(), 0);
        assert!(h.drain().is_empty());

        h.chat
            .database()
            .with_conn(|conn| -> anyhow::Result<()> {
                conn.execute_batch("DROP TRIGGER ledger_down")?;
                Ok(())
            })
            .unwrap();
        let sent = h.chat.send(conv, &user("alice"), Outgoing::text("kept")).unwrap();
        assert_eq!(h.chat.message(sent.id).unwrap().body, "kept");
    }
}

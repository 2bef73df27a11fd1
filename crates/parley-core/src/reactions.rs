use std::collections::BTreeMap;

use parley_db::reactions as store;
use parley_types::{ChatEvent, ConversationId, MessageId, ParticipantRef, Reaction, ReactionToggle};
use tracing::debug;

use crate::Chat;
use crate::error::Result;
use crate::messages::require_message;

impl Chat {
    /// Add a reaction. Reacting twice with the same token keeps one row and
    /// emits nothing the second time.
    pub fn react(&self, message_id: MessageId, participant: &ParticipantRef, reaction: &str) -> Result<Reaction> {
        let now = Self::now();
        let (row, conversation_id, added) = self.db.with_tx(|tx| -> Result<_> {
            let message = require_message(tx, message_id)?;
            let (row, added) = store::insert_if_absent(tx, message_id, participant, reaction, now)?;
            Ok((row, message.conversation_id, added))
        })?;

        if added {
            debug!("{} reacted {} to message {}", participant, reaction, message_id);
            self.publish(vec![added_event(&row, conversation_id)]);
        }
        Ok(row)
    }

    /// Remove a reaction. Returns whether one was removed.
    pub fn unreact(&self, message_id: MessageId, participant: &ParticipantRef, reaction: &str) -> Result<bool> {
        let (removed, conversation_id) = self.db.with_tx(|tx| -> Result<_> {
            let message = require_message(tx, message_id)?;
            let removed = store::delete(tx, message_id, participant, reaction)?;
            Ok((removed, message.conversation_id))
        })?;

        let Some(row) = removed else {
            return Ok(false);
        };
        debug!("{} removed {} from message {}", participant, reaction, message_id);
        self.publish(vec![removed_event(row, conversation_id)]);
        Ok(true)
    }

    /// Add the reaction if absent, remove it if present, in one transaction.
    pub fn toggle_reaction(
        &self,
        message_id: MessageId,
        participant: &ParticipantRef,
        reaction: &str,
    ) -> Result<ReactionToggle> {
        let now = Self::now();
        let (toggle, event) = self.db.with_tx(|tx| -> Result<_> {
            let message = require_message(tx, message_id)?;
            let conversation_id = message.conversation_id;

            if let Some(row) = store::delete(tx, message_id, participant, reaction)? {
                let toggle = ReactionToggle {
                    added: false,
                    reaction: None,
                };
                return Ok((toggle, removed_event(row, conversation_id)));
            }

            let (row, _) = store::insert_if_absent(tx, message_id, participant, reaction, now)?;
            let event = added_event(&row, conversation_id);
            Ok((
                ReactionToggle {
                    added: true,
                    reaction: Some(row),
                },
                event,
            ))
        })?;

        debug!(
            "{} toggled {} on message {} (added: {})",
            participant, reaction, message_id, toggle.added
        );
        self.publish(vec![event]);
        Ok(toggle)
    }

    /// Token -> number of participants holding it.
    pub fn reactions_summary(&self, message_id: MessageId) -> Result<BTreeMap<String, u64>> {
        self.db.with_conn(|conn| {
            require_message(conn, message_id)?;
            Ok(store::summary(conn, message_id)?)
        })
    }

    /// Whether the participant reacted with `reaction`, or with anything
    /// when `reaction` is `None`.
    pub fn has_reacted(
        &self,
        message_id: MessageId,
        participant: &ParticipantRef,
        reaction: Option<&str>,
    ) -> Result<bool> {
        self.db.with_conn(|conn| {
            require_message(conn, message_id)?;
            Ok(store::has_reacted(conn, message_id, participant, reaction)?)
        })
    }

    pub fn reactions(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        self.db.with_conn(|conn| {
            require_message(conn, message_id)?;
            Ok(store::list(conn, message_id)?)
        })
    }

    pub fn reactions_by_participant(
        &self,
        message_id: MessageId,
        participant: &ParticipantRef,
    ) -> Result<Vec<Reaction>> {
        self.db.with_conn(|conn| {
            require_message(conn, message_id)?;
            Ok(store::list_by_participant(conn, message_id, participant)?)
        })
    }
}

fn added_event(row: &Reaction, conversation_id: ConversationId) -> ChatEvent {
    ChatEvent::ReactionAdded {
        id: row.id,
        message_id: row.message_id,
        conversation_id,
        reaction: row.reaction.clone(),
        participant: row.participant.clone(),
    }
}

fn removed_event(row: Reaction, conversation_id: ConversationId) -> ChatEvent {
    ChatEvent::ReactionRemoved {
        id: row.id,
        message_id: row.message_id,
        conversation_id,
        reaction: row.reaction,
        participant: row.participant,
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Harness, user};
    use crate::{ChatError, Outgoing};
    use parley_types::{ChatEvent, MessageId};

    fn setup(h: &Harness) -> MessageId {
        let conv = h.group(&["alice", "bob", "carol"]);
        h.chat.send(conv, &user("alice"), Outgoing::text("lunch?")).unwrap().id
    }

    #[test]
    fn react_is_idempotent() {
        let mut h = Harness::new();
        let id = setup(&h);
        h.drain();

        let first = h.chat.react(id, &user("bob"), "👍").unwrap();
        let second = h.chat.react(id, &user("bob"), "👍").unwrap();
        assert_eq!(first, second);
        assert_eq!(h.drain_names(), vec!["chat.reaction_added"]);
        assert_eq!(h.chat.reactions(id).unwrap().len(), 1);
    }

    #[test]
    fn unreact_only_signals_real_removals() {
        let mut h = Harness::new();
        let id = setup(&h);
        h.chat.react(id, &user("bob"), "👍").unwrap();
        h.drain();

        assert!(!h.chat.unreact(id, &user("carol"), "👍").unwrap());
        assert!(h.drain().is_empty());

        assert!(h.chat.unreact(id, &user("bob"), "👍").unwrap());
        assert_eq!(h.drain_names(), vec!["chat.reaction_removed"]);
        assert!(!h.chat.has_reacted(id, &user("bob"), None).unwrap());
    }

    #[test]
    fn removal_event_names_the_reaction() {
        let mut h = Harness::new();
        let id = setup(&h);
        let added = h.chat.react(id, &user("bob"), "👍").unwrap();
        h.drain();

        h.chat.unreact(id, &user("bob"), "👍").unwrap();
        match h.drain().as_slice() {
            [ChatEvent::ReactionRemoved { id: removed, message_id, reaction, .. }] => {
                assert_eq!(*removed, added.id);
                assert_eq!(*message_id, id);
                assert_eq!(reaction, "👍");
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn toggle_flips_presence() {
        let mut h = Harness::new();
        let id = setup(&h);
        h.drain();

        let on = h.chat.toggle_reaction(id, &user("carol"), "🎉").unwrap();
        assert!(on.added);
        assert_eq!(on.reaction.unwrap().reaction, "🎉");
        assert!(h.chat.has_reacted(id, &user("carol"), Some("🎉")).unwrap());

        let off = h.chat.toggle_reaction(id, &user("carol"), "🎉").unwrap();
        assert!(!off.added);
        assert!(off.reaction.is_none());
        assert!(!h.chat.has_reacted(id, &user("carol"), Some("🎉")).unwrap());

        assert_eq!(
            h.drain_names(),
            vec!["chat.reaction_added", "chat.reaction_removed"]
        );
    }

    #[test]
    fn summary_counts_participants_per_token() {
        let h = Harness::new();
        let id = setup(&h);
        h.chat.react(id, &user("alice"), "👍").unwrap();
        h.chat.react(id, &user("bob"), "👍").unwrap();
        h.chat.react(id, &user("bob"), "❤️").unwrap();

        let summary = h.chat.reactions_summary(id).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary["👍"], 2);
        assert_eq!(summary["❤️"], 1);
        assert_eq!(h.chat.reactions_by_participant(id, &user("bob")).unwrap().len(), 2);
        assert!(h.chat.has_reacted(id, &user("alice"), None).unwrap());
    }

    #[test]
    fn missing_message() {
        let h = Harness::new();
        assert!(matches!(h.chat.react(5, &user("bob"), "👍"), Err(ChatError::NotFound { .. })));
        assert!(matches!(h.chat.reactions_summary(5), Err(ChatError::NotFound { .. })));
        assert!(matches!(
            h.chat.has_reacted(5, &user("bob"), None),
            Err(ChatError::NotFound { .. })
        ));
        assert!(matches!(
            h.chat.reactions_by_participant(5, &user("bob")),
            Err(ChatError::NotFound { .. })
        ));
    }
}

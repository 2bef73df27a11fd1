use parley_db::notifications as ledger;
use parley_types::{ChatEvent, ConversationId, Notification, ParticipantRef};
use tracing::debug;

use crate::Chat;
use crate::conversations::require_conversation;
use crate::error::Result;

impl Chat {
    /// Unseen messages still in the participant's view, across all their
    /// conversations or within one.
    pub fn unread_count(
        &self,
        participant: &ParticipantRef,
        conversation_id: Option<ConversationId>,
    ) -> Result<u64> {
        self.db
            .with_conn(|conn| Ok(ledger::unread_count(conn, participant, conversation_id)?))
    }

    pub fn unread_notifications(
        &self,
        conversation_id: ConversationId,
        participant: &ParticipantRef,
    ) -> Result<Vec<Notification>> {
        self.db.with_conn(|conn| {
            require_conversation(conn, conversation_id)?;
            Ok(ledger::unread(conn, conversation_id, participant)?)
        })
    }

    /// Mark every message in the conversation seen for the participant.
    /// Returns how many rows changed.
    pub fn read_all(&self, conversation_id: ConversationId, participant: &ParticipantRef) -> Result<usize> {
        let now = Self::now();
        let changed = self.db.with_tx(|tx| -> Result<_> {
            require_conversation(tx, conversation_id)?;
            Ok(ledger::read_all(tx, conversation_id, participant, now)?)
        })?;

        debug!("{} read {} messages in conversation {}", participant, changed, conversation_id);
        Ok(changed)
    }

    /// Remove every message of the conversation from the participant's view.
    pub fn clear(&self, conversation_id: ConversationId, participant: &ParticipantRef) -> Result<usize> {
        let now = Self::now();
        let (changed, events) = self.db.with_tx(|tx| -> Result<_> {
            require_conversation(tx, conversation_id)?;

            let changed = ledger::clear(tx, conversation_id, participant, now)?;
            if changed == 0 {
                return Ok((0, vec![]));
            }

            let mut events = vec![ChatEvent::ConversationCleared {
                conversation_id,
                participant: participant.clone(),
            }];
            if ledger::live_count_for_conversation(tx, conversation_id)? == 0 {
                events.push(ChatEvent::AllParticipantsClearedConversation { conversation_id });
            }
            Ok((changed, events))
        })?;

        if changed > 0 {
            debug!("{} cleared {} messages in conversation {}", participant, changed, conversation_id);
        }
        self.publish(events);
        Ok(changed)
    }
}

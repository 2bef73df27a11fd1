use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use parley_db::rusqlite::Connection;
use parley_db::{conversations as store, messages as message_store, participation};
use parley_types::{
    ChatEvent, Conversation, ConversationId, ConversationListOptions, ConversationView, Page,
    ParticipantRef, ParticipantView, Participation,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::Chat;
use crate::error::{ChatError, Result};

pub(crate) fn require_conversation(conn: &Connection, id: ConversationId) -> Result<Conversation> {
    store::find(conn, id)?.ok_or_else(|| ChatError::not_found("conversation", id))
}

pub(crate) fn require_participation(
    conn: &Connection,
    conversation_id: ConversationId,
    participant: &ParticipantRef,
) -> Result<Participation> {
    participation::find(conn, conversation_id, participant)?.ok_or_else(|| {
        ChatError::not_found("participation", format!("{} in conversation {}", participant, conversation_id))
    })
}

/// First occurrence of each participant, in input order.
fn distinct(participants: &[ParticipantRef]) -> Vec<&ParticipantRef> {
    let mut seen = HashSet::new();
    participants.iter().filter(|p| seen.insert(*p)).collect()
}

/// The direct conversation both participants belong to, if any.
fn direct_between(
    conn: &Connection,
    a: &ParticipantRef,
    b: &ParticipantRef,
) -> Result<Option<Conversation>> {
    if a == b {
        return Ok(None);
    }
    let left: BTreeSet<ConversationId> = store::direct_conversation_ids(conn, a)?.into_iter().collect();
    let shared = store::direct_conversation_ids(conn, b)?
        .into_iter()
        .find(|id| left.contains(id));

    match shared {
        Some(id) => Ok(store::find(conn, id)?),
        None => Ok(None),
    }
}

/// Register the member pair of a two-member direct conversation.
fn claim_pair(conn: &Connection, id: ConversationId) -> Result<()> {
    let members = participation::list(conn, id)?;
    let [a, b] = members.as_slice() else {
        return Ok(());
    };

    store::release_direct_pair(conn, id)?;
    if !store::claim_direct_pair(conn, id, &a.participant, &b.participant)? {
        warn!(
            "Direct conversation already exists between {} and {}",
            a.participant, b.participant
        );
        return Err(ChatError::DirectMessagingExists);
    }
    Ok(())
}

impl Chat {
    /// Create a conversation with an initial set of participants.
    ///
    /// Direct conversations take exactly two distinct participants and are
    /// unique per pair.
    pub fn start_conversation(
        &self,
        participants: &[ParticipantRef],
        data: Value,
        direct: bool,
    ) -> Result<Conversation> {
        let members = distinct(participants);
        if direct && members.len() != 2 {
            warn!("Rejected direct conversation with {} participants", members.len());
            return Err(ChatError::InvalidDirectParticipantCount { count: members.len() });
        }

        let now = Self::now();
        let (conversation, joined) = self.db.with_tx(|tx| -> Result<_> {
            if direct && direct_between(tx, members[0], members[1])?.is_some() {
                warn!("Direct conversation already exists between {} and {}", members[0], members[1]);
                return Err(ChatError::DirectMessagingExists);
            }

            let created = store::insert(tx, direct, &data, now)?;
            let joined = self.add_members(tx, &created, participants, now)?;
            Ok((require_conversation(tx, created.id)?, joined))
        })?;

        info!(
            "Conversation {} started with {} participants (direct: {})",
            conversation.id,
            joined.len(),
            direct
        );

        let mut events = vec![ChatEvent::ConversationStarted {
            conversation_id: conversation.id,
            direct_message: direct,
        }];
        if !joined.is_empty() {
            events.push(ChatEvent::ParticipantsJoined {
                conversation_id: conversation.id,
                participants: joined,
            });
        }
        self.publish(events);

        Ok(conversation)
    }

    /// Join participants to an existing conversation. Members already in it
    /// are skipped.
    pub fn add_participants(
        &self,
        id: ConversationId,
        participants: &[ParticipantRef],
    ) -> Result<Conversation> {
        let now = Self::now();
        let (conversation, joined) = self.db.with_tx(|tx| -> Result<_> {
            let conversation = require_conversation(tx, id)?;
            let joined = self.add_members(tx, &conversation, participants, now)?;
            Ok((require_conversation(tx, id)?, joined))
        })?;

        if !joined.is_empty() {
            debug!("{} participants joined conversation {}", joined.len(), id);
            self.publish(vec![ChatEvent::ParticipantsJoined {
                conversation_id: id,
                participants: joined,
            }]);
        }

        Ok(conversation)
    }

    /// Insert participation rows and re-derive visibility and the direct
    /// pair from the fresh member count. Returns the newly joined.
    fn add_members(
        &self,
        conn: &Connection,
        conversation: &Conversation,
        participants: &[ParticipantRef],
        now: DateTime<Utc>,
    ) -> Result<Vec<ParticipantRef>> {
        let mut joining = Vec::new();
        for participant in distinct(participants) {
            if participation::find(conn, conversation.id, participant)?.is_none() {
                joining.push(participant.clone());
            }
        }
        if joining.is_empty() {
            return Ok(joining);
        }

        if conversation.direct_message {
            let count = participation::count(conn, conversation.id)? as usize + joining.len();
            if count > 2 {
                warn!(
                    "Rejected join: direct conversation {} would have {} participants",
                    conversation.id, count
                );
                return Err(ChatError::InvalidDirectParticipantCount { count });
            }
        }

        for participant in &joining {
            participation::insert(conn, conversation.id, participant, now)?;
        }

        let count = participation::count(conn, conversation.id)?;
        if count > 2 && conversation.private && self.config.make_three_or_more_participants_public {
            store::set_private(conn, conversation.id, false, now)?;
            debug!("Conversation {} is now public ({} participants)", conversation.id, count);
        }
        if conversation.direct_message && count == 2 {
            claim_pair(conn, conversation.id)?;
        }

        Ok(joining)
    }

    pub fn remove_participants(
        &self,
        id: ConversationId,
        participants: &[ParticipantRef],
    ) -> Result<Conversation> {
        let (conversation, left) = self.db.with_tx(|tx| -> Result<_> {
            let conversation = require_conversation(tx, id)?;

            let mut left = Vec::new();
            for participant in distinct(participants) {
                if participation::delete(tx, id, participant)? {
                    left.push(participant.clone());
                }
            }
            if !left.is_empty() && conversation.direct_message {
                store::release_direct_pair(tx, id)?;
            }
            Ok((conversation, left))
        })?;

        if !left.is_empty() {
            debug!("{} participants left conversation {}", left.len(), id);
            self.publish(vec![ChatEvent::ParticipantsLeft {
                conversation_id: id,
                participants: left,
            }]);
        }

        Ok(conversation)
    }

    pub fn make_private(&self, id: ConversationId, private: bool) -> Result<Conversation> {
        let now = Self::now();
        self.db.with_tx(|tx| -> Result<_> {
            require_conversation(tx, id)?;
            store::set_private(tx, id, private, now)?;
            require_conversation(tx, id)
        })
    }

    /// Turn direct messaging on or off. Turning it on keeps the one
    /// conversation per pair guarantee and makes the conversation private.
    pub fn make_direct(&self, id: ConversationId, direct: bool) -> Result<Conversation> {
        let now = Self::now();
        self.db.with_tx(|tx| -> Result<_> {
            require_conversation(tx, id)?;

            if !direct {
                store::release_direct_pair(tx, id)?;
                store::set_direct(tx, id, false, now)?;
                return require_conversation(tx, id);
            }

            let members = participation::list(tx, id)?;
            if members.len() > 2 {
                warn!("Rejected make_direct on conversation {} with {} participants", id, members.len());
                return Err(ChatError::InvalidDirectParticipantCount { count: members.len() });
            }
            if let [a, b] = members.as_slice() {
                let existing = direct_between(tx, &a.participant, &b.participant)?;
                if existing.is_some_and(|c| c.id != id) {
                    warn!(
                        "Direct conversation already exists between {} and {}",
                        a.participant, b.participant
                    );
                    return Err(ChatError::DirectMessagingExists);
                }
                claim_pair(tx, id)?;
            }

            store::set_direct(tx, id, true, now)?;
            store::set_private(tx, id, true, now)?;
            require_conversation(tx, id)
        })
    }

    /// Delete a conversation; it must have no participants left.
    pub fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        self.db.with_tx(|tx| -> Result<()> {
            require_conversation(tx, id)?;
            if participation::count(tx, id)? > 0 {
                warn!("Rejected delete of conversation {}: participants remain", id);
                return Err(ChatError::ConversationHasParticipants(id));
            }
            store::delete(tx, id)?;
            Ok(())
        })?;

        info!("Conversation {} deleted", id);
        Ok(())
    }

    /// The direct conversation shared by two participants, if any.
    pub fn conversation_between(
        &self,
        a: &ParticipantRef,
        b: &ParticipantRef,
    ) -> Result<Option<Conversation>> {
        self.db.with_conn(|conn| direct_between(conn, a, b))
    }

    pub fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.db.with_conn(|conn| require_conversation(conn, id))
    }

    pub fn update_conversation_data(&self, id: ConversationId, data: Value) -> Result<Conversation> {
        let now = Self::now();
        self.db.with_tx(|tx| -> Result<_> {
            require_conversation(tx, id)?;
            store::update_data(tx, id, &data, now)?;
            require_conversation(tx, id)
        })
    }

    pub fn participation(&self, id: ConversationId, participant: &ParticipantRef) -> Result<Participation> {
        self.db.with_conn(|conn| {
            require_conversation(conn, id)?;
            require_participation(conn, id, participant)
        })
    }

    /// Replace the per-member settings blob.
    pub fn update_participation_settings(
        &self,
        id: ConversationId,
        participant: &ParticipantRef,
        settings: Value,
    ) -> Result<Participation> {
        let now = Self::now();
        self.db.with_tx(|tx| -> Result<_> {
            let member = require_participation(tx, id, participant)?;
            participation::update_settings(tx, member.id, &settings, now)?;
            participation::find_by_id(tx, member.id)?
                .ok_or_else(|| ChatError::not_found("participation", member.id))
        })
    }

    /// Members of a conversation with their display details.
    pub fn participants(&self, id: ConversationId) -> Result<Vec<ParticipantView>> {
        let members = self.db.with_conn(|conn| -> Result<_> {
            require_conversation(conn, id)?;
            Ok(participation::list(conn, id)?)
        })?;

        Ok(members
            .into_iter()
            .map(|m| self.participant_view(m.participant))
            .collect())
    }

    pub fn participant_conversations(
        &self,
        participant: &ParticipantRef,
        direct_only: bool,
    ) -> Result<Vec<Conversation>> {
        self.db
            .with_conn(|conn| Ok(store::participant_conversations(conn, participant, direct_only)?))
    }

    /// Page of conversations, most recently active first.
    ///
    /// With a participant: the conversations they belong to, each with the
    /// last message still in their view. Without one: public conversations
    /// only, each with its newest message.
    pub fn conversations(
        &self,
        participant: Option<&ParticipantRef>,
        options: &ConversationListOptions,
    ) -> Result<Page<ConversationView>> {
        let filters = &options.filters;
        if participant.is_none() && filters.private == Some(true) {
            warn!("Rejected listing of private conversations without a participant");
            return Err(ChatError::InvalidConversationList);
        }

        let defaults;
        let params = match &options.page {
            Some(params) => params,
            None => {
                defaults = self.page_params();
                &defaults
            }
        };
        let limit = params.per_page.max(1);
        let (rows, total, lasts, members) = self.db.with_conn(|conn| -> Result<_> {
            let (rows, total) = match participant {
                Some(p) => (
                    store::list_for_participant(conn, p, filters, limit, params.offset())?,
                    store::count_for_participant(conn, p, filters)?,
                ),
                None => (
                    store::list_public(conn, filters, limit, params.offset())?,
                    store::count_public(conn, filters)?,
                ),
            };

            let mut lasts = Vec::with_capacity(rows.len());
            for conversation in &rows {
                let last = match participant {
                    Some(p) => message_store::last_visible(conn, conversation.id, p)?,
                    None => message_store::last_in_conversation(conn, conversation.id)?,
                };
                lasts.push(last);
            }

            let ids: Vec<ConversationId> = rows.iter().map(|c| c.id).collect();
            let members = participation::list_for_conversations(conn, &ids)?;
            Ok((rows, total, lasts, members))
        })?;

        let mut by_conversation: HashMap<ConversationId, Vec<ParticipantView>> = HashMap::new();
        for member in members {
            by_conversation
                .entry(member.conversation_id)
                .or_default()
                .push(self.participant_view(member.participant));
        }

        let mut items = Vec::with_capacity(rows.len());
        for (conversation, last) in rows.into_iter().zip(lasts) {
            let last_message = last.map(|row| self.open_row(row)).transpose()?;
            let participants = by_conversation.remove(&conversation.id).unwrap_or_default();
            items.push(ConversationView {
                conversation,
                last_message,
                participants,
            });
        }

        Ok(Page::new(items, total, params))
    }

    fn participant_view(&self, participant: ParticipantRef) -> ParticipantView {
        let details = self.details(&participant);
        ParticipantView { participant, details }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ConversationId, MessageId, ParticipantDetails, ParticipantRef, ReactionId};

/// Domain events handed to the event sink after the owning transaction
/// committed. Payloads are denormalized so a broadcaster never has to read
/// back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// A conversation was created
    ConversationStarted {
        conversation_id: ConversationId,
        direct_message: bool,
    },

    /// A batch of participants joined (one event per batch)
    ParticipantsJoined {
        conversation_id: ConversationId,
        participants: Vec<ParticipantRef>,
    },

    /// A batch of participants left
    ParticipantsLeft {
        conversation_id: ConversationId,
        participants: Vec<ParticipantRef>,
    },

    /// A message was stored and fanned out to the ledger
    MessageSent {
        id: MessageId,
        conversation_id: ConversationId,
        body: String,
        #[serde(rename = "message_type")]
        kind: String,
        data: Value,
        sender: ParticipantRef,
        sender_details: Option<ParticipantDetails>,
        created_at: DateTime<Utc>,
    },

    /// One participant removed a message from their view
    MessageDeleted {
        message_id: MessageId,
        conversation_id: ConversationId,
        participant: ParticipantRef,
    },

    /// The last live ledger row of a message was removed
    AllParticipantsDeletedMessage {
        message_id: MessageId,
        conversation_id: ConversationId,
    },

    /// One participant cleared their view of a conversation
    ConversationCleared {
        conversation_id: ConversationId,
        participant: ParticipantRef,
    },

    /// The last live ledger row of a conversation was removed
    AllParticipantsClearedConversation { conversation_id: ConversationId },

    ReactionAdded {
        id: ReactionId,
        message_id: MessageId,
        conversation_id: ConversationId,
        reaction: String,
        participant: ParticipantRef,
    },

    ReactionRemoved {
        id: ReactionId,
        message_id: MessageId,
        conversation_id: ConversationId,
        reaction: String,
        participant: ParticipantRef,
    },
}

impl ChatEvent {
    /// Conversation this event is scoped to, used as the broadcast channel.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::ConversationStarted { conversation_id, .. }
            | Self::ParticipantsJoined { conversation_id, .. }
            | Self::ParticipantsLeft { conversation_id, .. }
            | Self::MessageSent { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::AllParticipantsDeletedMessage { conversation_id, .. }
            | Self::ConversationCleared { conversation_id, .. }
            | Self::AllParticipantsClearedConversation { conversation_id }
            | Self::ReactionAdded { conversation_id, .. }
            | Self::ReactionRemoved { conversation_id, .. } => *conversation_id,
        }
    }

    /// Dotted event name, e.g. `chat.message_sent`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationStarted { .. } => "chat.conversation_started",
            Self::ParticipantsJoined { .. } => "chat.participants_joined",
            Self::ParticipantsLeft { .. } => "chat.participants_left",
            Self::MessageSent { .. } => "chat.message_sent",
            Self::MessageDeleted { .. } => "chat.message_deleted",
            Self::AllParticipantsDeletedMessage { .. } => "chat.all_participants_deleted_message",
            Self::ConversationCleared { .. } => "chat.conversation_cleared",
            Self::AllParticipantsClearedConversation { .. } => {
                "chat.all_participants_cleared_conversation"
            }
            Self::ReactionAdded { .. } => "chat.reaction_added",
            Self::ReactionRemoved { .. } => "chat.reaction_removed",
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ConversationId = i64;
pub type MessageId = i64;
pub type ParticipationId = i64;
pub type NotificationId = i64;
pub type ReactionId = i64;

/// Projection of a participant returned alongside messages and conversations.
pub type ParticipantDetails = Map<String, Value>;

/// Opaque participant reference: an id plus the type tag of the entity
/// behind it (user, bot, client, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ParticipantRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }

    /// Stable key used for the direct-conversation pair constraint.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

impl fmt::Display for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub private: bool,
    pub direct_message: bool,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership of one participant in one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub id: ParticipationId,
    pub conversation_id: ConversationId,
    pub participant: ParticipantRef,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message as stored. `body` is always plaintext here; encryption at rest
/// is handled below this type and recorded in `is_encrypted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// `None` once the author has left the conversation.
    pub participation_id: Option<ParticipationId>,
    pub sender: ParticipantRef,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(message, participant) ledger row: read, flag and delete state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub participant: ParticipantRef,
    pub is_seen: bool,
    pub is_sender: bool,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    /// Last state change on the row; doubles as the read timestamp.
    pub read_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub participant: ParticipantRef,
    pub reaction: String,
    pub created_at: DateTime<Utc>,
}

/// A message as seen by one participant: the shared row joined with that
/// participant's ledger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub notification_id: NotificationId,
    pub is_seen: bool,
    pub is_sender: bool,
    pub flagged: bool,
    pub read_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub sender_details: Option<ParticipantDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub participant: ParticipantRef,
    pub details: Option<ParticipantDetails>,
}

/// One row of a conversation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub participants: Vec<ParticipantView>,
}

/// Outcome of `toggle_reaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionToggle {
    pub added: bool,
    pub reaction: Option<Reaction>,
}

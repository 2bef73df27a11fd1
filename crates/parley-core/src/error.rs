use parley_types::{ConversationId, MessageId, ParticipantRef};

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("A direct conversation already exists between these participants")]
    DirectMessagingExists,

    #[error("Direct conversations hold at most two participants (would have {count})")]
    InvalidDirectParticipantCount { count: usize },

    #[error("Conversation {0} still has participants")]
    ConversationHasParticipants(ConversationId),

    #[error("Private conversations can only be listed for a participant")]
    InvalidConversationList,

    #[error("No notification for {participant} on message {message_id}")]
    NotificationNotFound {
        message_id: MessageId,
        participant: ParticipantRef,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Message body encryption failed: {0}")]
    Crypto(#[source] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store-level failure (I/O, lock, constraint outside the checks above).
    /// Not retried here; callers decide.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] anyhow::Error),
}

impl ChatError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ChatError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for callers mapping errors onto a wire format.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::DirectMessagingExists => "DIRECT_MESSAGING_EXISTS",
            ChatError::InvalidDirectParticipantCount { .. } => "INVALID_DIRECT_PARTICIPANT_COUNT",
            ChatError::ConversationHasParticipants(_) => "CONVERSATION_HAS_PARTICIPANTS",
            ChatError::InvalidConversationList => "INVALID_CONVERSATION_LIST",
            ChatError::NotificationNotFound { .. } => "NOTIFICATION_NOT_FOUND",
            ChatError::NotFound { .. } => "NOT_FOUND",
            ChatError::InvalidCursor(_) => "INVALID_CURSOR",
            ChatError::Config(_) => "CONFIG_ERROR",
            ChatError::Crypto(_) => "CRYPTO_ERROR",
            ChatError::Serialization(_) => "SERIALIZATION_ERROR",
            ChatError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

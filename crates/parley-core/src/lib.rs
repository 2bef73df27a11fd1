//! Conversation and messaging core: conversations with participants,
//! messages with a per-participant notification ledger, reactions and
//! paginated reads, all over one SQLite store.

pub mod config;
pub mod conversations;
pub mod cursor;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod notifications;
pub mod participants;
pub mod reactions;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_crypto::BodyCipher;
use parley_db::Database;
use parley_db::models::MessageRow;
use parley_types::{
    ChatEvent, CursorParams, Message, PageParams, ParticipantDetails, ParticipantRef,
};
use tracing::info;

pub use config::{ChatConfig, PaginationDefaults};
pub use dispatcher::{Dispatcher, EventSink, NullSink};
pub use error::{ChatError, Result};
pub use messages::Outgoing;
pub use participants::{MemoryResolver, Participant, ParticipantDirectory, ParticipantResolver, Profile};
pub use parley_types as types;

/// Entry point: every conversation, message, ledger and reaction operation
/// hangs off this handle. Cheap to share behind an `Arc`; writes are
/// serialized by the store.
pub struct Chat {
    db: Database,
    config: ChatConfig,
    cipher: Option<BodyCipher>,
    directory: ParticipantDirectory,
    events: Arc<dyn EventSink>,
}

impl Chat {
    pub fn new(
        db: Database,
        config: ChatConfig,
        directory: ParticipantDirectory,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let cipher = config.encryption_key.map(BodyCipher::new);

        info!(
            "Chat ready (encryption: {}, broadcasts: {})",
            config.encrypt_messages, config.broadcasts
        );

        Ok(Self {
            db,
            config,
            cipher,
            directory,
            events,
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn directory(&self) -> &ParticipantDirectory {
        &self.directory
    }

    /// Offset parameters built from the configured defaults, for callers that
    /// only want to override a field or two.
    pub fn page_params(&self) -> PageParams {
        self.config.pagination.page_params()
    }

    pub fn cursor_params(&self) -> CursorParams {
        self.config.pagination.cursor_params()
    }

    pub(crate) fn now() -> DateTime<Utc> {
        Utc::now()
    }

    /// Hand committed events to the sink. Call only after the transaction
    /// that produced them returned `Ok`.
    pub(crate) fn publish(&self, events: Vec<ChatEvent>) {
        if !self.config.broadcasts {
            return;
        }
        for event in events {
            self.events.publish(event);
        }
    }

    pub(crate) fn details(&self, participant: &ParticipantRef) -> Option<ParticipantDetails> {
        self.directory
            .details(participant, &self.config.sender_fields_whitelist)
    }

    /// Body as it goes into the store, plus whether it was sealed.
    pub(crate) fn seal_body(&self, body: &str) -> Result<(String, bool)> {
        match (&self.cipher, self.config.encrypt_messages) {
            (Some(cipher), true) => {
                let sealed = cipher.seal(body).map_err(ChatError::Crypto)?;
                Ok((sealed, true))
            }
            _ => Ok((body.to_string(), false)),
        }
    }

    /// Row to entity, opening the body when the row was sealed.
    pub(crate) fn open_row(&self, mut row: MessageRow) -> Result<Message> {
        let body = if row.is_encrypted {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                ChatError::Crypto(anyhow::anyhow!(
                    "Message {} is encrypted but no key is configured",
                    row.id
                ))
            })?;
            cipher.open(&row.body).map_err(ChatError::Crypto)?
        } else {
            std::mem::take(&mut row.body)
        };

        Ok(with_body(row, body))
    }
}

/// Message entity from a stored row and its plaintext body.
pub(crate) fn with_body(row: MessageRow, body: String) -> Message {
    Message {
        id: row.id,
        conversation_id: row.conversation_id,
        participation_id: row.participation_id,
        sender: row.sender,
        body,
        kind: row.kind,
        data: row.data,
        is_encrypted: row.is_encrypted,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

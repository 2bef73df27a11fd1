use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use parley_types::MessageId;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Continue past the key in the requested sort order.
    Next,
    /// Walk back toward the start of the requested sort order.
    Prev,
}

/// Keyset position in a participant's message list.
/// Token format: base64url("id:123,dir:next").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub message_id: MessageId,
    pub direction: Direction,
}

impl Cursor {
    pub fn next(message_id: MessageId) -> Self {
        Self {
            message_id,
            direction: Direction::Next,
        }
    }

    pub fn prev(message_id: MessageId) -> Self {
        Self {
            message_id,
            direction: Direction::Prev,
        }
    }

    pub fn encode(&self) -> String {
        let dir = match self.direction {
            Direction::Next => "next",
            Direction::Prev => "prev",
        };
        URL_SAFE_NO_PAD.encode(format!("id:{},dir:{}", self.message_id, dir))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| ChatError::InvalidCursor(format!("not base64: {}", e)))?;
        let raw = String::from_utf8(decoded)
            .map_err(|e| ChatError::InvalidCursor(format!("not UTF-8: {}", e)))?;

        let (id_part, dir_part) = raw
            .split_once(',')
            .ok_or_else(|| ChatError::InvalidCursor("unknown cursor format".into()))?;

        let message_id = id_part
            .strip_prefix("id:")
            .and_then(|id| id.parse::<MessageId>().ok())
            .ok_or_else(|| ChatError::InvalidCursor(format!("bad id: {}", id_part)))?;

        let direction = match dir_part.strip_prefix("dir:") {
            Some("next") => Direction::Next,
            Some("prev") => Direction::Prev,
            _ => return Err(ChatError::InvalidCursor(format!("bad direction: {}", dir_part))),
        };

        Ok(Self {
            message_id,
            direction,
        })
    }
}

use std::fmt;

use parley_types::{CursorParams, PageParams, SortOrder};

use crate::error::{ChatError, Result};

/// Defaults applied when a caller does not pass its own page parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationDefaults {
    pub page: u32,
    pub per_page: u32,
    pub sorting: SortOrder,
    pub page_name: String,
    pub cursor_name: String,
}

impl Default for PaginationDefaults {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 25,
            sorting: SortOrder::Asc,
            page_name: "page".to_string(),
            cursor_name: "cursor".to_string(),
        }
    }
}

impl PaginationDefaults {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
            sorting: self.sorting,
            page_name: self.page_name.clone(),
        }
    }

    pub fn cursor_params(&self) -> CursorParams {
        CursorParams {
            per_page: self.per_page,
            sorting: self.sorting,
            cursor: None,
            cursor_name: self.cursor_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ChatConfig {
    /// Seal new message bodies before they are written.
    pub encrypt_messages: bool,
    pub encryption_key: Option<[u8; 32]>,
    /// Publish domain events to the sink after each committed change.
    pub broadcasts: bool,
    /// Participant attributes exposed as sender details. Empty means all.
    pub sender_fields_whitelist: Vec<String>,
    /// Flip a conversation to public once it holds more than two members.
    pub make_three_or_more_participants_public: bool,
    pub pagination: PaginationDefaults,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            encrypt_messages: false,
            encryption_key: None,
            broadcasts: false,
            sender_fields_whitelist: Vec::new(),
            make_three_or_more_participants_public: true,
            pagination: PaginationDefaults::default(),
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("encrypt_messages", &self.encrypt_messages)
            .field("encryption_key", &self.encryption_key.map(|_| "<redacted>"))
            .field("broadcasts", &self.broadcasts)
            .field("sender_fields_whitelist", &self.sender_fields_whitelist)
            .field(
                "make_three_or_more_participants_public",
                &self.make_three_or_more_participants_public,
            )
            .field("pagination", &self.pagination)
            .finish()
    }
}

impl ChatConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("PARLEY_ENCRYPT_MESSAGES") {
            config.encrypt_messages = parse_bool("PARLEY_ENCRYPT_MESSAGES", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_ENCRYPTION_KEY") {
            let key = parley_crypto::keys::decode_key(&raw)
                .map_err(|e| ChatError::Config(format!("PARLEY_ENCRYPTION_KEY: {}", e)))?;
            config.encryption_key = Some(key);
        }
        if let Some(raw) = lookup("PARLEY_BROADCASTS") {
            config.broadcasts = parse_bool("PARLEY_BROADCASTS", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_SENDER_FIELDS") {
            config.sender_fields_whitelist = raw
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(raw) = lookup("PARLEY_PUBLIC_OVER_TWO") {
            config.make_three_or_more_participants_public = parse_bool("PARLEY_PUBLIC_OVER_TWO", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_PER_PAGE") {
            let per_page: u32 = raw
                .trim()
                .parse()
                .map_err(|_| ChatError::Config(format!("PARLEY_PER_PAGE: not a number: {}", raw)))?;
            if per_page == 0 {
                return Err(ChatError::Config("PARLEY_PER_PAGE must be at least 1".into()));
            }
            config.pagination.per_page = per_page;
        }
        if let Some(raw) = lookup("PARLEY_SORTING") {
            config.pagination.sorting = raw
                .trim()
                .parse()
                .map_err(|e| ChatError::Config(format!("PARLEY_SORTING: {}", e)))?;
        }

        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.encrypt_messages && self.encryption_key.is_none() {
            return Err(ChatError::Config(
                "encrypt_messages is enabled but no encryption key is set".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ChatError::Config(format!("{}: not a boolean: {}", key, other))),
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("Unknown sort order: {}", other)),
        }
    }
}

/// Offset pagination request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub page: u32,
    pub per_page: u32,
    pub sorting: SortOrder,
    pub page_name: String,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 25,
            sorting: SortOrder::Asc,
            page_name: "page".to_string(),
        }
    }
}

impl PageParams {
    /// Zero-based row offset; page numbers below 1 are treated as 1.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.per_page)
    }
}

/// Length-aware page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
    pub page_name: String,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, params: &PageParams) -> Self {
        let per_page = params.per_page.max(1);
        let last_page = total.div_ceil(u64::from(per_page)).max(1);
        Self {
            items,
            total,
            per_page,
            current_page: params.page.max(1),
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
            page_name: params.page_name.clone(),
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }
}

/// Cursor pagination request. `cursor` is an opaque token from a previous
/// page's `next_cursor` / `prev_cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorParams {
    pub per_page: u32,
    pub sorting: SortOrder,
    pub cursor: Option<String>,
    pub cursor_name: String,
}

impl Default for CursorParams {
    fn default() -> Self {
        Self {
            per_page: 25,
            sorting: SortOrder::Asc,
            cursor: None,
            cursor_name: "cursor".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub per_page: u32,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub cursor_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationFilters {
    pub private: Option<bool>,
    pub direct_message: Option<bool>,
}

impl ConversationFilters {
    pub fn private(mut self, private: bool) -> Self {
        self.private = Some(private);
        self
    }

    /// Direct conversations are always private.
    pub fn direct(mut self, direct: bool) -> Self {
        self.direct_message = Some(direct);
        self.private = Some(true);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationListOptions {
    /// `None` falls back to the configured pagination defaults.
    pub page: Option<PageParams>,
    pub filters: ConversationFilters,
}

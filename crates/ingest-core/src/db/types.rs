use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExternalListing, SourceId};

/// Largest page size the browse query hands out.
pub const MAX_LIST_LIMIT: u32 = 200;

/// What a staging write did to the `(source, source_url)` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "id")]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Browse filter for staged listings. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFilter {
    pub source: Option<SourceId>,
    pub imported: Option<bool>,
    pub page: u32,
    pub limit: u32,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            source: None,
            imported: None,
            page: 1,
            limit: 20,
        }
    }
}

impl ListingFilter {
    pub fn normalized_page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn normalized_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.normalized_page() - 1) * i64::from(self.normalized_limit())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub rows: Vec<ExternalListing>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub source: SourceId,
    pub total: i64,
    pub imported: i64,
    pub pending: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub fn empty(source: SourceId) -> Self {
        Self {
            source,
            total: 0,
            imported: 0,
            pending: 0,
            last_seen_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStats {
    pub total: i64,
    pub imported: i64,
    pub pending: i64,
    pub per_source: Vec<SourceStats>,
}

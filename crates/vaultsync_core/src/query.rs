//! Structured search over cleartext record metadata.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::{Record, RecordKind};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Search filters and pagination.
///
/// Every filter is optional; an empty query matches every live record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchQuery {
    /// Case-insensitive substring matched against indexed field values.
    pub free_text: Option<String>,
    /// Exact match on the `source` field.
    pub source: Option<String>,
    /// Exact match on the record kind.
    pub kind: Option<RecordKind>,
    /// Exact match on the session id.
    pub session_id: Option<String>,
    /// Inclusive lower bound on `createdAt`.
    pub date_from: Option<Timestamp>,
    /// Inclusive upper bound on `createdAt`.
    pub date_to: Option<Timestamp>,
    /// Page size. Defaults to the store's default and is capped.
    pub limit: Option<usize>,
    /// Number of matching records to skip.
    pub offset: usize,
}

impl SearchQuery {
    /// Creates a query matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the free-text filter.
    #[must_use]
    pub fn free_text(mut self, text: impl Into<String>) -> Self {
        self.free_text = Some(text.into());
        self
    }

    /// Sets the source filter.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the kind filter.
    #[must_use]
    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the session filter.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the inclusive creation-date range.
    #[must_use]
    pub fn created_between(mut self, from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    /// Sets the page window.
    #[must_use]
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Checks the query for contradictions.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero limit or a reversed date
    /// range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.limit == Some(0) {
            return Err(CoreError::validation("limit must be at least 1"));
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(CoreError::validation("dateFrom is after dateTo"));
            }
        }
        Ok(())
    }

    /// Page size after applying the default and the hard cap.
    #[must_use]
    pub fn effective_limit(&self, config: &StoreConfig) -> usize {
        self.limit
            .unwrap_or(config.default_limit)
            .min(config.max_limit)
    }

    /// Returns true if `record` passes every filter and is live at `now`.
    #[must_use]
    pub fn matches(&self, record: &Record, now: Timestamp) -> bool {
        if record.is_expired(now) {
            return false;
        }
        if self.kind.is_some_and(|k| k != record.kind) {
            return false;
        }
        if let Some(source) = &self.source {
            if record.source() != Some(source.as_str()) {
                return false;
            }
        }
        if let Some(session) = &self.session_id {
            if record.session_id.as_deref() != Some(session.as_str()) {
                return false;
            }
        }
        if self.date_from.is_some_and(|from| record.created_at < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| record.created_at > to) {
            return false;
        }
        match &self.free_text {
            Some(text) if !text.is_empty() => {
                let needle = text.to_lowercase();
                record
                    .payload
                    .fields
                    .values()
                    .any(|value| value.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Newest first, ties broken by ascending id.
#[must_use]
pub fn result_order(a: &Record, b: &Record) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    /// Records in this page.
    pub results: Vec<Record>,
    /// Matching records before pagination.
    pub total: usize,
    /// Effective page size.
    pub limit: usize,
    /// Offset this page starts at.
    pub offset: usize,
}

/// Filters, orders and paginates `records`.
pub fn run_query<'a, I>(
    records: I,
    query: &SearchQuery,
    config: &StoreConfig,
    now: Timestamp,
) -> SearchPage
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut matched: Vec<&Record> = records
        .into_iter()
        .filter(|r| query.matches(r, now))
        .collect();
    matched.sort_by(|a, b| result_order(a, b));

    let limit = query.effective_limit(config);
    let total = matched.len();
    let results = matched
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .cloned()
        .collect();

    SearchPage {
        results,
        total,
        limit,
        offset: query.offset,
    }
}

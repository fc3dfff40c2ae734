//! Cursor pagination over reverse-chronological sequences
//!
//! A request carries at most one cursor:
//! - `before`: the next `page_size` items older than the cursor
//! - `after`: every item newer than the cursor, never paged
//! - none: the newest `page_size` items
//!
//! The same request can be answered from a cached prefix or from the store;
//! `paginate_cached_list` decides whether the cached answer is final.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::FeedQuery;
use crate::error::{AppError, Result};
use crate::models::Timestamped;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCursor {
    /// First page, same as `Before(+infinity)`
    Latest,
    Before(DateTime<Utc>),
    After(DateTime<Utc>),
}

impl FeedCursor {
    /// Build a cursor from the `before` / `after` request parameters.
    ///
    /// Empty values count as absent. Supplying both is rejected.
    pub fn from_params(before: Option<&str>, after: Option<&str>) -> Result<Self> {
        let before = before.filter(|s| !s.is_empty());
        let after = after.filter(|s| !s.is_empty());

        match (before, after) {
            (Some(_), Some(_)) => Err(AppError::InvalidCursor(
                "`before` and `after` are mutually exclusive".to_string(),
            )),
            (Some(token), None) => Ok(FeedCursor::Before(decode_cursor(token)?)),
            (None, Some(token)) => Ok(FeedCursor::After(decode_cursor(token)?)),
            (None, None) => Ok(FeedCursor::Latest),
        }
    }

    pub fn is_refresh(&self) -> bool {
        matches!(self, FeedCursor::After(_))
    }
}

/// Opaque cursor token: URL-safe base64 of the UNIX timestamp in microseconds.
pub fn encode_cursor(ts: DateTime<Utc>) -> String {
    URL_SAFE_NO_PAD.encode(ts.timestamp_micros().to_string())
}

pub fn decode_cursor(token: &str) -> Result<DateTime<Utc>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim_end_matches('='))
        .map_err(|e| AppError::InvalidCursor(format!("not base64: {}", e)))?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| AppError::InvalidCursor("not utf-8".to_string()))?;
    let micros: i64 = text
        .parse()
        .map_err(|_| AppError::InvalidCursor(format!("not a timestamp: {:?}", text)))?;

    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| AppError::InvalidCursor(format!("timestamp out of range: {}", micros)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next_page: false,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_next_page: self.has_next_page,
        }
    }
}

impl<T: Timestamped> Page<T> {
    /// `before` cursor for the following page, if there is one.
    pub fn next_cursor(&self) -> Option<String> {
        if !self.has_next_page {
            return None;
        }
        self.items.last().map(|item| encode_cursor(item.created_at()))
    }

    /// `after` cursor that fetches everything newer than this page.
    pub fn refresh_cursor(&self) -> Option<String> {
        self.items.first().map(|item| encode_cursor(item.created_at()))
    }

    /// Turn rows fetched with `FeedQuery::for_page` into a page.
    pub fn from_store_rows(mut rows: Vec<T>, cursor: FeedCursor, page_size: usize) -> Self {
        if cursor.is_refresh() {
            return Page {
                items: rows,
                has_next_page: false,
            };
        }

        let has_next_page = rows.len() > page_size;
        rows.truncate(page_size);
        Page {
            items: rows,
            has_next_page,
        }
    }
}

impl FeedQuery {
    /// Store query answering `cursor`.
    ///
    /// Paged directions ask for one extra row to learn whether another page
    /// exists; refresh is unbounded.
    pub fn for_page(cursor: FeedCursor, page_size: usize) -> Self {
        match cursor {
            FeedCursor::Latest => FeedQuery {
                before: None,
                after: None,
                limit: Some(page_size + 1),
            },
            FeedCursor::Before(ts) => FeedQuery {
                before: Some(ts),
                after: None,
                limit: Some(page_size + 1),
            },
            FeedCursor::After(ts) => FeedQuery {
                before: None,
                after: Some(ts),
                limit: None,
            },
        }
    }
}

/// Paginate an in-memory newest-first list.
pub fn paginate_ordered_list<T: Timestamped + Clone>(
    list: &[T],
    cursor: FeedCursor,
    page_size: usize,
) -> Page<T> {
    match cursor {
        FeedCursor::After(ts) => Page {
            items: list
                .iter()
                .take_while(|item| item.created_at() > ts)
                .cloned()
                .collect(),
            has_next_page: false,
        },
        FeedCursor::Latest => slice_page(list, 0, page_size),
        FeedCursor::Before(ts) => match list.iter().position(|item| item.created_at() < ts) {
            Some(start) => slice_page(list, start, page_size),
            None => Page::empty(),
        },
    }
}

fn slice_page<T: Clone>(list: &[T], start: usize, page_size: usize) -> Page<T> {
    let end = (start + page_size).min(list.len());
    Page {
        items: list[start..end].to_vec(),
        has_next_page: list.len() > start + page_size,
    }
}

/// Paginate a cached prefix of at most `list_limit` items.
///
/// Returns `None` when the cached prefix cannot prove the page complete and
/// the store must answer instead. The cached answer is final when the
/// request is a refresh, when more cached items follow the page, or when the
/// list is shorter than `list_limit` and so holds the whole sequence.
pub fn paginate_cached_list<T: Timestamped + Clone>(
    list: &[T],
    cursor: FeedCursor,
    page_size: usize,
    list_limit: usize,
) -> Option<Page<T>> {
    let page = paginate_ordered_list(list, cursor, page_size);

    if cursor.is_refresh() || page.has_next_page || list.len() < list_limit {
        Some(page)
    } else {
        None
    }
}

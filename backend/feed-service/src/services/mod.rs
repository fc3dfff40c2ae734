//! Service layer for feed-service
//!
//! - feed_reader: cached newsfeed reads and pagination
//! - fanout: post creation fanout into follower feeds
//! - timeline: cached list of each author's own posts
//! - counters: like/comment counters with lazy back-fill

pub mod counters;
pub mod fanout;
pub mod feed_reader;
pub mod timeline;

pub use counters::{CounterKind, PostCounterService};
pub use fanout::{
    AnnouncedPost, BatchReport, FanoutBatch, FanoutDispatcher, FanoutEngine, FanoutJob,
    FanoutPlan, FanoutPost,
};
pub use feed_reader::NewsFeedService;
pub use timeline::TimelineService;

use crate::cache::BoundedListCache;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::Timestamped;
use crate::pagination::{paginate_cached_list, FeedCursor, Page};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use tracing::{debug, warn};

/// Serve one page of a cached list, going to the store when the cached
/// prefix cannot answer or the cache is unreachable.
///
/// `cached` yields the full cached list; `query` answers the cursor from
/// the store.
pub(crate) async fn serve_page<T, C, CFut, Q, QFut>(
    list: &'static str,
    cache: &BoundedListCache,
    cursor: FeedCursor,
    page_size: usize,
    cached: C,
    query: Q,
) -> Result<Page<T>>
where
    T: Serialize + DeserializeOwned + Timestamped + Clone,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<Vec<T>>>,
    Q: FnOnce() -> QFut,
    QFut: Future<Output = Result<Vec<T>>>,
{
    match cached().await {
        Ok(items) => {
            if let Some(page) = paginate_cached_list(&items, cursor, page_size, cache.list_limit())
            {
                debug!(list, cached = items.len(), "Page served from cache");
                metrics::record_page_source(list, "cache");
                return Ok(page);
            }
            debug!(list, cached = items.len(), "Cached prefix too short, querying store");
            metrics::record_page_source(list, "store");
        }
        Err(AppError::Cache(e)) => {
            warn!(list, error = %e, "Cache unavailable, serving page from store");
            metrics::record_page_source(list, "cache_error");
        }
        Err(e) => return Err(e),
    }

    let rows = query().await?;
    Ok(Page::from_store_rows(rows, cursor, page_size))
}
